// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! contains useful type definitions and conversion functions.
use nalgebra::{Matrix3, Rotation3, SMatrix, SVector};
use std::f64::consts::PI;

/// A Vector with 6 entries
pub type Vector6 = SVector<f64, 6>;
/// A Matrix with 6 rows and 6 columns
pub type Matrix6 = SMatrix<f64, 6, 6>;

/// Angles of the six joints. Degrees at the API and wire boundary, radians inside the
/// kinematics.
pub type JointAngles = [f64; 6];

const GIMBAL_TOLERANCE: f64 = 1e-4;

/// converts joint angles from degrees to radians
pub fn deg_to_rad(angles: &JointAngles) -> JointAngles {
    let mut out = [0.; 6];
    for (o, a) in out.iter_mut().zip(angles.iter()) {
        *o = a.to_radians();
    }
    out
}

/// converts joint angles from radians to degrees
pub fn rad_to_deg(angles: &JointAngles) -> JointAngles {
    let mut out = [0.; 6];
    for (o, a) in out.iter_mut().zip(angles.iter()) {
        *o = a.to_degrees();
    }
    out
}

/// wraps an angle in radians into the interval (-pi, pi]
pub fn wrap_to_pi(angle: f64) -> f64 {
    let mut wrapped = angle.rem_euclid(2. * PI);
    if wrapped > PI {
        wrapped -= 2. * PI;
    }
    wrapped
}

/// Rounds `value` to `decimals` places, ties away from zero.
///
/// The rounding works on the shortest decimal representation of the float, so `2.675` becomes
/// `2.68` even though the closest binary value is slightly below it. This is how the arm
/// firmware reports its own values.
pub fn round_half_up(value: f64, decimals: usize) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let text = format!("{}", value.abs());
    let (int_part, frac_part) = match text.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (text.as_str(), ""),
    };
    if frac_part.len() <= decimals {
        return value;
    }
    let mut digits: Vec<u8> = int_part
        .bytes()
        .chain(frac_part.bytes().take(decimals))
        .map(|b| b - b'0')
        .collect();
    if frac_part.as_bytes()[decimals] >= b'5' {
        let mut index = digits.len();
        loop {
            if index == 0 {
                digits.insert(0, 1);
                break;
            }
            index -= 1;
            if digits[index] == 9 {
                digits[index] = 0;
            } else {
                digits[index] += 1;
                break;
            }
        }
    }
    let split = digits.len() - decimals;
    let mut rounded = String::with_capacity(digits.len() + 1);
    for (index, digit) in digits.iter().enumerate() {
        if index == split {
            rounded.push('.');
        }
        rounded.push((b'0' + digit) as char);
    }
    let magnitude: f64 = rounded.parse().unwrap_or_else(|_| value.abs());
    if magnitude == 0. {
        0.
    } else if value.is_sign_negative() {
        -magnitude
    } else {
        magnitude
    }
}

/// rounds every entry of `values` with [`round_half_up`]
pub fn round_all<const N: usize>(values: &[f64; N], decimals: usize) -> [f64; N] {
    let mut out = [0.; N];
    for (o, v) in out.iter_mut().zip(values.iter()) {
        *o = round_half_up(*v, decimals);
    }
    out
}

/// Builds a rotation from roll, pitch and yaw in radians. The rotation is
/// `Rz(rz) * Ry(ry) * Rx(rx)` (zyx order).
pub fn rotation_from_rpy(rx: f64, ry: f64, rz: f64) -> Rotation3<f64> {
    Rotation3::from_euler_angles(rx, ry, rz)
}

/// Extracts `[rx, ry, rz]` in radians from a rotation matrix in zyx order.
///
/// At ry = +-90 degrees yaw and roll are coupled; rz is then fixed to 0 and the whole rotation
/// about the vertical is reported in rx.
pub fn rpy_from_rotation(r: &Matrix3<f64>) -> [f64; 3] {
    let ry = f64::atan2(-r[(2, 0)], f64::hypot(r[(0, 0)], r[(1, 0)]));
    if (ry - PI / 2.).abs() <= GIMBAL_TOLERANCE {
        [f64::atan2(r[(0, 1)], r[(1, 1)]), PI / 2., 0.]
    } else if (ry + PI / 2.).abs() <= GIMBAL_TOLERANCE {
        [-f64::atan2(r[(0, 1)], r[(1, 1)]), -PI / 2., 0.]
    } else {
        [
            f64::atan2(r[(2, 1)], r[(2, 2)]),
            ry,
            f64::atan2(r[(1, 0)], r[(0, 0)]),
        ]
    }
}

/// (de)serializes a [`Duration`](std::time::Duration) as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// (de)serializes an optional [`Duration`](std::time::Duration) as integer milliseconds or null
pub(crate) mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
pub(crate) mod test {
    use crate::utils::{
        deg_to_rad, rad_to_deg, round_all, round_half_up, rotation_from_rpy, rpy_from_rotation,
        wrap_to_pi,
    };
    use std::f64::consts::PI;

    pub(crate) fn slice_compare(a: &[f64], b: &[f64], thresh: f64) {
        assert_eq!(a.len(), b.len());
        for i in 0..a.len() {
            float_compare(a[i], b[i], thresh);
        }
    }

    pub(crate) fn float_compare(a: f64, b: f64, thresh: f64) {
        assert!((a - b).abs() < thresh, "{} != {} (thresh {})", a, b, thresh);
    }

    #[test]
    fn rounds_ties_away_from_zero() {
        assert_eq!(round_half_up(2.675, 2), 2.68);
        assert_eq!(round_half_up(0.125, 2), 0.13);
        assert_eq!(round_half_up(-2.5, 0), -3.);
        assert_eq!(round_half_up(1.0005, 3), 1.001);
        assert_eq!(round_half_up(9.9996, 3), 10.);
        assert_eq!(round_half_up(-0.0004, 3), 0.);
        assert_eq!(round_half_up(12.3, 3), 12.3);
        assert_eq!(round_half_up(2.5e-15, 3), 0.);
    }

    #[test]
    fn rounds_arrays() {
        assert_eq!(
            round_all(&[1.23456, -7.0005, 0.], 3),
            [1.235, -7.001, 0.]
        );
    }

    #[test]
    fn degree_conversion() {
        let deg = [0., 90., -180., 45., 360., -30.];
        let rad = deg_to_rad(&deg);
        float_compare(rad[1], PI / 2., 1e-12);
        slice_compare(&rad_to_deg(&rad), &deg, 1e-9);
    }

    #[test]
    fn wraps_angles() {
        float_compare(wrap_to_pi(3. * PI), PI, 1e-12);
        float_compare(wrap_to_pi(-PI), PI, 1e-12);
        float_compare(wrap_to_pi(22.7f64.to_radians()), 22.7f64.to_radians(), 1e-12);
        float_compare(wrap_to_pi((1300f64).to_radians()), (-140f64).to_radians(), 1e-9);
    }

    #[test]
    fn rpy_roundtrip() {
        let angles = [0.3, -0.7, 2.1];
        let rotation = rotation_from_rpy(angles[0], angles[1], angles[2]);
        slice_compare(&rpy_from_rotation(rotation.matrix()), &angles, 1e-12);
    }

    #[test]
    fn rpy_is_zyx() {
        let rotation = rotation_from_rpy(0., 0., PI / 2.);
        // a pure yaw maps x onto y
        float_compare(rotation.matrix()[(1, 0)], 1., 1e-12);
        let rotation = rotation_from_rpy(0.2, PI / 2., 0.);
        let rpy = rpy_from_rotation(rotation.matrix());
        slice_compare(&rpy, &[0.2, PI / 2., 0.], 1e-9);
    }
}
