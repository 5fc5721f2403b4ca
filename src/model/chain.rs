// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Kinematic description of the arm in modified Denavit-Hartenberg convention.
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::exception::{BlinxException, BlinxResult};
use crate::utils::JointAngles;

/// Parameters of one revolute joint.
///
/// Lengths are millimeters, angles radians. The limit is in degrees and is only a policy for
/// the inverse kinematics and jogging; forward kinematics is defined for every angle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointSpec {
    pub d: f64,
    pub a: f64,
    pub alpha: f64,
    #[serde(default)]
    pub offset: f64,
    /// `(min_deg, max_deg)`
    pub limit: (f64, f64),
}

impl JointSpec {
    /// Link transform `Rx(alpha) * Tx(a) * Rz(theta + offset) * Tz(d)` for joint angle `theta`
    /// in radians.
    pub fn transform(&self, theta: f64) -> Matrix4<f64> {
        let (st, ct) = (theta + self.offset).sin_cos();
        let (sa, ca) = self.alpha.sin_cos();
        #[rustfmt::skip]
        let transform = Matrix4::new(
            ct,      -st,      0.,  self.a,
            st * ca, ct * ca,  -sa, -sa * self.d,
            st * sa, ct * sa,  ca,  ca * self.d,
            0.,      0.,       0.,  1.,
        );
        transform
    }

    /// true if `angle_deg` lies inside the joint limit (bounds included)
    pub fn within_limit(&self, angle_deg: f64) -> bool {
        const EPS: f64 = 1e-9;
        angle_deg >= self.limit.0 - EPS && angle_deg <= self.limit.1 + EPS
    }

    /// clamps `angle_deg` into the joint limit
    pub fn clamp(&self, angle_deg: f64) -> f64 {
        angle_deg.max(self.limit.0).min(self.limit.1)
    }
}

/// The six joints of the arm from base to flange. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointChain {
    joints: [JointSpec; 6],
}

impl JointChain {
    /// Creates a chain and checks that every limit interval is well formed.
    /// # Errors
    /// * [`ConfigException`](`crate::exception::BlinxException::ConfigException`) - if a limit
    /// has `min > max` or a parameter is not finite.
    pub fn new(joints: [JointSpec; 6]) -> BlinxResult<Self> {
        for (i, joint) in joints.iter().enumerate() {
            let values = [joint.d, joint.a, joint.alpha, joint.offset];
            if values.iter().any(|v| !v.is_finite()) {
                return Err(BlinxException::ConfigException {
                    message: format!("joint {} has a non-finite DH parameter", i + 1),
                });
            }
            if !(joint.limit.0 <= joint.limit.1) {
                return Err(BlinxException::ConfigException {
                    message: format!(
                        "joint {} has an empty limit interval [{}, {}]",
                        i + 1,
                        joint.limit.0,
                        joint.limit.1
                    ),
                });
            }
        }
        Ok(JointChain { joints })
    }

    /// The six-axis desktop arm (Mirobot geometry) shipped with the BLinx controller.
    pub fn mirobot() -> Self {
        JointChain {
            joints: [
                JointSpec {
                    d: 127.,
                    a: 0.,
                    alpha: 0.,
                    offset: 0.,
                    limit: (-140., 140.),
                },
                JointSpec {
                    d: 0.,
                    a: 29.69,
                    alpha: -PI / 2.,
                    offset: -PI / 2.,
                    limit: (-70., 70.),
                },
                JointSpec {
                    d: 0.,
                    a: 108.,
                    alpha: 0.,
                    offset: 0.,
                    limit: (-60., 45.),
                },
                JointSpec {
                    d: 168.98,
                    a: 20.,
                    alpha: -PI / 2.,
                    offset: 0.,
                    limit: (-150., 150.),
                },
                JointSpec {
                    d: 0.,
                    a: 0.,
                    alpha: PI / 2.,
                    offset: PI / 2.,
                    limit: (-180., 10.),
                },
                JointSpec {
                    d: -24.8,
                    a: 0.,
                    alpha: PI / 2.,
                    offset: 0.,
                    limit: (-180., 180.),
                },
            ],
        }
    }

    /// Parses a chain from JSON of the form `{"joints": [{"d":..,"a":..,"alpha":..,
    /// "offset":..,"limit":[min,max]}, ...]}`.
    pub fn from_json(json: &str) -> BlinxResult<Self> {
        let chain: JointChain =
            serde_json::from_str(json).map_err(|e| BlinxException::ConfigException {
                message: format!("invalid joint chain: {}", e),
            })?;
        JointChain::new(chain.joints)
    }

    /// Loads a chain from a JSON file, see [`from_json`](`Self::from_json`).
    pub fn load<S: AsRef<Path>>(path: S) -> BlinxResult<Self> {
        let json =
            fs::read_to_string(path.as_ref()).map_err(|e| BlinxException::ConfigException {
                message: format!("cannot read {}: {}", path.as_ref().display(), e),
            })?;
        JointChain::from_json(&json)
    }

    pub fn joints(&self) -> &[JointSpec; 6] {
        &self.joints
    }

    /// `(min_deg, max_deg)` for every joint
    pub fn limits(&self) -> [(f64, f64); 6] {
        let mut limits = [(0., 0.); 6];
        for (l, joint) in limits.iter_mut().zip(self.joints.iter()) {
            *l = joint.limit;
        }
        limits
    }

    /// Cumulative transforms from base to each joint frame for joint angles in radians.
    pub fn joint_frames(&self, q: &JointAngles) -> [Matrix4<f64>; 6] {
        let mut frames = [Matrix4::identity(); 6];
        let mut transform = Matrix4::identity();
        for (i, (joint, theta)) in self.joints.iter().zip(q.iter()).enumerate() {
            transform *= joint.transform(*theta);
            frames[i] = transform;
        }
        frames
    }
}

impl Default for JointChain {
    fn default() -> Self {
        JointChain::mirobot()
    }
}

#[cfg(test)]
mod tests {
    use crate::model::chain::{JointChain, JointSpec};
    use crate::utils::test::float_compare;
    use crate::BlinxException;

    #[test]
    fn mirobot_home_flange() {
        let chain = JointChain::mirobot();
        let flange = chain.joint_frames(&[0.; 6])[5];
        float_compare(flange[(0, 3)], 198.67, 1e-9);
        float_compare(flange[(1, 3)], 0., 1e-9);
        float_compare(flange[(2, 3)], 230.2, 1e-9);
    }

    #[test]
    fn first_joint_rotates_about_base_z() {
        let chain = JointChain::mirobot();
        let frames = chain.joint_frames(&[std::f64::consts::FRAC_PI_2, 0., 0., 0., 0., 0.]);
        float_compare(frames[5][(0, 3)], 0., 1e-9);
        float_compare(frames[5][(1, 3)], 198.67, 1e-9);
        float_compare(frames[5][(2, 3)], 230.2, 1e-9);
    }

    #[test]
    fn json_roundtrip_keeps_limits() {
        let json = serde_json::to_string(&JointChain::mirobot()).unwrap();
        let chain = JointChain::from_json(&json).unwrap();
        assert_eq!(chain.limits()[4], (-180., 10.));
        assert_eq!(chain, JointChain::mirobot());
    }

    #[test]
    fn rejects_empty_limit() {
        let mut joints = *JointChain::mirobot().joints();
        joints[2] = JointSpec {
            limit: (10., -10.),
            ..joints[2]
        };
        match JointChain::new(joints) {
            Err(BlinxException::ConfigException { message }) => assert!(message.contains("joint 3")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn clamps_to_limit() {
        let joint = JointChain::mirobot().joints()[2];
        assert_eq!(joint.clamp(50.), 45.);
        assert_eq!(joint.clamp(-61.), -60.);
        assert_eq!(joint.clamp(12.5), 12.5);
        assert!(joint.within_limit(45.));
        assert!(!joint.within_limit(45.1));
    }
}
