// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the kinematic model of the arm.
use std::fmt;

use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::exception::{BlinxException, BlinxResult};
use crate::model::chain::JointChain;
use crate::model::solver::{Solver, SolverParameters, Target};
use crate::utils::{round_half_up, rotation_from_rpy, rpy_from_rotation, wrap_to_pi, JointAngles};

pub mod chain;
pub mod solver;

/// Enumerates the six joint frames and the flange of the arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frame {
    Joint1,
    Joint2,
    Joint3,
    Joint4,
    Joint5,
    Joint6,
    Flange,
}

impl Frame {
    /// All frames from base to flange.
    pub const ALL: [Frame; 7] = [
        Frame::Joint1,
        Frame::Joint2,
        Frame::Joint3,
        Frame::Joint4,
        Frame::Joint5,
        Frame::Joint6,
        Frame::Flange,
    ];

    fn index(self) -> usize {
        match self {
            Frame::Joint1 => 0,
            Frame::Joint2 => 1,
            Frame::Joint3 => 2,
            Frame::Joint4 => 3,
            Frame::Joint5 => 4,
            Frame::Joint6 | Frame::Flange => 5,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Frame::Flange => write!(f, "Flange"),
            other => write!(f, "Joint {}", other.index() + 1),
        }
    }
}

/// Cartesian pose of the flange.
///
/// Position in millimeters, orientation as roll-pitch-yaw in degrees with
/// `R = Rz(rz) * Ry(ry) * Rx(rx)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, z: f64, rx: f64, ry: f64, rz: f64) -> Self {
        Pose {
            x,
            y,
            z,
            rx,
            ry,
            rz,
        }
    }

    /// Extracts the pose from a homogeneous transform.
    pub fn from_matrix(transform: &Matrix4<f64>) -> Self {
        let rotation = transform.fixed_view::<3, 3>(0, 0).into_owned();
        let [rx, ry, rz] = rpy_from_rotation(&rotation);
        Pose {
            x: transform[(0, 3)],
            y: transform[(1, 3)],
            z: transform[(2, 3)],
            rx: rx.to_degrees(),
            ry: ry.to_degrees(),
            rz: rz.to_degrees(),
        }
    }

    /// Homogeneous transform of this pose.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let rotation = rotation_from_rpy(
            self.rx.to_radians(),
            self.ry.to_radians(),
            self.rz.to_radians(),
        );
        let mut transform = rotation.to_homogeneous();
        transform[(0, 3)] = self.x;
        transform[(1, 3)] = self.y;
        transform[(2, 3)] = self.z;
        transform
    }

    /// `[x, y, z, rx, ry, rz]`
    pub fn to_array(&self) -> [f64; 6] {
        [self.x, self.y, self.z, self.rx, self.ry, self.rz]
    }

    pub fn from_array(values: [f64; 6]) -> Self {
        Pose::new(
            values[0], values[1], values[2], values[3], values[4], values[5],
        )
    }

    /// Rounds position and orientation half-up to `decimals` places, the way the pendant
    /// displays it.
    pub fn rounded(&self, decimals: usize) -> Self {
        let mut values = self.to_array();
        for v in values.iter_mut() {
            *v = round_half_up(*v, decimals);
        }
        Pose::from_array(values)
    }
}

/// Forward and inverse kinematics of a [`JointChain`].
#[derive(Clone, Debug, Default)]
pub struct Model {
    chain: JointChain,
    parameters: SolverParameters,
}

impl Model {
    /// Creates a model of `chain` with default solver parameters.
    pub fn new(chain: JointChain) -> Self {
        Model {
            chain,
            parameters: SolverParameters::default(),
        }
    }

    pub fn with_parameters(chain: JointChain, parameters: SolverParameters) -> Self {
        Model { chain, parameters }
    }

    pub fn chain(&self) -> &JointChain {
        &self.chain
    }

    /// Gets the 4x4 pose matrix of the given frame in base frame.
    /// # Arguments
    /// * `frame` - The desired frame.
    /// * `q` - Joint angles in radians.
    pub fn pose(&self, frame: Frame, q: &JointAngles) -> Matrix4<f64> {
        self.chain.joint_frames(q)[frame.index()]
    }

    /// Forward kinematics. Defined for every joint angle, also outside the limits.
    /// # Arguments
    /// * `q` - Joint angles in radians.
    pub fn forward(&self, q: &JointAngles) -> Pose {
        Pose::from_matrix(&self.pose(Frame::Flange, q))
    }

    /// Inverse kinematics seeded from the home configuration.
    ///
    /// The solver does not start from the current arm configuration, so it can pick a different
    /// elbow or wrist configuration than the physically adjacent one.
    /// # Arguments
    /// * `target` - Desired flange pose.
    /// * `respect_limits` - reject solutions outside the joint limits instead of returning them.
    /// # Return
    /// Joint angles in radians, each wrapped to (-pi, pi].
    /// # Errors
    /// * [`NoSolution`](`crate::exception::BlinxException::NoSolution`) - if the solver did not
    /// converge or every solution violated a limit. Solutions are never clamped.
    pub fn inverse(&self, target: &Pose, respect_limits: bool) -> BlinxResult<JointAngles> {
        self.inverse_from(target, None, respect_limits)
    }

    /// Like [`inverse`](`Self::inverse`) but starts the first search from `seed` (radians) if
    /// given.
    pub fn inverse_from(
        &self,
        target: &Pose,
        seed: Option<&JointAngles>,
        respect_limits: bool,
    ) -> BlinxResult<JointAngles> {
        let transform = target.to_matrix();
        let target_frame = Target {
            position: Vector3::new(target.x, target.y, target.z),
            rotation: transform.fixed_view::<3, 3>(0, 0).into_owned(),
        };
        let solver = Solver::new(&self.chain, self.parameters);
        let first_seed = seed.copied().unwrap_or([0.; 6]);
        let mut violated_limits = false;
        for seed in std::iter::once(first_seed).chain(solver.restart_seeds()) {
            let mut solution = match solver.search(&target_frame, &seed) {
                Some(solution) => solution,
                None => continue,
            };
            for angle in solution.iter_mut() {
                *angle = wrap_to_pi(*angle);
            }
            if respect_limits && !self.within_limits_rad(&solution) {
                violated_limits = true;
                continue;
            }
            return Ok(solution);
        }
        let message = if violated_limits {
            format!("{:?} is only reachable outside the joint limits", target)
        } else {
            format!("inverse kinematics did not converge for {:?}", target)
        };
        Err(BlinxException::NoSolution { message })
    }

    /// Clamps every joint angle (degrees) into its limit.
    pub fn clip_to_limits(&self, q_deg: &JointAngles) -> JointAngles {
        let mut clipped = *q_deg;
        for (angle, joint) in clipped.iter_mut().zip(self.chain.joints().iter()) {
            *angle = joint.clamp(*angle);
        }
        clipped
    }

    /// Checks joint angles in degrees against the limits.
    /// # Errors
    /// * [`RangeViolation`](`crate::exception::BlinxException::RangeViolation`) naming the first
    /// joint outside its limit.
    pub fn check_limits(&self, q_deg: &JointAngles) -> BlinxResult<()> {
        for (i, (angle, joint)) in q_deg.iter().zip(self.chain.joints().iter()).enumerate() {
            if !joint.within_limit(*angle) {
                return Err(crate::exception::create_range_violation(format!(
                    "joint {} angle {} outside [{}, {}]",
                    i + 1,
                    angle,
                    joint.limit.0,
                    joint.limit.1
                )));
            }
        }
        Ok(())
    }

    fn within_limits_rad(&self, q: &JointAngles) -> bool {
        q.iter()
            .zip(self.chain.joints().iter())
            .all(|(angle, joint)| joint.within_limit(angle.to_degrees()))
    }
}
