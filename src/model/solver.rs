// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Damped least squares (Levenberg-Marquardt) inverse kinematics.
use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::model::chain::JointChain;
use crate::utils::{JointAngles, Matrix6, Vector6};

/// Tuning of the inverse kinematics solver.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParameters {
    /// iterations of a single search
    pub max_iterations: usize,
    /// additional searches from deterministic seeds spread over the joint limits
    pub restarts: usize,
    /// millimeters of position error one radian of orientation error is worth
    pub orientation_weight: f64,
    /// convergence threshold for the position error in mm
    pub position_tolerance: f64,
    /// convergence threshold for the orientation error in rad
    pub orientation_tolerance: f64,
}

impl Default for SolverParameters {
    fn default() -> Self {
        SolverParameters {
            max_iterations: 100,
            restarts: 20,
            orientation_weight: 100.,
            position_tolerance: 1e-6,
            orientation_tolerance: 1e-9,
        }
    }
}

const LAMBDA_START: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e12;
const HALTON_BASES: [u32; 6] = [2, 3, 5, 7, 11, 13];

/// Target of a solve: position in mm and rotation matrix, both in the base frame.
pub(crate) struct Target {
    pub position: Vector3<f64>,
    pub rotation: Matrix3<f64>,
}

pub(crate) struct Solver<'a> {
    chain: &'a JointChain,
    parameters: SolverParameters,
}

impl<'a> Solver<'a> {
    pub fn new(chain: &'a JointChain, parameters: SolverParameters) -> Self {
        Solver { chain, parameters }
    }

    /// Runs a single search from `seed` (radians). Returns the joint angles on convergence.
    pub fn search(&self, target: &Target, seed: &JointAngles) -> Option<JointAngles> {
        let mut q = Vector6::from_column_slice(seed);
        let mut error = self.error(target, &self.flange(&q));
        let mut cost = error.norm_squared();
        let mut lambda = LAMBDA_START;
        for _ in 0..self.parameters.max_iterations {
            if self.converged(&error) {
                return Some(q.into());
            }
            let jacobian = self.jacobian(&q);
            let jtj = jacobian.transpose() * jacobian;
            let gradient = jacobian.transpose() * error;
            let mut damped = jtj;
            for i in 0..6 {
                damped[(i, i)] += lambda * (1. + jtj[(i, i)]);
            }
            let step = match damped.lu().solve(&gradient) {
                Some(step) => step,
                None => {
                    lambda = (lambda * 10.).min(LAMBDA_MAX);
                    continue;
                }
            };
            let candidate = q + step;
            let candidate_error = self.error(target, &self.flange(&candidate));
            let candidate_cost = candidate_error.norm_squared();
            if candidate_cost < cost {
                q = candidate;
                error = candidate_error;
                cost = candidate_cost;
                lambda = (lambda / 10.).max(LAMBDA_MIN);
            } else {
                lambda = (lambda * 10.).min(LAMBDA_MAX);
            }
        }
        if self.converged(&error) {
            Some(q.into())
        } else {
            None
        }
    }

    /// Deterministic seeds inside the joint limits, one per restart.
    pub fn restart_seeds(&self) -> impl Iterator<Item = JointAngles> + '_ {
        let limits = self.chain.limits();
        (1..=self.parameters.restarts as u32).map(move |index| {
            let mut seed = [0.; 6];
            for (joint, s) in seed.iter_mut().enumerate() {
                let (min, max) = limits[joint];
                let fraction = halton(index, HALTON_BASES[joint]);
                *s = (min + fraction * (max - min)).to_radians();
            }
            seed
        })
    }

    fn flange(&self, q: &Vector6) -> Matrix4<f64> {
        self.chain.joint_frames(&(*q).into())[5]
    }

    fn converged(&self, error: &Vector6) -> bool {
        let position = error.fixed_rows::<3>(0).norm();
        let orientation = error.fixed_rows::<3>(3).norm() / self.parameters.orientation_weight;
        position < self.parameters.position_tolerance
            && orientation < self.parameters.orientation_tolerance
    }

    /// Weighted 6D error: position difference followed by the scaled rotation vector of
    /// `R_target * R_current^T`.
    fn error(&self, target: &Target, flange: &Matrix4<f64>) -> Vector6 {
        let position = target.position - flange.fixed_view::<3, 1>(0, 3);
        let current: Matrix3<f64> = flange.fixed_view::<3, 3>(0, 0).into_owned();
        let difference = Rotation3::from_matrix_unchecked(target.rotation * current.transpose());
        let rotation =
            UnitQuaternion::from_rotation_matrix(&difference).scaled_axis()
                * self.parameters.orientation_weight;
        let mut error = Vector6::zeros();
        error.fixed_rows_mut::<3>(0).copy_from(&position);
        error.fixed_rows_mut::<3>(3).copy_from(&rotation);
        error
    }

    /// Geometric Jacobian of the flange with the angular rows scaled like the error.
    fn jacobian(&self, q: &Vector6) -> Matrix6 {
        let frames = self.chain.joint_frames(&(*q).into());
        let end: Vector3<f64> = frames[5].fixed_view::<3, 1>(0, 3).into_owned();
        let mut jacobian = Matrix6::zeros();
        for (i, frame) in frames.iter().enumerate() {
            let axis: Vector3<f64> = frame.fixed_view::<3, 1>(0, 2).into_owned();
            let origin: Vector3<f64> = frame.fixed_view::<3, 1>(0, 3).into_owned();
            let linear = axis.cross(&(end - origin));
            let angular = axis * self.parameters.orientation_weight;
            jacobian.fixed_view_mut::<3, 1>(0, i).copy_from(&linear);
            jacobian.fixed_view_mut::<3, 1>(3, i).copy_from(&angular);
        }
        jacobian
    }
}

/// Radical inverse of `index` in `base`, a low discrepancy sequence in [0, 1).
fn halton(mut index: u32, base: u32) -> f64 {
    let mut fraction = 1.;
    let mut result = 0.;
    while index > 0 {
        fraction /= base as f64;
        result += fraction * (index % base) as f64;
        index /= base;
    }
    result
}
