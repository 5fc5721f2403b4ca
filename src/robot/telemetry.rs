// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Turns joint angle telemetry into flange poses.
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::exception::{BlinxException, BlinxResult};
use crate::model::Model;
use crate::robot::events::{value_as_f64, SessionEvents, TelemetrySample};
use crate::utils::{deg_to_rad, round_all, JointAngles};

/// Decimal places of reported angles and positions.
pub static TELEMETRY_DECIMALS: usize = 3;

/// Latest telemetry sample. Written by the dispatcher only, read by everyone else.
#[derive(Default)]
pub struct TelemetrySnapshot {
    latest: RwLock<Option<TelemetrySample>>,
}

impl TelemetrySnapshot {
    /// the most recent sample or `None` before the first one arrived
    pub fn load(&self) -> Option<TelemetrySample> {
        *self.latest.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn store(&self, sample: TelemetrySample) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(sample);
    }

    pub(crate) fn reset(&self) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Converts `get_joint_angle_all` replies into [`TelemetrySample`]s.
pub struct TelemetryTranslator {
    model: Arc<Model>,
    snapshot: Arc<TelemetrySnapshot>,
}

impl TelemetryTranslator {
    pub fn new(model: Arc<Model>, snapshot: Arc<TelemetrySnapshot>) -> Self {
        TelemetryTranslator { model, snapshot }
    }

    /// Computes the pose of the reported angles (degrees), then rounds angles and pose.
    pub fn translate(&self, joint_angles: &JointAngles) -> TelemetrySample {
        let pose = self
            .model
            .forward(&deg_to_rad(joint_angles))
            .rounded(TELEMETRY_DECIMALS);
        TelemetrySample {
            joint_angles: round_all(joint_angles, TELEMETRY_DECIMALS),
            pose,
        }
    }

    /// Decodes the payload of a `get_joint_angle_all` reply, stores the sample in the snapshot
    /// and publishes angles and sample.
    /// # Errors
    /// * [`DecodeException`](`crate::exception::BlinxException::DecodeException`) - if the
    /// payload is not a list of six numbers. Nothing is published then.
    pub fn handle(&self, data: &Value, events: &SessionEvents) -> BlinxResult<TelemetrySample> {
        let sample = self.translate(&joint_angles_from(data)?);
        self.snapshot.store(sample);
        events.joint_angles.publish(sample.joint_angles);
        events.telemetry.publish(sample);
        Ok(sample)
    }
}

/// Reads six angles from a JSON list of numbers or numeric strings.
pub fn joint_angles_from(data: &Value) -> BlinxResult<JointAngles> {
    let invalid = || BlinxException::DecodeException {
        message: format!("expected six joint angles, got {}", data),
    };
    let values = data.as_array().ok_or_else(invalid)?;
    if values.len() != 6 {
        return Err(invalid());
    }
    let mut angles = [0.; 6];
    for (angle, value) in angles.iter_mut().zip(values.iter()) {
        *angle = value_as_f64(value)
            .filter(|a| a.is_finite())
            .ok_or_else(invalid)?;
    }
    Ok(angles)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::model::{Model, Pose};
    use crate::robot::events::SessionEvents;
    use crate::robot::telemetry::{joint_angles_from, TelemetrySnapshot, TelemetryTranslator};
    use crate::utils::deg_to_rad;

    fn translator() -> (TelemetryTranslator, Arc<TelemetrySnapshot>) {
        let snapshot = Arc::new(TelemetrySnapshot::default());
        (
            TelemetryTranslator::new(Arc::new(Model::default()), snapshot.clone()),
            snapshot,
        )
    }

    #[test]
    fn zero_angles_give_home_pose() {
        let (translator, snapshot) = translator();
        let events = SessionEvents::default();
        let angles = events.joint_angles.subscribe();
        let samples = events.telemetry.subscribe();
        assert!(snapshot.load().is_none());

        translator
            .handle(&json!([0, 0, 0, 0, 0, 0]), &events)
            .unwrap();
        assert_eq!(angles.try_recv().unwrap(), [0.; 6]);
        let sample = samples.try_recv().unwrap();
        assert_eq!(sample.pose, Pose::new(198.67, 0., 230.2, 0., 0., 0.));
        assert_eq!(snapshot.load(), Some(sample));
    }

    #[test]
    fn angles_are_rounded_half_up() {
        let (translator, _) = translator();
        let sample = translator.translate(&[0.0005, -0.0005, 10.1234, 0., 0., 0.]);
        assert_eq!(sample.joint_angles, [0.001, -0.001, 10.123, 0., 0., 0.]);
    }

    #[test]
    fn pose_uses_the_reported_angles() {
        let (translator, _) = translator();
        let reported = [0.0004, 0., 0., 0., 0., 0.];
        let sample = translator.translate(&reported);
        assert_eq!(sample.joint_angles, [0.; 6]);
        assert_eq!(
            sample.pose,
            Model::default().forward(&deg_to_rad(&reported)).rounded(3)
        );
        assert_ne!(sample.pose.y, 0.);
    }

    #[test]
    fn accepts_numeric_strings() {
        assert_eq!(
            joint_angles_from(&json!(["1.5", 2, "-3", 4.25, "0", 0])).unwrap(),
            [1.5, 2., -3., 4.25, 0., 0.]
        );
    }

    #[test]
    fn rejects_bad_payloads() {
        let (translator, snapshot) = translator();
        let events = SessionEvents::default();
        let samples = events.telemetry.subscribe();
        assert!(translator.handle(&json!([0, 0, 0]), &events).is_err());
        assert!(translator.handle(&json!("busy"), &events).is_err());
        assert!(translator
            .handle(&json!([0, 0, 0, 0, 0, "x"]), &events)
            .is_err());
        assert!(samples.try_recv().is_err());
        assert!(snapshot.load().is_none());
    }
}
