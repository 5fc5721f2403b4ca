// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Typed notification channels. Every event kind has its own channel, subscribers receive
//! every event published after they subscribed.
use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde_json::Value;

use crate::model::Pose;
use crate::robot::service_types::{RobotMode, Response};
use crate::utils::JointAngles;

/// One-to-many channel of `T`.
pub struct Broadcast<T: Clone> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Default for Broadcast<T> {
    fn default() -> Self {
        Broadcast {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> Broadcast<T> {
    pub fn subscribe(&self) -> Receiver<T> {
        let (sender, receiver) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    /// Sends `event` to all live subscribers and forgets the ones that hung up.
    pub fn publish(&self, event: T) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Joint angles as reported by the arm together with the flange pose computed from them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TelemetrySample {
    /// degrees, rounded to 3 decimals
    pub joint_angles: JointAngles,
    /// mm and degrees, rounded to 3 decimals
    pub pose: Pose,
}

/// Answer to `set_joint_angle_all_time`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MoveEstimate {
    /// the controller expects the move to take this many seconds
    Duration(f64),
    /// the controller cannot reach the target
    Unreachable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// All channels of a session.
#[derive(Default)]
pub struct SessionEvents {
    pub joint_angles: Broadcast<JointAngles>,
    pub telemetry: Broadcast<TelemetrySample>,
    pub move_estimate: Broadcast<MoveEstimate>,
    pub move_in_place: Broadcast<bool>,
    pub robot_mode: Broadcast<RobotMode>,
    /// replies that have no dedicated channel, e.g. answers to raw commands
    pub replies: Broadcast<Response>,
    pub connection: Broadcast<ConnectionStatus>,
}

/// Accepts booleans as well as their string spelling, which some firmware versions send.
pub(crate) fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Accepts numbers as well as numeric strings.
pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
