// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Commands understood by the arm controller and the responses it sends back.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::exception::BlinxException;
use crate::utils::JointAngles;

pub static DEFAULT_PORT: u16 = 1234;
/// Longest delay `set_time_delay` accepts.
pub static MAX_DELAY_MS: u32 = 30000;

/// Dispatch priority. Lower values are sent first, equal values in arrival order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Emergency = 0,
    System = 1,
    Motion = 2,
    Query = 3,
}

/// Execution mode of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RobotMode {
    /// commands are queued on the device and executed one after another, delays are handled by
    /// the device
    #[serde(rename = "SEQ")]
    Sequential,
    /// commands are executed as they arrive, the host waits for `move_in_place`
    #[serde(rename = "INT")]
    Interactive,
}

impl RobotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RobotMode::Sequential => "SEQ",
            RobotMode::Interactive => "INT",
        }
    }
}

impl fmt::Display for RobotMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RobotMode {
    type Err = BlinxException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "SEQ" => Ok(RobotMode::Sequential),
            "INT" => Ok(RobotMode::Interactive),
            other => Err(BlinxException::DecodeException {
                message: format!("unknown robot mode {:?}", other),
            }),
        }
    }
}

/// End effector mounted on the flange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolType {
    None,
    Gripper,
    Suction,
}

/// Requested state of the end effector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolSwitch {
    None,
    On,
    Off,
}

impl ToolSwitch {
    /// `Some(true)` for on, `Some(false)` for off, `None` if nothing should be switched
    pub fn state(&self) -> Option<bool> {
        match self {
            ToolSwitch::None => None,
            ToolSwitch::On => Some(true),
            ToolSwitch::Off => Some(false),
        }
    }
}

/// A command of the controller protocol.
#[derive(Clone, Debug, PartialEq)]
pub enum RobotCommand {
    GetJointAngleAll,
    /// move one joint (1-6) to `angle` degrees
    SetJointAngle {
        joint: u8,
        speed: f64,
        angle: f64,
    },
    /// move all joints, the reply carries the estimated duration or `false` if unreachable
    SetJointAngleAllTime {
        speed: f64,
        angles: JointAngles,
    },
    /// move all joints without a duration estimate, used for returning to zero
    SetJointAngleAll {
        speed: f64,
        angles: JointAngles,
    },
    SetJointEmergencyStop,
    SetJointInitialize,
    SetJointAutoZero,
    SetEndTool {
        channel: u8,
        on: bool,
    },
    SetRobotIoInterface {
        channel: u8,
        on: bool,
    },
    SetRobotMode(RobotMode),
    GetRobotMode,
    SetTimeDelay {
        milliseconds: u32,
    },
    /// a complete command object entered by the operator, sent as is
    Raw(Value),
}

impl RobotCommand {
    /// The value of the `command` field on the wire.
    pub fn name(&self) -> &str {
        match self {
            RobotCommand::GetJointAngleAll => "get_joint_angle_all",
            RobotCommand::SetJointAngle { .. } => "set_joint_angle",
            RobotCommand::SetJointAngleAllTime { .. } => "set_joint_angle_all_time",
            RobotCommand::SetJointAngleAll { .. } => "set_joint_angle_all",
            RobotCommand::SetJointEmergencyStop => "set_joint_emergency_stop",
            RobotCommand::SetJointInitialize => "set_joint_initialize",
            RobotCommand::SetJointAutoZero => "set_joint_Auto_zero",
            RobotCommand::SetEndTool { .. } => "set_end_tool",
            RobotCommand::SetRobotIoInterface { .. } => "set_robot_io_interface",
            RobotCommand::SetRobotMode(_) => "set_robot_mode",
            RobotCommand::GetRobotMode => "get_robot_mode",
            RobotCommand::SetTimeDelay { .. } => "set_time_delay",
            RobotCommand::Raw(value) => value
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or("raw"),
        }
    }

    /// The value of the `data` field, `None` for commands without payload.
    pub fn data(&self) -> Option<Value> {
        match self {
            RobotCommand::GetJointAngleAll
            | RobotCommand::SetJointAutoZero
            | RobotCommand::GetRobotMode => None,
            RobotCommand::SetJointAngle {
                joint,
                speed,
                angle,
            } => Some(json!([joint, speed, angle])),
            RobotCommand::SetJointAngleAllTime { speed, angles }
            | RobotCommand::SetJointAngleAll { speed, angles } => {
                let mut data = vec![json!(speed)];
                data.extend(angles.iter().map(|a| json!(a)));
                Some(Value::Array(data))
            }
            RobotCommand::SetJointEmergencyStop | RobotCommand::SetJointInitialize => {
                Some(json!([0]))
            }
            RobotCommand::SetEndTool { channel, on }
            | RobotCommand::SetRobotIoInterface { channel, on } => {
                Some(json!([channel, u8::from(*on)]))
            }
            RobotCommand::SetRobotMode(mode) => Some(json!([mode.as_str()])),
            RobotCommand::SetTimeDelay { milliseconds } => Some(json!([milliseconds])),
            RobotCommand::Raw(value) => value.get("data").cloned(),
        }
    }

    /// Priority used when the caller does not pick one.
    pub fn default_priority(&self) -> Priority {
        match self {
            RobotCommand::SetJointEmergencyStop => Priority::Emergency,
            RobotCommand::SetJointInitialize
            | RobotCommand::SetJointAutoZero
            | RobotCommand::SetJointAngleAll { .. } => Priority::System,
            RobotCommand::GetJointAngleAll | RobotCommand::GetRobotMode => Priority::Query,
            _ => Priority::Motion,
        }
    }
}

/// A command together with its dispatch priority.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub command: RobotCommand,
    pub priority: Priority,
}

impl Command {
    /// Wraps `command` with its default priority.
    pub fn new(command: RobotCommand) -> Self {
        let priority = command.default_priority();
        Command { command, priority }
    }

    pub fn with_priority(command: RobotCommand, priority: Priority) -> Self {
        Command { command, priority }
    }
}

impl From<RobotCommand> for Command {
    fn from(command: RobotCommand) -> Self {
        Command::new(command)
    }
}

/// A decoded reply frame `{"return": <name>, "data": <payload>}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "return")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// Name of the unsolicited frame the controller sends when a move has finished.
pub static MOVE_IN_PLACE: &str = "move_in_place";
