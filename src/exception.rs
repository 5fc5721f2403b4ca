// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains exception and Result definitions
use thiserror::Error;

/// Represents all kind of errors which can occur while talking to the arm or solving its
/// kinematics.
#[derive(Error, Debug)]
pub enum BlinxException {
    /// ConnectException is returned if the arm could not be reached after all connect attempts.
    #[error("could not reach device: {message}")]
    ConnectException { message: String },

    /// NetworkException is returned if sending or receiving on an established connection fails
    /// or times out. The connection is torn down when this happens.
    #[error("{message}")]
    NetworkException { message: String },

    /// DecodeException is returned if a received frame is not a valid response object.
    #[error("malformed frame: {message}")]
    DecodeException { message: String },

    /// NoSolution is returned if the inverse kinematics did not converge or only found
    /// configurations outside the joint limits.
    #[error("target unreachable: {message}")]
    NoSolution { message: String },

    /// RangeViolation is returned if a joint angle, speed or delay is outside its allowed range.
    /// Nothing is sent to the arm in this case.
    #[error("out of range: {message}")]
    RangeViolation { message: String },

    /// NotConnected is returned by session operations while no connection is open.
    #[error("not connected to the robot")]
    NotConnected,

    /// NoTelemetry is returned by relative moves before the first joint angles arrived.
    #[error("no joint angles received from the robot yet")]
    NoTelemetry,

    /// SequencerBusy is returned if an action sequence is already running.
    #[error("the arm is busy running an action sequence")]
    SequencerBusy,

    /// ConfigException is returned for invalid kinematic chain or connection configuration.
    #[error("{message}")]
    ConfigException { message: String },

    /// ActionFileException is returned if an action file cannot be read, parsed or written.
    #[error("{message}")]
    ActionFileException { message: String },

    /// SettingsException is returned if the settings store cannot be read or written or holds
    /// invalid values.
    #[error("{message}")]
    SettingsException { message: String },
}

/// creates a RangeViolation from anything printable
pub(crate) fn create_range_violation(message: impl Into<String>) -> BlinxException {
    BlinxException::RangeViolation {
        message: message.into(),
    }
}

impl From<std::io::Error> for BlinxException {
    fn from(error: std::io::Error) -> Self {
        BlinxException::NetworkException {
            message: error.to_string(),
        }
    }
}

/// Result type which can have BlinxException as Error
pub type BlinxResult<T> = Result<T, BlinxException>;
