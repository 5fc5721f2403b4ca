// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! # libblinx-rs
//! libblinx-rs is a library to control small 6-axis desktop robot arms which are driven over a
//! TCP connection with newline delimited JSON commands, like the Mirobot.
//!
//! **ALWAYS HAVE THE USER STOP BUTTON AT
//! HAND WHILE CONTROLLING THE ROBOT!**
//!
//!
//! ## Design
//! The library is divided into these main modules:
//! * [model](`crate::model`) - forward and inverse kinematics of the arm.
//! * [robot](`crate::robot`) - the [`RobotSession`] which owns the connection, queues commands by
//! priority and publishes telemetry.
//! * [sequencer](`crate::sequencer`) - teach sequences: editing, action files and replay.
//! * [settings](`crate::settings`) - the persisted connection target.
//!
//! # Example:
//!```no_run
//! use blinx::{BlinxResult, LinkConfig, Model, RobotSession, SessionConfig};
//! fn main() -> BlinxResult<()> {
//!     let session = RobotSession::new(Model::default(), SessionConfig::default())?;
//!     let telemetry = session.events().telemetry.subscribe();
//!     session.connect(&LinkConfig::new("192.168.10.242", 1234))?;
//!     let sample = telemetry.recv().expect("session closed");
//!     println!("{:?} -> {:?}", sample.joint_angles, sample.pose);
//!     session.jog_joint(1, 10., true, 50.)?;
//!     Ok(())
//! }
//!   ```
//!
//! The main function returns a BlinxResult<()> which means that it returns either Ok(())
//! or an Error of type BlinxException.
//!
//!```no_run
//! # use blinx::{BlinxResult, Model, RobotSession, SessionConfig};
//! # fn main() -> BlinxResult<()> {
//! let session = RobotSession::new(Model::default(), SessionConfig::default())?;
//! # Ok(())
//! # }
//! ```
//! creates a disconnected session and starts its dispatcher thread. The default [`Model`] holds
//! the kinematic chain of the Mirobot, a different arm can be loaded with
//! [`JointChain::load`].
//!
//! ```no_run
//! # use blinx::{BlinxResult, LinkConfig, Model, RobotSession, SessionConfig};
//! # fn main() -> BlinxResult<()> {
//! # let session = RobotSession::new(Model::default(), SessionConfig::default())?;
//! session.connect(&LinkConfig::new("192.168.10.242", 1234))?;
//! # Ok(())
//! # }
//! ```
//! connects with the robot. You can either provide an IP Address or a hostname. The connect is
//! retried a few times, with the "?" we forward a "could not reach device" error.
//! Once connected, the session asks for the joint angles twice a second and publishes them
//! together with the flange pose on the telemetry channel.
//!
//! ```no_run
//! # use blinx::{BlinxResult, Model, RobotSession, SessionConfig};
//! # fn main() -> BlinxResult<()> {
//! # let session = RobotSession::new(Model::default(), SessionConfig::default())?;
//! session.jog_joint(1, 10., true, 50.)?;
//! # Ok(())
//! # }
//! ```
//! moves joint 1 by 10 degrees at 50% speed. The target is checked against the joint limits
//! before anything is sent.
pub mod exception;
pub mod model;
pub mod network;
pub mod robot;
pub mod sequencer;
pub mod settings;
pub mod utils;

pub use exception::{BlinxException, BlinxResult};
pub use model::chain::{JointChain, JointSpec};
pub use model::{Frame, Model, Pose};
pub use network::LinkConfig;
pub use robot::events::{ConnectionStatus, MoveEstimate, TelemetrySample};
pub use robot::service_types::{RobotMode, ToolSwitch, ToolType};
pub use robot::session::{CartesianAxis, RobotSession, SessionConfig};
pub use sequencer::action::{ActionList, ActionStep};
pub use sequencer::{RunOutcome, Sequencer, SequencerConfig};
pub use utils::JointAngles;
