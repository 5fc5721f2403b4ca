// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the [`RobotSession`](`session::RobotSession`) type and the protocol plumbing
//! behind it.

pub mod codec;
pub mod command_queue;
pub mod dispatcher;
pub mod events;
pub mod logger;
pub mod service_types;
pub mod session;
pub mod telemetry;
