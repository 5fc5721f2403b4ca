// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::time::Duration;

use clap::Parser;

use blinx::{BlinxException, BlinxResult, LinkConfig, Model, RobotSession, SessionConfig};

/// An example showing how to continuously read the joint angles and the flange pose.
#[derive(Parser, Debug)]
#[clap(author, version, name = "echo_telemetry")]
struct CommandLineArguments {
    /// IP-Address or hostname of the robot
    pub robot_ip: String,
    /// TCP port of the robot
    #[clap(short, long, default_value_t = 1234)]
    pub port: u16,
    /// Number of samples to print
    #[clap(short, long, default_value_t = 100)]
    pub count: usize,
}

fn main() -> BlinxResult<()> {
    simple_log::quick!();
    let args = CommandLineArguments::parse();
    let session = RobotSession::new(Model::default(), SessionConfig::default())?;
    let telemetry = session.events().telemetry.subscribe();
    session.connect(&LinkConfig::new(args.robot_ip, args.port))?;
    for _ in 0..args.count {
        let sample = telemetry
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| BlinxException::NoTelemetry)?;
        println!("{:?} {:?}", sample.joint_angles, sample.pose);
    }
    session.disconnect();
    Ok(())
}
