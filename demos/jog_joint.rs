// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::time::Duration;

use clap::Parser;

use blinx::{BlinxException, BlinxResult, LinkConfig, Model, RobotSession, SessionConfig};

/// An example which moves one joint relative to its current angle.
#[derive(Parser, Debug)]
#[clap(author, version, name = "jog_joint")]
struct CommandLineArguments {
    /// IP-Address or hostname of the robot
    pub robot_ip: String,
    /// Joint to move, 1 to 6
    pub joint: usize,
    /// Step in degrees
    pub step: f64,
    /// Move in negative direction
    #[clap(short, long, action)]
    pub decrease: bool,
    /// Speed in percent
    #[clap(short, long, default_value_t = 30.)]
    pub speed: f64,
    /// TCP port of the robot
    #[clap(short, long, default_value_t = 1234)]
    pub port: u16,
}

fn main() -> BlinxResult<()> {
    simple_log::quick!();
    let args = CommandLineArguments::parse();
    let session = RobotSession::new(Model::default(), SessionConfig::default())?;
    let telemetry = session.events().telemetry.subscribe();
    session.connect(&LinkConfig::new(args.robot_ip, args.port))?;
    let sample = telemetry
        .recv_timeout(Duration::from_secs(5))
        .map_err(|_| BlinxException::NoTelemetry)?;
    println!("current joint angles {:?}", sample.joint_angles);

    println!("WARNING: This example will move the robot! Please make sure to have the user stop button at hand!");
    println!("Press Enter to continue...");
    std::io::stdin().read_line(&mut String::new())?;

    let in_place = session.events().move_in_place.subscribe();
    let angle = session.jog_joint(args.joint, args.step, !args.decrease, args.speed)?;
    println!("moving joint {} to {}", args.joint, angle);
    match in_place.recv_timeout(Duration::from_secs(10)) {
        Ok(_) => println!("finished"),
        Err(_) => println!("no move_in_place within 10 s"),
    }
    Ok(())
}
