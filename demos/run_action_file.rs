// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use clap::Parser;

use blinx::{
    ActionList, BlinxResult, LinkConfig, Model, RobotMode, RobotSession, RunOutcome,
    SessionConfig,
};

/// An example which replays an action file exported by the teach pendant.
#[derive(Parser, Debug)]
#[clap(author, version, name = "run_action_file")]
struct CommandLineArguments {
    /// IP-Address or hostname of the robot
    pub robot_ip: String,
    /// Action file to replay
    pub action_file: String,
    /// TCP port of the robot
    #[clap(short, long, default_value_t = 1234)]
    pub port: u16,
    /// Execution mode, SEQ or INT
    #[clap(short, long, default_value = "SEQ")]
    pub mode: RobotMode,
    /// How often the file is replayed
    #[clap(short, long, default_value_t = 1)]
    pub times: usize,
}

fn main() -> BlinxResult<()> {
    simple_log::quick!();
    let args = CommandLineArguments::parse();
    let actions = ActionList::load(&args.action_file)?;
    println!("loaded {} steps from {}", actions.len(), args.action_file);

    let session = RobotSession::new(Model::default(), SessionConfig::default())?;
    session.connect(&LinkConfig::new(args.robot_ip, args.port))?;
    session.set_mode(args.mode)?;
    println!("WARNING: This example will move the robot! Please make sure to have the user stop button at hand!");
    println!("Press Enter to continue...");
    std::io::stdin().read_line(&mut String::new())?;

    match session.run_loop(actions.steps(), args.times)? {
        RunOutcome::Completed { steps_sent } => println!("queued {} steps", steps_sent),
        RunOutcome::Stopped { steps_sent } => println!("stopped after {} steps", steps_sent),
    }
    Ok(())
}
