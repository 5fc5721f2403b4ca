// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use clap::Parser;

use blinx::utils::{deg_to_rad, rad_to_deg};
use blinx::{BlinxException, BlinxResult, Frame, JointChain, Model};

/// An example showing how to use the kinematic model offline. It prints the transformation
/// matrix of each joint with respect to the base frame, the flange pose and the joint angles
/// the inverse kinematics finds for that pose.
#[derive(Parser, Debug)]
#[clap(author, version, name = "print_pose")]
struct CommandLineArguments {
    /// Comma separated joint angles in degrees
    #[clap(long, default_value = "0,0,0,0,0,0", allow_hyphen_values = true)]
    pub joints: String,
    /// JSON file with the kinematic chain, the Mirobot chain is used without it
    #[clap(long)]
    pub chain: Option<String>,
}

fn main() -> BlinxResult<()> {
    let args = CommandLineArguments::parse();
    let chain = match args.chain {
        Some(path) => JointChain::load(path)?,
        None => JointChain::mirobot(),
    };
    let model = Model::new(chain);
    let values = args
        .joints
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .ok()
        .filter(|values| values.len() == 6)
        .ok_or_else(|| BlinxException::ConfigException {
            message: format!("expected six comma separated angles, got {}", args.joints),
        })?;
    let mut q_deg = [0.; 6];
    q_deg.copy_from_slice(&values);
    let q = deg_to_rad(&q_deg);
    for frame in Frame::ALL {
        println!("{} {}", frame, model.pose(frame, &q));
    }
    let pose = model.forward(&q);
    println!("pose {:?}", pose.rounded(3));
    let solution = model.inverse(&pose, true)?;
    println!("inverse {:?}", rad_to_deg(&solution));
    Ok(())
}
