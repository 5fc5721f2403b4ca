// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the [`RobotSession`] type.
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exception::{create_range_violation, BlinxException, BlinxResult};
use crate::model::{Model, Pose};
use crate::network::{LinkConfig, RobotLink};
use crate::robot::command_queue::CommandQueue;
use crate::robot::dispatcher::{DispatchContext, Dispatcher, DispatcherConfig};
use crate::robot::events::{ConnectionStatus, SessionEvents, TelemetrySample};
use crate::robot::logger::{Logger, Record};
use crate::robot::service_types::{Command, Priority, RobotCommand, RobotMode};
use crate::robot::telemetry::{TelemetrySnapshot, TelemetryTranslator, TELEMETRY_DECIMALS};
use crate::sequencer::action::{check_speed, ActionList, ActionStep};
use crate::sequencer::{RunOutcome, Sequencer, SequencerConfig};
use crate::utils::{rad_to_deg, round_all, JointAngles};

/// Speed of the return to the zero position.
static RESET_SPEED: f64 = 100.;

/// Configuration of the background parts of a session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub dispatcher: DispatcherConfig,
    pub sequencer: SequencerConfig,
}

/// Cartesian coordinate changed by a jog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CartesianAxis {
    X,
    Y,
    Z,
    Rx,
    Ry,
    Rz,
}

impl CartesianAxis {
    fn index(self) -> usize {
        match self {
            CartesianAxis::X => 0,
            CartesianAxis::Y => 1,
            CartesianAxis::Z => 2,
            CartesianAxis::Rx => 3,
            CartesianAxis::Ry => 4,
            CartesianAxis::Rz => 5,
        }
    }
}

impl fmt::Display for CartesianAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CartesianAxis::X => "X",
            CartesianAxis::Y => "Y",
            CartesianAxis::Z => "Z",
            CartesianAxis::Rx => "Rx",
            CartesianAxis::Ry => "Ry",
            CartesianAxis::Rz => "Rz",
        };
        write!(f, "{}", name)
    }
}

/// Maintains a connection to a robot arm and offers its operations.
///
/// Every operation only queues commands, the dispatcher thread of the session sends them in
/// priority order. Operations check their preconditions first and queue nothing if one fails:
/// * [`NotConnected`](`crate::exception::BlinxException::NotConnected`) without an open
/// connection,
/// * [`SequencerBusy`](`crate::exception::BlinxException::SequencerBusy`) for moves while an
/// action sequence runs,
/// * [`RangeViolation`](`crate::exception::BlinxException::RangeViolation`) for speeds outside
/// (0, 100] and joint angles outside their limits.
///
/// The session is `Sync`; share it with an `Arc` to run a sequence on one thread while another
/// one can still stop it.
pub struct RobotSession {
    context: Arc<DispatchContext>,
    dispatcher: Dispatcher,
    model: Arc<Model>,
    snapshot: Arc<TelemetrySnapshot>,
    sequencer: Arc<Sequencer>,
}

impl RobotSession {
    /// Starts the dispatcher thread of a disconnected session.
    /// # Arguments
    /// * `model` - kinematic model of the arm, used for telemetry and Cartesian moves.
    /// * `config` - timing of dispatcher and sequencer.
    pub fn new(model: Model, config: SessionConfig) -> BlinxResult<RobotSession> {
        let model = Arc::new(model);
        let snapshot = Arc::new(TelemetrySnapshot::default());
        let queue = Arc::new(CommandQueue::new());
        let events = Arc::new(SessionEvents::default());
        let context = Arc::new(DispatchContext {
            link: Arc::new(RobotLink::new()),
            queue: queue.clone(),
            events: events.clone(),
            translator: TelemetryTranslator::new(model.clone(), snapshot.clone()),
            logger: Mutex::new(Logger::new(config.dispatcher.log_size)),
            mode: RwLock::new(RobotMode::Sequential),
        });
        let dispatcher = Dispatcher::spawn(context.clone(), config.dispatcher)?;
        let sequencer = Arc::new(Sequencer::new(
            model.clone(),
            queue,
            events,
            config.sequencer,
        ));
        Ok(RobotSession {
            context,
            dispatcher,
            model,
            snapshot,
            sequencer,
        })
    }

    /// Opens the connection, closing an open one first, and asks the arm for its mode.
    /// # Errors
    /// * [`ConnectException`](`crate::exception::BlinxException::ConnectException`) - if the arm
    /// could not be reached after all attempts.
    pub fn connect(&self, config: &LinkConfig) -> BlinxResult<()> {
        self.snapshot.reset();
        if let Err(error) = self.context.link.connect(config) {
            log::error!("{}", error);
            self.context
                .events
                .connection
                .publish(ConnectionStatus::Disconnected);
            return Err(error);
        }
        log::info!("connected to {}:{}", config.host, config.port);
        self.context
            .events
            .connection
            .publish(ConnectionStatus::Connected);
        self.context.queue.enqueue(RobotCommand::GetRobotMode);
        Ok(())
    }

    /// Stops a running sequence, drops queued commands and closes the connection.
    pub fn disconnect(&self) {
        self.sequencer.stop();
        let dropped = self.context.queue.clear();
        if dropped > 0 {
            log::info!("dropped {} queued commands", dropped);
        }
        self.context.link.disconnect();
        self.snapshot.reset();
        self.context
            .events
            .connection
            .publish(ConnectionStatus::Disconnected);
        log::info!("disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.context.link.is_connected()
    }

    /// Subscription point for telemetry, move, mode, reply and connection events.
    pub fn events(&self) -> &SessionEvents {
        &self.context.events
    }

    /// The latest joint angles and pose, `None` while disconnected and until the first sample
    /// after connecting.
    pub fn telemetry(&self) -> Option<TelemetrySample> {
        if self.is_connected() {
            self.snapshot.load()
        } else {
            None
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Dispatched commands with their replies, oldest first.
    pub fn command_log(&self) -> Vec<Record> {
        self.context
            .logger
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .records()
    }

    /// Returns the command log and empties it.
    pub fn take_command_log(&self) -> Vec<Record> {
        self.context
            .logger
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .flush()
    }

    /// Execution mode used for sequence runs.
    pub fn mode(&self) -> RobotMode {
        self.context.mode()
    }

    /// Moves one joint relative to its current angle.
    /// # Arguments
    /// * `joint` - 1 to 6
    /// * `step` - degrees
    /// * `increase` - direction of the move
    /// * `speed` - percent
    /// # Return
    /// The commanded angle in degrees.
    /// # Errors
    /// * [`NoTelemetry`](`crate::exception::BlinxException::NoTelemetry`) - before the current
    /// angles are known.
    pub fn jog_joint(&self, joint: usize, step: f64, increase: bool, speed: f64) -> BlinxResult<f64> {
        self.ensure_idle()?;
        check_speed(speed)?;
        let spec = joint
            .checked_sub(1)
            .and_then(|index| self.model.chain().joints().get(index))
            .ok_or_else(|| create_range_violation(format!("there is no joint {}", joint)))?;
        let current = self.current()?.joint_angles[joint - 1];
        let angle = if increase { current + step } else { current - step };
        if !spec.within_limit(angle) {
            return Err(create_range_violation(format!(
                "joint {} angle {} outside [{}, {}]",
                joint, angle, spec.limit.0, spec.limit.1
            )));
        }
        log::debug!("jogging joint {} to {}", joint, angle);
        self.context.queue.enqueue(RobotCommand::SetJointAngle {
            joint: joint as u8,
            speed,
            angle,
        });
        Ok(angle)
    }

    /// Moves the flange along or around one axis of the base frame.
    /// # Arguments
    /// * `step` - millimeters for X, Y, Z and degrees for Rx, Ry, Rz
    /// # Return
    /// The commanded joint angles in degrees.
    /// # Errors
    /// * [`NoSolution`](`crate::exception::BlinxException::NoSolution`) - if the target is not
    /// reachable within the joint limits.
    pub fn jog_cartesian(
        &self,
        axis: CartesianAxis,
        step: f64,
        increase: bool,
        speed: f64,
    ) -> BlinxResult<JointAngles> {
        self.ensure_idle()?;
        check_speed(speed)?;
        let mut target = self.current()?.pose.to_array();
        target[axis.index()] += if increase { step } else { -step };
        log::debug!("jogging {} by {}", axis, if increase { step } else { -step });
        self.send_pose(&Pose::from_array(target), speed)
    }

    /// Moves the flange to `pose`.
    /// # Errors
    /// * [`NoSolution`](`crate::exception::BlinxException::NoSolution`) - if the pose is not
    /// reachable within the joint limits.
    pub fn move_to_pose(&self, pose: &Pose, speed: f64) -> BlinxResult<JointAngles> {
        self.ensure_idle()?;
        check_speed(speed)?;
        self.send_pose(pose, speed)
    }

    /// Moves all joints to `angles` (degrees).
    pub fn move_joints(&self, angles: &JointAngles, speed: f64) -> BlinxResult<()> {
        self.ensure_idle()?;
        check_speed(speed)?;
        self.model.check_limits(angles)?;
        self.context.queue.enqueue(RobotCommand::SetJointAngleAllTime {
            speed,
            angles: *angles,
        });
        Ok(())
    }

    /// Moves all joints to zero at full speed.
    pub fn reset_to_zero(&self) -> BlinxResult<()> {
        self.ensure_idle()?;
        self.context.queue.enqueue(RobotCommand::SetJointAngleAll {
            speed: RESET_SPEED,
            angles: [0.; 6],
        });
        Ok(())
    }

    /// Homes the arm.
    pub fn initialize(&self) -> BlinxResult<()> {
        self.ensure_idle()?;
        self.context.queue.enqueue(RobotCommand::SetJointInitialize);
        Ok(())
    }

    pub fn auto_zero(&self) -> BlinxResult<()> {
        self.ensure_idle()?;
        self.context.queue.enqueue(RobotCommand::SetJointAutoZero);
        Ok(())
    }

    /// Switches the suction cup.
    /// # Errors
    /// * [`ConfigException`](`crate::exception::BlinxException::ConfigException`) - if no
    /// suction channel is configured.
    pub fn set_tool(&self, on: bool) -> BlinxResult<()> {
        self.ensure_connected()?;
        let channel = self.sequencer.config().suction_channel.ok_or_else(|| {
            BlinxException::ConfigException {
                message: "no suction channel configured".to_string(),
            }
        })?;
        self.context
            .queue
            .enqueue(RobotCommand::SetEndTool { channel, on });
        Ok(())
    }

    /// Switches a digital output of the arm.
    pub fn set_io(&self, channel: u8, on: bool) -> BlinxResult<()> {
        self.ensure_connected()?;
        self.context
            .queue
            .enqueue(RobotCommand::SetRobotIoInterface { channel, on });
        Ok(())
    }

    /// Sets the execution mode of the arm and of later sequence runs.
    pub fn set_mode(&self, mode: RobotMode) -> BlinxResult<()> {
        self.ensure_idle()?;
        self.context.set_mode(mode);
        self.context
            .queue
            .enqueue(Command::with_priority(RobotCommand::SetRobotMode(mode), Priority::System));
        log::info!("execution mode {}", mode);
        Ok(())
    }

    /// Asks the arm for its mode. The answer arrives on the robot mode channel.
    pub fn query_mode(&self) -> BlinxResult<()> {
        self.ensure_connected()?;
        self.context.queue.enqueue(RobotCommand::GetRobotMode);
        Ok(())
    }

    /// Sends a command object typed by the operator. The reply arrives on the reply channel.
    /// # Errors
    /// * [`DecodeException`](`crate::exception::BlinxException::DecodeException`) - if `json`
    /// is not an object with a string `command` field.
    pub fn send_raw(&self, json: &str) -> BlinxResult<()> {
        self.ensure_connected()?;
        let value: Value =
            serde_json::from_str(json).map_err(|e| BlinxException::DecodeException {
                message: format!("{}: {}", json.trim(), e),
            })?;
        if !value.get("command").map_or(false, Value::is_string) {
            return Err(BlinxException::DecodeException {
                message: format!("{} has no command field", json.trim()),
            });
        }
        self.context.queue.enqueue(RobotCommand::Raw(value));
        Ok(())
    }

    /// Stops the arm: ends a running sequence, drops every queued command and sends the stop
    /// command ahead of everything else.
    pub fn emergency_stop(&self) -> BlinxResult<()> {
        self.sequencer.stop();
        let dropped = self.context.queue.clear();
        log::warn!("emergency stop, dropped {} queued commands", dropped);
        self.ensure_connected()?;
        self.context
            .queue
            .enqueue(RobotCommand::SetJointEmergencyStop);
        Ok(())
    }

    /// Runs all steps once in the current mode. Blocks until the run is over.
    pub fn run_all(&self, steps: &[ActionStep]) -> BlinxResult<RunOutcome> {
        self.ensure_connected()?;
        self.sequencer.run_all(steps, self.mode())
    }

    /// Runs all steps `times` times in the current mode. Blocks until the run is over.
    pub fn run_loop(&self, steps: &[ActionStep], times: usize) -> BlinxResult<RunOutcome> {
        self.ensure_connected()?;
        self.sequencer.run_loop(steps, self.mode(), times)
    }

    /// Sends one step without its delay.
    pub fn run_step(&self, step: &ActionStep) -> BlinxResult<()> {
        self.ensure_connected()?;
        self.sequencer.run_step(step)
    }

    /// Appends the current joint angles to `list`.
    pub fn record_current<'a>(
        &self,
        list: &'a mut ActionList,
        speed: f64,
    ) -> BlinxResult<&'a mut ActionStep> {
        check_speed(speed)?;
        let sample = self.current()?;
        Ok(list.record_current(&sample, speed))
    }

    fn send_pose(&self, pose: &Pose, speed: f64) -> BlinxResult<JointAngles> {
        let solution = self.model.inverse(pose, true).map_err(|error| {
            log::warn!("{}", error);
            error
        })?;
        let angles = round_all(&rad_to_deg(&solution), TELEMETRY_DECIMALS);
        self.context
            .queue
            .enqueue(RobotCommand::SetJointAngleAllTime { speed, angles });
        Ok(angles)
    }

    fn current(&self) -> BlinxResult<TelemetrySample> {
        self.telemetry().ok_or(BlinxException::NoTelemetry)
    }

    fn ensure_connected(&self) -> BlinxResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BlinxException::NotConnected)
        }
    }

    fn ensure_idle(&self) -> BlinxResult<()> {
        self.ensure_connected()?;
        if self.sequencer.is_running() {
            Err(BlinxException::SequencerBusy)
        } else {
            Ok(())
        }
    }
}

impl Drop for RobotSession {
    fn drop(&mut self) {
        self.sequencer.stop();
        self.dispatcher.stop();
        self.context.link.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use serde_json::{json, Value};

    use crate::exception::BlinxException;
    use crate::model::{Model, Pose};
    use crate::robot::dispatcher::DispatcherConfig;
    use crate::robot::events::ConnectionStatus;
    use crate::robot::service_types::{RobotMode, Response};
    use crate::robot::session::{CartesianAxis, RobotSession, SessionConfig};
    use crate::robot::tests::{wait_for, DeviceMock};
    use crate::sequencer::action::{ActionList, ActionStep};
    use crate::sequencer::{RunOutcome, SequencerConfig};
    use crate::utils::deg_to_rad;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn session() -> RobotSession {
        RobotSession::new(
            Model::default(),
            SessionConfig {
                dispatcher: DispatcherConfig {
                    poll_interval: Duration::from_millis(10),
                    telemetry_interval: Some(Duration::from_millis(50)),
                    ..DispatcherConfig::default()
                },
                sequencer: SequencerConfig {
                    move_wait_poll: Duration::from_millis(10),
                    move_wait_polls: 1000,
                    loop_pause: Duration::from_millis(10),
                    ..SequencerConfig::default()
                },
            },
        )
        .unwrap()
    }

    fn connected() -> (RobotSession, DeviceMock) {
        let device = DeviceMock::spawn(DeviceMock::standard());
        let session = session();
        let telemetry = session.events().telemetry.subscribe();
        let mode = session.events().robot_mode.subscribe();
        session.connect(&device.link_config()).unwrap();
        telemetry.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(mode.recv_timeout(TIMEOUT).unwrap(), RobotMode::Sequential);
        (session, device)
    }

    fn commands_named(device: &DeviceMock, name: &str) -> Vec<Value> {
        device
            .received()
            .into_iter()
            .filter(|c| c["command"] == name)
            .collect()
    }

    #[test]
    fn operations_need_a_connection() {
        let session = session();
        assert!(!session.is_connected());
        assert!(matches!(
            session.jog_joint(1, 5., true, 50.),
            Err(BlinxException::NotConnected)
        ));
        assert!(matches!(
            session.send_raw(r#"{"command":"get_robot_mode"}"#),
            Err(BlinxException::NotConnected)
        ));
        assert!(matches!(
            session.emergency_stop(),
            Err(BlinxException::NotConnected)
        ));
        assert!(matches!(
            session.run_all(&[ActionStep::new([0.; 6], 50.)]),
            Err(BlinxException::NotConnected)
        ));
        assert!(session.telemetry().is_none());
    }

    #[test]
    fn telemetry_of_zero_angles_is_the_home_pose() {
        let device = DeviceMock::spawn(DeviceMock::standard());
        let session = session();
        let connection = session.events().connection.subscribe();
        let telemetry = session.events().telemetry.subscribe();
        let angles = session.events().joint_angles.subscribe();
        let mode = session.events().robot_mode.subscribe();
        session.connect(&device.link_config()).unwrap();
        assert!(session.is_connected());
        assert_eq!(
            connection.recv_timeout(TIMEOUT).unwrap(),
            ConnectionStatus::Connected
        );

        assert_eq!(angles.recv_timeout(TIMEOUT).unwrap(), [0.; 6]);
        let sample = telemetry.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(sample.pose, Pose::new(198.67, 0., 230.2, 0., 0., 0.));
        assert_eq!(session.telemetry(), Some(sample));
        assert_eq!(mode.recv_timeout(TIMEOUT).unwrap(), RobotMode::Sequential);

        session.disconnect();
        assert!(!session.is_connected());
        assert!(session.telemetry().is_none());
        assert_eq!(
            connection.recv_timeout(TIMEOUT).unwrap(),
            ConnectionStatus::Disconnected
        );
    }

    #[test]
    fn jog_joint_checks_limits() {
        let (session, device) = connected();
        assert_eq!(session.jog_joint(1, 10., true, 50.).unwrap(), 10.);
        assert_eq!(session.jog_joint(5, 30., false, 20.).unwrap(), -30.);
        assert!(matches!(
            session.jog_joint(1, 150., true, 50.),
            Err(BlinxException::RangeViolation { .. })
        ));
        assert!(matches!(
            session.jog_joint(7, 1., true, 50.),
            Err(BlinxException::RangeViolation { .. })
        ));
        assert!(matches!(
            session.jog_joint(0, 1., true, 50.),
            Err(BlinxException::RangeViolation { .. })
        ));
        assert!(matches!(
            session.jog_joint(2, 1., true, 0.),
            Err(BlinxException::RangeViolation { .. })
        ));
        wait_for(|| commands_named(&device, "set_joint_angle").len() == 2);
        let sent = commands_named(&device, "set_joint_angle");
        assert_eq!(sent[0]["data"], json!([1, 50.0, 10.0]));
        assert_eq!(sent[1]["data"], json!([5, 20.0, -30.0]));
    }

    #[test]
    fn jog_cartesian_solves_the_target() {
        let (session, device) = connected();
        let angles = session
            .jog_cartesian(CartesianAxis::Z, 10., false, 40.)
            .unwrap();
        let pose = session.model().forward(&deg_to_rad(&angles));
        assert!((pose.x - 198.67).abs() < 0.05);
        assert!(pose.y.abs() < 0.05);
        assert!((pose.z - 220.2).abs() < 0.05);

        assert!(matches!(
            session.move_to_pose(&Pose::new(2000., 0., 0., 0., 0., 0.), 40.),
            Err(BlinxException::NoSolution { .. })
        ));
        assert!(matches!(
            session.move_joints(&[0., 0., 0., 0., 20., 0.], 40.),
            Err(BlinxException::RangeViolation { .. })
        ));
        wait_for(|| !commands_named(&device, "set_joint_angle_all_time").is_empty());
        let sent = commands_named(&device, "set_joint_angle_all_time");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["data"].as_array().unwrap().len(), 7);
        assert_eq!(sent[0]["data"][0], json!(40.0));
    }

    #[test]
    fn system_commands_and_mode() {
        let (session, device) = connected();
        let mode = session.events().robot_mode.subscribe();
        session.set_mode(RobotMode::Interactive).unwrap();
        assert_eq!(session.mode(), RobotMode::Interactive);
        assert_eq!(mode.recv_timeout(TIMEOUT).unwrap(), RobotMode::Interactive);
        session.reset_to_zero().unwrap();
        session.initialize().unwrap();
        session.auto_zero().unwrap();
        session.set_tool(true).unwrap();
        session.set_io(2, false).unwrap();
        wait_for(|| !commands_named(&device, "set_robot_io_interface").is_empty());
        assert_eq!(
            commands_named(&device, "set_joint_angle_all")[0]["data"],
            json!([100.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
        );
        assert_eq!(
            commands_named(&device, "set_joint_initialize")[0]["data"],
            json!([0])
        );
        assert_eq!(commands_named(&device, "set_joint_Auto_zero").len(), 1);
        assert_eq!(commands_named(&device, "set_end_tool")[0]["data"], json!([1, 1]));
        assert_eq!(
            commands_named(&device, "set_robot_io_interface")[0]["data"],
            json!([2, 0])
        );
        assert!(session
            .command_log()
            .iter()
            .any(|record| record.command.name() == "set_joint_Auto_zero"));
        let taken = session.take_command_log();
        assert!(taken
            .iter()
            .any(|record| record.command.name() == "set_joint_Auto_zero"));
        assert!(session
            .command_log()
            .iter()
            .all(|record| record.command.name() != "set_joint_Auto_zero"));
    }

    #[test]
    fn raw_commands() {
        let (session, device) = connected();
        let replies = session.events().replies.subscribe();
        assert!(matches!(
            session.send_raw("{not json"),
            Err(BlinxException::DecodeException { .. })
        ));
        assert!(matches!(
            session.send_raw(r#"{"data": [1]}"#),
            Err(BlinxException::DecodeException { .. })
        ));
        session
            .send_raw(r#"{ "command": "set_robot_io_interface", "data": [3, 1] }"#)
            .unwrap();
        let reply: Response = replies.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(reply.kind, "set_robot_io_interface");
        assert_eq!(
            commands_named(&device, "set_robot_io_interface")[0]["data"],
            json!([3, 1])
        );
    }

    #[test]
    fn emergency_stop_ends_a_running_sequence() {
        let (session, device) = connected();
        let session = Arc::new(session);
        session.set_mode(RobotMode::Interactive).unwrap();
        let steps = vec![
            ActionStep::new([10., 0., 0., 0., 0., 0.], 50.),
            ActionStep::new([20., 0., 0., 0., 0., 0.], 50.),
        ];
        let run = {
            let session = session.clone();
            thread::spawn(move || session.run_all(&steps))
        };
        wait_for(|| session.sequencer().is_running());
        wait_for(|| !commands_named(&device, "set_joint_angle_all_time").is_empty());
        assert!(matches!(
            session.jog_joint(1, 1., true, 50.),
            Err(BlinxException::SequencerBusy)
        ));
        session.emergency_stop().unwrap();
        assert_eq!(
            run.join().unwrap().unwrap(),
            RunOutcome::Stopped { steps_sent: 1 }
        );
        wait_for(|| !commands_named(&device, "set_joint_emergency_stop").is_empty());
        assert_eq!(commands_named(&device, "set_joint_angle_all_time").len(), 1);
    }

    #[test]
    fn records_the_current_position() {
        let (session, _device) = connected();
        let mut list = ActionList::new();
        session.record_current(&mut list, 30.).unwrap();
        assert_eq!(list.steps(), &[ActionStep::new([0.; 6], 30.)]);
        assert!(session.record_current(&mut list, 130.).is_err());
    }
}
