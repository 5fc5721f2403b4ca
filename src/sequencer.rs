// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Replays teach sequences.
//!
//! A run turns [`ActionStep`]s into commands on the [`CommandQueue`]. In sequential mode the arm
//! buffers the commands and executes them on its own, delays included. In interactive mode the
//! arm executes every command immediately, so the sequencer waits for the `move_in_place`
//! notification of one move before it sends the next one.
pub mod action;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};

use crate::exception::{create_range_violation, BlinxException, BlinxResult};
use crate::model::Model;
use crate::robot::command_queue::CommandQueue;
use crate::robot::events::SessionEvents;
use crate::robot::service_types::{RobotCommand, RobotMode, ToolType, MAX_DELAY_MS};
use crate::sequencer::action::{check_speed, ActionStep};
use crate::utils::duration_ms;

/// Timing and limits of sequencer runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// how long one wait for `move_in_place` lasts in interactive mode
    #[serde(with = "duration_ms")]
    pub move_wait_poll: Duration,
    /// waits before a move is assumed to be finished
    pub move_wait_polls: u32,
    /// pause between two passes of a loop run
    #[serde(with = "duration_ms")]
    pub loop_pause: Duration,
    /// most steps a sequential run may queue, `None` for no limit
    pub seq_step_cap: Option<usize>,
    /// longest delay the arm accepts
    pub max_delay_ms: u32,
    /// end tool channel of the suction cup
    pub suction_channel: Option<u8>,
    /// end tool channel of the gripper, `None` if it is not wired
    pub gripper_channel: Option<u8>,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        SequencerConfig {
            move_wait_poll: Duration::from_millis(100),
            move_wait_polls: 100,
            loop_pause: Duration::from_secs(1),
            seq_step_cap: Some(400),
            max_delay_ms: MAX_DELAY_MS,
            suction_channel: Some(1),
            gripper_channel: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Running,
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// all steps of all passes were queued
    Completed { steps_sent: usize },
    /// [`Sequencer::stop`] was called, the remaining steps were not queued
    Stopped { steps_sent: usize },
}

/// Executes at most one run at a time.
pub struct Sequencer {
    model: Arc<Model>,
    queue: Arc<CommandQueue>,
    events: Arc<SessionEvents>,
    config: SequencerConfig,
    running: AtomicBool,
    cancel: AtomicBool,
}

struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        log::info!("sequencer idle");
    }
}

impl Sequencer {
    /// Creates an idle sequencer. Steps are checked against the joint limits of `model`.
    pub fn new(
        model: Arc<Model>,
        queue: Arc<CommandQueue>,
        events: Arc<SessionEvents>,
        config: SequencerConfig,
    ) -> Self {
        Sequencer {
            model,
            queue,
            events,
            config,
            running: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    pub fn state(&self) -> SequencerState {
        if self.running.load(Ordering::SeqCst) {
            SequencerState::Running
        } else {
            SequencerState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SequencerState::Running
    }

    /// Ends the current run before its next step. A stopped run cannot be resumed.
    pub fn stop(&self) {
        if self.is_running() {
            log::warn!("stopping sequencer run");
            self.cancel.store(true, Ordering::SeqCst);
        }
    }

    /// Queues the move and the tool command of a single step. Delays are not sent and nothing
    /// waits for the move.
    /// # Errors
    /// * [`SequencerBusy`](`crate::exception::BlinxException::SequencerBusy`) - if a run is active.
    /// * [`RangeViolation`](`crate::exception::BlinxException::RangeViolation`) - if the speed or
    /// a joint angle is out of range.
    pub fn run_step(&self, step: &ActionStep) -> BlinxResult<()> {
        let _guard = self.begin()?;
        self.check_move(step)?;
        self.send_move(step);
        self.send_tool(step);
        Ok(())
    }

    /// Runs all steps once, see [`run_loop`](`Self::run_loop`).
    pub fn run_all(&self, steps: &[ActionStep], mode: RobotMode) -> BlinxResult<RunOutcome> {
        self.run_loop(steps, mode, 1)
    }

    /// Runs all steps `times` times with a pause between the passes. Blocks until every
    /// command is queued and, in interactive mode, until the last wait is over.
    ///
    /// Every step is checked right before it is queued. An invalid step aborts the run; the
    /// steps before it stay queued.
    /// # Errors
    /// * [`SequencerBusy`](`crate::exception::BlinxException::SequencerBusy`) - if a run is active.
    /// * [`RangeViolation`](`crate::exception::BlinxException::RangeViolation`) - if a sequential
    /// run exceeds the step cap or a step has an invalid speed, joint angle or delay.
    pub fn run_loop(
        &self,
        steps: &[ActionStep],
        mode: RobotMode,
        times: usize,
    ) -> BlinxResult<RunOutcome> {
        let _guard = self.begin()?;
        if let (RobotMode::Sequential, Some(cap)) = (mode, self.config.seq_step_cap) {
            let total = times.saturating_mul(steps.len());
            if total > cap {
                return Err(create_range_violation(format!(
                    "{} steps exceed the limit of {} steps in sequential mode",
                    total, cap
                )));
            }
        }
        let in_place = match mode {
            RobotMode::Interactive => Some(self.events.move_in_place.subscribe()),
            RobotMode::Sequential => None,
        };
        let mut steps_sent = 0;
        for pass in 0..times {
            if pass > 0 && !self.pause(self.config.loop_pause) {
                return Ok(self.stopped(steps_sent));
            }
            log::info!("{} run, pass {} of {}", mode, pass + 1, times);
            for (index, step) in steps.iter().enumerate() {
                if self.cancelled() {
                    return Ok(self.stopped(steps_sent));
                }
                log::debug!("step {} of {}", index + 1, steps.len());
                let sent = match &in_place {
                    None => self.send_sequential(step),
                    Some(in_place) => self.send_interactive(step, in_place),
                };
                sent.map_err(|error| {
                    log::error!("step {} aborted the run: {}", index + 1, error);
                    error
                })?;
                steps_sent += 1;
                if let Some(in_place) = &in_place {
                    if index + 1 < steps.len() && !self.wait_in_place(in_place) {
                        return Ok(self.stopped(steps_sent));
                    }
                }
            }
        }
        Ok(RunOutcome::Completed { steps_sent })
    }

    fn begin(&self) -> BlinxResult<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| BlinxException::SequencerBusy)?;
        self.cancel.store(false, Ordering::SeqCst);
        log::info!("sequencer running");
        Ok(RunGuard {
            running: &self.running,
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn stopped(&self, steps_sent: usize) -> RunOutcome {
        log::warn!("run stopped after {} steps", steps_sent);
        RunOutcome::Stopped { steps_sent }
    }

    fn check_move(&self, step: &ActionStep) -> BlinxResult<()> {
        check_speed(step.speed)?;
        self.model.check_limits(&step.joint_angles)
    }

    fn send_sequential(&self, step: &ActionStep) -> BlinxResult<()> {
        self.check_move(step)?;
        let delay = step.delay_ms(self.config.max_delay_ms)?;
        self.send_move(step);
        if let Some(milliseconds) = delay {
            self.queue.enqueue(RobotCommand::SetTimeDelay { milliseconds });
        }
        self.send_tool(step);
        Ok(())
    }

    fn send_interactive(&self, step: &ActionStep, in_place: &Receiver<bool>) -> BlinxResult<()> {
        self.check_move(step)?;
        while in_place.try_recv().is_ok() {}
        self.send_move(step);
        self.send_tool(step);
        Ok(())
    }

    fn send_move(&self, step: &ActionStep) {
        self.queue.enqueue(RobotCommand::SetJointAngleAllTime {
            speed: step.speed,
            angles: step.joint_angles,
        });
    }

    fn send_tool(&self, step: &ActionStep) {
        if let Some(command) = self.tool_command(step) {
            self.queue.enqueue(command);
        }
    }

    fn tool_command(&self, step: &ActionStep) -> Option<RobotCommand> {
        let on = step.tool_switch.state()?;
        let channel = match step.tool_type {
            ToolType::None => return None,
            ToolType::Suction => self.config.suction_channel,
            ToolType::Gripper => self.config.gripper_channel,
        };
        match channel {
            Some(channel) => Some(RobotCommand::SetEndTool { channel, on }),
            None => {
                log::debug!("no channel for {:?}, tool switch skipped", step.tool_type);
                None
            }
        }
    }

    /// Waits for the end of the last move. Gives up after `move_wait_polls` waits and assumes
    /// the move is done. Returns false if the run was stopped meanwhile.
    fn wait_in_place(&self, in_place: &Receiver<bool>) -> bool {
        for _ in 0..self.config.move_wait_polls {
            if self.cancelled() {
                return false;
            }
            match in_place.recv_timeout(self.config.move_wait_poll) {
                Ok(true) | Err(RecvTimeoutError::Disconnected) => return true,
                Ok(false) | Err(RecvTimeoutError::Timeout) => {}
            }
        }
        log::warn!(
            "no move_in_place after {} waits, assuming the move is done",
            self.config.move_wait_polls
        );
        !self.cancelled()
    }

    fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let slice = self.config.move_wait_poll.max(Duration::from_millis(1));
        loop {
            if self.cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}
