// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! The dispatcher thread.
//!
//! The controller protocol has no request ids, so replies can only be matched to commands by
//! their order on the single connection. The dispatcher is therefore the only code which sends
//! or receives: it takes one command from the [`CommandQueue`], sends it, reads until the reply
//! arrives and routes every received frame to the typed channels of [`SessionEvents`].
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exception::{BlinxException, BlinxResult};
use crate::network::{Connection, RobotLink};
use crate::robot::codec::{encode, parse_frame, FrameDecoder, DEFAULT_MAX_BUFFER};
use crate::robot::command_queue::CommandQueue;
use crate::robot::events::{
    value_as_bool, value_as_f64, ConnectionStatus, MoveEstimate, SessionEvents,
};
use crate::robot::logger::{Logger, Outcome, Record};
use crate::robot::service_types::{Command, RobotCommand, RobotMode, Response, MOVE_IN_PLACE};
use crate::robot::telemetry::TelemetryTranslator;
use crate::utils::{duration_ms, option_duration_ms};

/// Timing of the dispatcher loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// how long the loop waits for a command before it checks for unsolicited frames
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// period of the joint angle query, `None` disables telemetry polling
    #[serde(with = "option_duration_ms")]
    pub telemetry_interval: Option<Duration>,
    /// number of dispatched commands kept in the command log
    pub log_size: usize,
    /// bytes buffered without a frame terminator before they are dropped
    pub max_frame_buffer: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            poll_interval: Duration::from_millis(100),
            telemetry_interval: Some(Duration::from_millis(500)),
            log_size: 100,
            max_frame_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

/// State shared by the dispatcher thread and the session.
pub(crate) struct DispatchContext {
    pub link: Arc<RobotLink>,
    pub queue: Arc<CommandQueue>,
    pub events: Arc<SessionEvents>,
    pub translator: TelemetryTranslator,
    pub logger: Mutex<Logger>,
    /// last execution mode set by the operator or reported by the arm
    pub mode: RwLock<RobotMode>,
}

impl DispatchContext {
    pub fn mode(&self) -> RobotMode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_mode(&self, mode: RobotMode) {
        *self.mode.write().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    fn log(&self, record: Record) {
        self.logger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .log(record);
    }

    /// Delivers one received frame to the channel of its kind.
    pub fn route(&self, response: Response) {
        match response.kind.as_str() {
            "get_joint_angle_all" => {
                if let Err(e) = self.translator.handle(&response.data, &self.events) {
                    log::warn!("dropping telemetry sample: {}", e);
                }
            }
            "set_joint_angle_all_time" => match move_estimate(&response.data) {
                Some(estimate) => {
                    if estimate == MoveEstimate::Unreachable {
                        log::warn!("target of the move is unreachable");
                    }
                    self.events.move_estimate.publish(estimate);
                }
                None => self.events.replies.publish(response),
            },
            "move_in_place" => match value_as_bool(&response.data) {
                Some(in_place) => self.events.move_in_place.publish(in_place),
                None => log::warn!("unexpected move_in_place payload {}", response.data),
            },
            "set_robot_mode" | "get_robot_mode" => match robot_mode(&response.data) {
                Some(mode) => {
                    self.set_mode(mode);
                    self.events.robot_mode.publish(mode);
                }
                None => self.events.replies.publish(response),
            },
            _ => self.events.replies.publish(response),
        }
    }
}

fn move_estimate(data: &Value) -> Option<MoveEstimate> {
    if value_as_bool(data) == Some(false) {
        return Some(MoveEstimate::Unreachable);
    }
    value_as_f64(data).map(MoveEstimate::Duration)
}

fn robot_mode(data: &Value) -> Option<RobotMode> {
    let text = match data {
        Value::String(text) => text.as_str(),
        Value::Array(values) => values.first()?.as_str()?,
        _ => return None,
    };
    text.parse().ok()
}

/// Frame buffer of the current connection. Bytes left over from a previous connection are
/// dropped before the first chunk of a new one is decoded.
struct StreamDecoder {
    decoder: FrameDecoder,
    connection: Option<u64>,
}

impl StreamDecoder {
    fn new(max_buffer: usize) -> Self {
        StreamDecoder {
            decoder: FrameDecoder::new(max_buffer),
            connection: None,
        }
    }

    /// Decodes a chunk read from the connection `connection_id` into parsed frames.
    fn decode(&mut self, connection_id: u64, chunk: &[u8]) -> Vec<Response> {
        if self.connection != Some(connection_id) {
            if !self.decoder.remainder().is_empty() {
                log::debug!(
                    "dropping {} bytes buffered from the previous connection",
                    self.decoder.remainder().len()
                );
            }
            self.decoder.clear();
            self.connection = Some(connection_id);
        }
        self.decoder
            .decode(chunk)
            .iter()
            .filter_map(|frame| match parse_frame(frame) {
                Ok(response) => Some(response),
                Err(e) => {
                    log::warn!("{}", e);
                    None
                }
            })
            .collect()
    }

    fn clear(&mut self) {
        self.decoder.clear();
        self.connection = None;
    }
}

/// Sends `bytes` and reads until a frame other than `move_in_place` arrived. Returns every frame
/// received on the way, in order.
fn exchange(
    connection: &mut Connection,
    decoder: &mut StreamDecoder,
    bytes: &[u8],
) -> BlinxResult<Vec<Response>> {
    connection.send(bytes)?;
    let mut responses = Vec::new();
    loop {
        let chunk = connection.recv()?;
        responses.extend(decoder.decode(connection.id(), &chunk));
        if responses.iter().any(|r| r.kind != MOVE_IN_PLACE) {
            return Ok(responses);
        }
    }
}

pub(crate) struct DispatchLoop {
    context: Arc<DispatchContext>,
    config: DispatcherConfig,
    decoder: StreamDecoder,
    last_query: Option<Instant>,
}

impl DispatchLoop {
    pub fn new(context: Arc<DispatchContext>, config: DispatcherConfig) -> Self {
        let decoder = StreamDecoder::new(config.max_frame_buffer);
        DispatchLoop {
            context,
            config,
            decoder,
            last_query: None,
        }
    }

    /// One cycle: dispatch the next command or, if none arrives within the poll interval, read
    /// frames the arm sent on its own.
    pub fn run_once(&mut self) {
        self.schedule_telemetry();
        match self.context.queue.pop_timeout(self.config.poll_interval) {
            Some(command) => self.dispatch(command),
            None => self.drain_unsolicited(),
        }
    }

    fn schedule_telemetry(&mut self) {
        let interval = match self.config.telemetry_interval {
            Some(interval) => interval,
            None => return,
        };
        if !self.context.link.is_connected() {
            return;
        }
        let due = self.last_query.map_or(true, |last| last.elapsed() >= interval);
        if due
            && !self
                .context
                .queue
                .contains(|c| c.command == RobotCommand::GetJointAngleAll)
        {
            self.context
                .queue
                .enqueue(Command::new(RobotCommand::GetJointAngleAll));
            self.last_query = Some(Instant::now());
        }
    }

    fn dispatch(&mut self, command: Command) {
        let bytes = match encode(&command.command) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("{}", e);
                self.record(command, Outcome::Failed(e.to_string()));
                return;
            }
        };
        log::debug!(
            "sending {}",
            String::from_utf8_lossy(&bytes).trim_end()
        );
        let decoder = &mut self.decoder;
        let result = self
            .context
            .link
            .with_connection(|connection| exchange(connection, decoder, &bytes));
        match result {
            Ok(responses) => {
                let reply = responses.iter().find(|r| r.kind != MOVE_IN_PLACE).cloned();
                let raw = matches!(command.command, RobotCommand::Raw(_));
                for response in responses {
                    self.context.route(response);
                }
                if let Some(reply) = reply {
                    if raw && !is_generic(&reply) {
                        self.context.events.replies.publish(reply.clone());
                    }
                    self.record(command, Outcome::Reply(reply));
                }
            }
            Err(e) => self.fail(command, e),
        }
    }

    fn drain_unsolicited(&mut self) {
        if !self.context.link.is_connected() {
            return;
        }
        let decoder = &mut self.decoder;
        let result = self.context.link.with_connection(|connection| {
            let chunk = connection.try_recv(Duration::from_millis(0))?;
            Ok(chunk.map(|chunk| decoder.decode(connection.id(), &chunk)))
        });
        match result {
            Ok(Some(responses)) => {
                for response in responses {
                    self.context.route(response);
                }
            }
            Ok(None) | Err(BlinxException::NotConnected) => {}
            Err(e) => self.connection_lost(&e),
        }
    }

    fn fail(&mut self, command: Command, error: BlinxException) {
        match &error {
            BlinxException::NotConnected => {
                log::warn!("dropping {}: not connected", command.command.name())
            }
            _ => {
                log::error!("dropping {}: {}", command.command.name(), error);
                self.connection_lost(&error);
            }
        }
        self.record(command, Outcome::Failed(error.to_string()));
    }

    fn connection_lost(&mut self, error: &BlinxException) {
        log::error!("connection lost: {}", error);
        self.context.link.disconnect();
        self.decoder.clear();
        self.context
            .events
            .connection
            .publish(ConnectionStatus::Disconnected);
    }

    fn record(&self, command: Command, outcome: Outcome) {
        self.context.log(Record {
            command: command.command,
            priority: command.priority,
            outcome,
        });
    }
}

/// true for replies that are routed to the generic reply channel anyway
fn is_generic(response: &Response) -> bool {
    !matches!(
        response.kind.as_str(),
        "get_joint_angle_all"
            | "set_joint_angle_all_time"
            | "move_in_place"
            | "set_robot_mode"
            | "get_robot_mode"
    )
}

/// Handle of the running dispatcher thread. Dropping it stops the thread.
pub struct Dispatcher {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub(crate) fn spawn(
        context: Arc<DispatchContext>,
        config: DispatcherConfig,
    ) -> BlinxResult<Dispatcher> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let mut dispatch_loop = DispatchLoop::new(context, config);
        let handle = thread::Builder::new()
            .name("blinx-dispatcher".to_string())
            .spawn(move || {
                log::debug!("dispatcher started");
                while flag.load(Ordering::Acquire) {
                    dispatch_loop.run_once();
                }
                log::debug!("dispatcher stopped");
            })
            .map_err(|e| BlinxException::NetworkException {
                message: format!("cannot start dispatcher thread: {}", e),
            })?;
        Ok(Dispatcher {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the thread after its current cycle and waits for it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("dispatcher thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
