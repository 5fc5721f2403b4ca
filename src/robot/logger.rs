// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the command log of a session.
use std::collections::VecDeque;

use crate::robot::service_types::{Priority, RobotCommand, Response};

/// How a dispatched command ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// the controller answered with this frame
    Reply(Response),
    /// sending or receiving failed, the command was dropped
    Failed(String),
}

/// One row of the log: a command that was sent to the arm and its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub command: RobotCommand,
    pub priority: Priority,
    pub outcome: Outcome,
}

impl Record {
    /// creates a string representation based on the debug formatter
    pub fn log(&self) -> String {
        format!("{:?}", self)
    }
}

/// Ring buffer keeping the last `log_size` records.
pub(crate) struct Logger {
    records: VecDeque<Record>,
    log_size: usize,
}

impl Logger {
    pub fn new(log_size: usize) -> Self {
        Logger {
            records: VecDeque::with_capacity(log_size),
            log_size,
        }
    }

    pub fn log(&mut self, record: Record) {
        if self.log_size == 0 {
            return;
        }
        if self.records.len() == self.log_size {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// oldest record first
    pub fn records(&self) -> Vec<Record> {
        self.records.iter().cloned().collect()
    }

    pub fn flush(&mut self) -> Vec<Record> {
        self.records.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::robot::logger::{Logger, Outcome, Record};
    use crate::robot::service_types::{Priority, RobotCommand};

    fn record(milliseconds: u32) -> Record {
        Record {
            command: RobotCommand::SetTimeDelay { milliseconds },
            priority: Priority::Motion,
            outcome: Outcome::Failed("timeout".to_string()),
        }
    }

    #[test]
    fn keeps_the_newest_records() {
        let mut logger = Logger::new(2);
        logger.log(record(1));
        logger.log(record(2));
        logger.log(record(3));
        assert_eq!(logger.records(), vec![record(2), record(3)]);
        assert_eq!(logger.flush().len(), 2);
        assert!(logger.records().is_empty());
    }

    #[test]
    fn zero_sized_log_stays_empty() {
        let mut logger = Logger::new(0);
        logger.log(record(1));
        assert!(logger.records().is_empty());
        assert!(record(1).log().contains("SetTimeDelay"));
    }
}
