// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Thread safe priority queue of outgoing commands.
//!
//! Commands leave the queue ordered by `(priority, arrival)`. The queue is unbounded: a producer
//! that is faster than the device makes it grow without limit.
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::robot::service_types::{Command, Priority};

struct Entry {
    priority: Priority,
    sequence: u64,
    command: Command,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap pops the greatest entry, so the lowest (priority, sequence) has to compare
    // greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Entry>,
    next_sequence: u64,
}

/// Multi-producer single-consumer priority queue.
#[derive(Default)]
pub struct CommandQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl CommandQueue {
    pub fn new() -> Self {
        CommandQueue::default()
    }

    /// Adds `command`. Never blocks.
    pub fn enqueue<C: Into<Command>>(&self, command: C) {
        let command = command.into();
        let mut state = self.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        log::trace!(
            "queued {} with priority {:?}",
            command.command.name(),
            command.priority
        );
        state.heap.push(Entry {
            priority: command.priority,
            sequence,
            command,
        });
        self.available.notify_one();
    }

    /// Removes the next command without waiting.
    pub fn pop(&self) -> Option<Command> {
        self.lock().heap.pop().map(|entry| entry.command)
    }

    /// Removes the next command, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Command> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(entry) = state.heap.pop() {
                return Some(entry.command);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Drops every queued command and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.heap.len();
        state.heap.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// true if a queued command matches `predicate`
    pub fn contains<P: Fn(&Command) -> bool>(&self, predicate: P) -> bool {
        self.lock()
            .heap
            .iter()
            .any(|entry| predicate(&entry.command))
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
