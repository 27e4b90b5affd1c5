//! Cooperative task scheduler
//!
//! Tasks run to completion in the order they become ready. Radio events
//! (the interrupt side) only ever post tasks here, all protocol state is
//! mutated while running those tasks.
//
// https://github.com/rust-iot/rust-d7ap
// Copyright 2021 Ryan Kurte

use core::mem::discriminant;

use heapless::{spsc::Queue, Vec};
use log::trace;

use crate::{Ts, pool::PacketHandle};

/// Ready queue length (usable capacity is one less)
pub const READY_QUEUE_LEN: usize = 16;

/// Maximum number of concurrently delayed tasks
pub const MAX_DELAYED: usize = 8;

/// Stack tasks
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Task {
    /// Process a frame marked as received by the radio
    ProcessReceived,
    /// Start a clear channel assessment
    ExecuteCca,
    /// Run (or re-run) the CSMA-CA backoff procedure
    ExecuteCsmaCa,
    /// Return to scan automation
    ScanAutomation,
    /// Open a foreground scan receive window
    StartForegroundScan,
    /// RSSI sample delivered for the running CCA
    CcaRssi(i16),
    /// Radio signalled completion of a transmission
    TransmitCompleted(PacketHandle),
    /// Transaction response period timer fired
    ResponsePeriodExpired,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedError {
    /// Ready or delayed queue full
    QueueFull(Task),
    /// A delayed instance of this task is already pending
    AlreadyScheduled(Task),
}

#[derive(Copy, Clone, Debug, PartialEq)]
struct Delayed {
    due: Ts,
    seq: u32,
    task: Task,
}

/// Single-threaded run-to-completion scheduler
pub struct Scheduler {
    ready: Queue<Task, READY_QUEUE_LEN>,
    delayed: Vec<Delayed, MAX_DELAYED>,
    seq: u32,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            ready: Queue::new(),
            delayed: Vec::new(),
            seq: 0,
        }
    }

    /// Post a task to run as soon as possible
    pub fn post(&mut self, task: Task) -> Result<(), SchedError> {
        trace!("Post task {:?}", task);

        self.ready.enqueue(task).map_err(SchedError::QueueFull)
    }

    /// Post a task to run `delay` ticks after `now`.
    ///
    /// Only one delayed instance of each task kind may be pending.
    pub fn post_delayed(&mut self, task: Task, now: Ts, delay: Ts) -> Result<(), SchedError> {
        if self.is_scheduled(&task) {
            return Err(SchedError::AlreadyScheduled(task));
        }

        trace!("Post task {:?} at {} (+{})", task, now + delay, delay);

        let d = Delayed{ due: now + delay, seq: self.seq, task };
        self.seq = self.seq.wrapping_add(1);

        self.delayed.push(d).map_err(|d| SchedError::QueueFull(d.task))
    }

    /// Cancel a pending delayed task, returns whether one was removed
    pub fn cancel(&mut self, task: &Task) -> bool {
        let idx = self.delayed.iter()
            .position(|d| discriminant(&d.task) == discriminant(task));

        match idx {
            Some(i) => {
                self.delayed.swap_remove(i);
                true
            },
            None => false,
        }
    }

    /// Check whether a delayed task of this kind is pending
    pub fn is_scheduled(&self, task: &Task) -> bool {
        self.delayed.iter().any(|d| discriminant(&d.task) == discriminant(task))
    }

    /// Earliest delayed task deadline
    pub fn next_deadline(&self) -> Option<Ts> {
        self.delayed.iter().map(|d| d.due).min()
    }

    /// Check whether any work is ready at `now`
    pub fn has_ready(&self, now: Ts) -> bool {
        !self.ready.is_empty() || self.delayed.iter().any(|d| d.due <= now)
    }

    /// Fetch the next task to run at `now`.
    ///
    /// Immediate tasks run first (FIFO), followed by expired delayed tasks
    /// in deadline order.
    pub fn next(&mut self, now: Ts) -> Option<Task> {
        if let Some(t) = self.ready.dequeue() {
            return Some(t);
        }

        let idx = self.delayed.iter()
            .enumerate()
            .filter(|(_i, d)| d.due <= now)
            .min_by_key(|(_i, d)| (d.due, d.seq))
            .map(|(i, _d)| i)?;

        Some(self.delayed.swap_remove(idx).task)
    }
}
