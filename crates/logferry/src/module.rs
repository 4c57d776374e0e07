// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Module identity, lifecycle state machine and the handler interface.
//!
//! ```text
//! UNINITIALIZED --init--> STOPPED --start--> RUNNING <--pause/resume--> PAUSED
//!                            ^                  |                          |
//!                            +------stop--------+----------stop-----------+
//! STOPPED --shutdown--> SHUTDOWN (terminal)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::cache::ConfigCache;
use crate::errors::PollError;
use crate::event::{Event, EventId, EventType};
use crate::poll::{Interest, SourceId};
use crate::queue::EntryId;
use crate::record::LogRecord;
use crate::scheduler::{ModuleOverview, SchedulerState};

/// Index of a module inside its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(usize);

impl ModuleId {
    #[must_use]
    pub fn new(index: usize) -> Self {
        ModuleId(index)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Input,
    Processor,
    Output,
    Extension,
}

impl ModuleKind {
    /// Inputs and outputs talk to the outside world and own a job.
    #[must_use]
    pub fn has_job(self) -> bool {
        matches!(self, ModuleKind::Input | ModuleKind::Output)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleKind::Input => "input",
            ModuleKind::Processor => "processor",
            ModuleKind::Output => "output",
            ModuleKind::Extension => "extension",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Uninitialized,
    Stopped,
    Running,
    Paused,
    Shutdown,
}

impl Status {
    /// State reached by applying `operation`, or `None` when the operation is
    /// not valid in the current state.
    #[must_use]
    pub fn apply(self, operation: Lifecycle) -> Option<Status> {
        use Lifecycle as L;
        use Status as S;
        match (self, operation) {
            (S::Uninitialized, L::Init) => Some(S::Stopped),
            (S::Stopped, L::Start) => Some(S::Running),
            (S::Running | S::Paused, L::Stop) => Some(S::Stopped),
            (S::Running, L::Pause) => Some(S::Paused),
            (S::Paused, L::Resume) => Some(S::Running),
            (S::Uninitialized | S::Stopped, L::Shutdown) => Some(S::Shutdown),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Status::Running | Status::Paused)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Uninitialized => "UNINITIALIZED",
            Status::Stopped => "STOPPED",
            Status::Running => "RUNNING",
            Status::Paused => "PAUSED",
            Status::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Init,
    Start,
    Stop,
    Pause,
    Resume,
    Shutdown,
}

impl Lifecycle {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Lifecycle::Init => "init",
            Lifecycle::Start => "start",
            Lifecycle::Stop => "stop",
            Lifecycle::Pause => "pause",
            Lifecycle::Resume => "resume",
            Lifecycle::Shutdown => "shutdown",
        }
    }
}

/// Per-module counters, readable from any thread.
#[derive(Debug, Default)]
pub struct ModuleCounters {
    received: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub received: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub errors: u64,
}

impl ModuleCounters {
    pub(crate) fn add_received(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_forwarded(&self, n: u64) {
        self.forwarded.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Handler table of one module driver.
///
/// Hooks run synchronously on the scheduler loop. An `Err` returned from any
/// hook is caught by the scheduler, which stops the module and schedules a
/// restart with backoff; it never reaches other modules.
pub trait Module: Send {
    fn kind(&self) -> ModuleKind;

    fn init(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called on STOPPED -> RUNNING; typically posts the first events.
    fn start(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()>;

    /// Called on RUNNING/PAUSED -> STOPPED after the module's events were
    /// retracted. Persist whatever a later `start` needs to continue.
    fn stop(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after pollable I/O events were retracted and the module's
    /// sources deregistered.
    fn pause(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Re-arm pollable I/O after a pause.
    fn resume(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut ModuleContext<'_>, event: &Event) -> anyhow::Result<()>;
}

/// View of the scheduler handed to a module's hooks.
pub struct ModuleContext<'a> {
    id: ModuleId,
    state: &'a mut SchedulerState,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(id: ModuleId, state: &'a mut SchedulerState) -> Self {
        Self { id, state }
    }

    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.state.module(self.id).name
    }

    #[must_use]
    pub fn kind(&self) -> ModuleKind {
        self.state.module(self.id).kind
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.state.module(self.id).status
    }

    /// Time of the current dispatch round.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.state.tick
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.state.module(self.id).queue.len()
    }

    /// Borrows the front record of this module's queue.
    #[must_use]
    pub fn peek(&self) -> Option<(EntryId, &LogRecord)> {
        self.state.module(self.id).queue.peek()
    }

    /// This module's queued records, oldest first.
    pub fn queued(&self) -> impl Iterator<Item = &LogRecord> {
        self.state.module(self.id).queue.iter()
    }

    /// Takes the peeked front record and wakes blocked upstream producers
    /// once this queue drained far enough.
    pub fn pop(&mut self, entry: EntryId) -> LogRecord {
        self.state.pop(self.id, entry)
    }

    /// True when every downstream queue is below `high_water_mark * multiplier`.
    #[must_use]
    pub fn can_send(&self, multiplier: f64) -> bool {
        self.state.can_send(self.id, multiplier)
    }

    /// Flow-control decision with hysteresis: once refused, sending resumes
    /// only after downstream drained below its resume level.
    pub fn may_send(&mut self) -> bool {
        self.state.may_send(self.id)
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.state.module(self.id).gate.is_blocked()
    }

    /// Hands `record` to every module directly downstream. Callers check
    /// [`ModuleContext::may_send`] first.
    pub fn forward(&mut self, record: LogRecord) {
        self.state.forward(self.id, record);
    }

    /// Counts a record this module consumed without forwarding.
    pub fn discard(&mut self, record: LogRecord) {
        self.state.module(self.id).counters.add_dropped(1);
        drop(record);
    }

    /// Counts records that entered the pipeline at this module.
    pub fn count_received(&self, n: u64) {
        self.state.module(self.id).counters.add_received(n);
    }

    /// Schedules an event for this module, immediately or after `delay`.
    pub fn post(&mut self, kind: EventType, delay: Option<Duration>) -> EventId {
        self.state.post(self.id, kind, delay)
    }

    /// Like [`ModuleContext::post`] but replaces any pending event of the same
    /// type on this module's job.
    pub fn post_job(&mut self, kind: EventType, delay: Option<Duration>) -> EventId {
        self.state.post_job(self.id, kind, delay)
    }

    /// Posts `kind` unless an event of that type is already pending.
    pub fn post_once(&mut self, kind: EventType, delay: Option<Duration>) -> Option<EventId> {
        self.state.post_once(self.id, kind, delay)
    }

    pub fn post_event(&mut self, event: Event) -> EventId {
        self.state.events.schedule(event)
    }

    pub fn cancel(&mut self, event: EventId) -> bool {
        self.state.events.cancel(event).is_some()
    }

    pub fn register(&mut self, source: SourceId, interest: Interest) -> Result<(), PollError> {
        self.state.poll.register(self.id, source, interest)
    }

    pub fn deregister(&mut self) {
        self.state.poll.deregister(self.id);
    }

    #[must_use]
    pub fn cache(&self) -> &ConfigCache {
        &self.state.cache
    }

    /// Queue sizes and counters of every module.
    #[must_use]
    pub fn overview(&self) -> Vec<ModuleOverview> {
        self.state.overview()
    }
}
