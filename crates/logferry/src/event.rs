// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scheduler events and the ordered store holding them until dispatch.
//!
//! Pending events are ordered by trigger time, then by priority (higher
//! first), then by insertion order. An event is owned by the [`EventQueue`]
//! until [`EventQueue::next_ready`] hands it to the scheduler.

use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use tokio::time::Instant;

use crate::module::ModuleId;

/// What an event asks its module to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A registered source is readable.
    Read,
    /// A registered source is writable.
    Write,
    /// A listening source has a pending connection.
    Accept,
    /// The peer of a registered source went away.
    Disconnect,
    /// Records were added to the module's queue.
    DataAvailable,
    /// Downstream drained enough for a blocked producer to send again.
    Unblocked,
    /// Periodic or retry poll requested by the module itself.
    Poll,
    /// A response deadline expired.
    Timeout,
    /// Time to re-establish a connection.
    Reconnect,
    /// Restart of a module stopped after a failure. Handled by the scheduler.
    Restart,
}

impl EventType {
    /// Events produced by pollable I/O sources. Pausing a module drops these;
    /// its job events are held back until it resumes.
    #[must_use]
    pub fn is_io(self) -> bool {
        matches!(
            self,
            EventType::Read | EventType::Write | EventType::Accept | EventType::Disconnect
        )
    }
}

/// Schedulable unit of an I/O module; at most one per module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(ModuleId);

impl JobId {
    #[must_use]
    pub fn for_module(module: ModuleId) -> Self {
        JobId(module)
    }

    #[must_use]
    pub fn module(self) -> ModuleId {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

pub type Payload = Box<dyn Any + Send>;

pub struct Event {
    id: EventId,
    kind: EventType,
    module: ModuleId,
    job: Option<JobId>,
    delayed: bool,
    time: Instant,
    priority: u32,
    payload: Option<Payload>,
}

impl Event {
    /// An event ready as of `now`.
    #[must_use]
    pub fn immediate(kind: EventType, module: ModuleId, now: Instant) -> Self {
        Self::new(kind, module, now, false)
    }

    /// An event that becomes ready at `at`.
    #[must_use]
    pub fn delayed(kind: EventType, module: ModuleId, at: Instant) -> Self {
        Self::new(kind, module, at, true)
    }

    fn new(kind: EventType, module: ModuleId, time: Instant, delayed: bool) -> Self {
        Self {
            id: EventId(0),
            kind,
            module,
            job: None,
            delayed,
            time,
            priority: 0,
            payload: None,
        }
    }

    #[must_use]
    pub fn with_job(mut self, job: JobId) -> Self {
        self.job = Some(job);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> EventType {
        self.kind
    }

    #[must_use]
    pub fn module(&self) -> ModuleId {
        self.module
    }

    #[must_use]
    pub fn job(&self) -> Option<JobId> {
        self.job
    }

    #[must_use]
    pub fn is_delayed(&self) -> bool {
        self.delayed
    }

    #[must_use]
    pub fn time(&self) -> Instant {
        self.time
    }

    #[must_use]
    pub fn priority(&self) -> u32 {
        self.priority
    }

    #[must_use]
    pub fn payload(&self) -> Option<&(dyn Any + Send)> {
        self.payload.as_deref()
    }

    pub fn take_payload(&mut self) -> Option<Payload> {
        self.payload.take()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("module", &self.module)
            .field("job", &self.job)
            .field("delayed", &self.delayed)
            .field("priority", &self.priority)
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    time: Instant,
    priority: Reverse<u32>,
    id: EventId,
}

impl Key {
    fn of(event: &Event) -> Self {
        Self {
            time: event.time,
            priority: Reverse(event.priority),
            id: event.id,
        }
    }
}

/// Outcome of [`EventQueue::next_ready`].
#[derive(Debug)]
pub enum Next {
    Ready(Event),
    /// Only future events remain; the earliest becomes ready at this instant.
    Sleep(Instant),
    Idle,
}

#[derive(Debug, Default)]
pub struct EventQueue {
    pending: BTreeMap<Key, Event>,
    keys: HashMap<EventId, Key>,
    by_module: HashMap<ModuleId, BTreeSet<EventId>>,
    next_id: u64,
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `event` and returns the id it was assigned.
    pub fn schedule(&mut self, mut event: Event) -> EventId {
        self.next_id += 1;
        event.id = EventId(self.next_id);
        let key = Key::of(&event);
        self.keys.insert(event.id, key);
        self.by_module
            .entry(event.module)
            .or_default()
            .insert(event.id);
        self.pending.insert(key, event);
        key.id
    }

    /// Inserts `event` after retracting every pending event of the same type
    /// bound to the same job. Events without a job are scheduled as is.
    pub fn schedule_deduped(&mut self, event: Event) -> EventId {
        if let Some(job) = event.job {
            let kind = event.kind;
            self.cancel_where(job.module(), |pending| {
                pending.job == Some(job) && pending.kind == kind
            });
        }
        self.schedule(event)
    }

    /// Keeps only the most recently inserted pending event of `job`, returning
    /// how many were dropped.
    pub fn dedupe(&mut self, job: JobId) -> usize {
        let newest = self
            .ids_of(job.module())
            .into_iter()
            .filter(|id| self.get(*id).is_some_and(|event| event.job == Some(job)))
            .max();
        match newest {
            Some(newest) => self
                .cancel_where(job.module(), |event| {
                    event.job == Some(job) && event.id != newest
                })
                .len(),
            None => 0,
        }
    }

    /// Retracts a pending event.
    pub fn cancel(&mut self, id: EventId) -> Option<Event> {
        let key = self.keys.remove(&id)?;
        let event = self.pending.remove(&key)?;
        if let Some(ids) = self.by_module.get_mut(&event.module) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_module.remove(&event.module);
            }
        }
        Some(event)
    }

    /// Retracts every pending event of `module`.
    pub fn cancel_module(&mut self, module: ModuleId) -> Vec<Event> {
        self.cancel_where(module, |_| true)
    }

    /// Retracts the pending events of `module` matching `predicate`.
    pub fn cancel_where<F>(&mut self, module: ModuleId, predicate: F) -> Vec<Event>
    where
        F: Fn(&Event) -> bool,
    {
        let doomed: Vec<EventId> = self
            .ids_of(module)
            .into_iter()
            .filter(|id| self.get(*id).is_some_and(&predicate))
            .collect();
        doomed.into_iter().filter_map(|id| self.cancel(id)).collect()
    }

    /// First pending event of `module` with type `kind`, if any.
    #[must_use]
    pub fn find(&self, module: ModuleId, kind: EventType) -> Option<&Event> {
        self.by_module
            .get(&module)?
            .iter()
            .filter_map(|id| self.get(*id))
            .find(|event| event.kind == kind)
    }

    #[must_use]
    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.keys.get(&id).and_then(|key| self.pending.get(key))
    }

    /// Removes and returns the next event ready at `now`.
    pub fn next_ready(&mut self, now: Instant) -> Next {
        let Some((key, _)) = self.pending.first_key_value() else {
            return Next::Idle;
        };
        if key.time > now {
            return Next::Sleep(key.time);
        }
        let id = key.id;
        match self.cancel(id) {
            Some(event) => Next::Ready(event),
            None => Next::Idle,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn pending_for(&self, module: ModuleId) -> usize {
        self.by_module.get(&module).map_or(0, BTreeSet::len)
    }

    fn ids_of(&self, module: ModuleId) -> Vec<EventId> {
        self.by_module
            .get(&module)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}
