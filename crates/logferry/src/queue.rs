// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-module FIFO of log records.
//!
//! The queue itself never refuses a push; its capacity is advisory and is
//! enforced by flow control before a producer forwards a record. Consumers
//! follow a peek-then-pop protocol: [`LogQueue::peek`] lends the front record
//! together with its [`EntryId`], and [`LogQueue::pop`] hands ownership over
//! only for that same entry.

use std::collections::VecDeque;

use crate::record::LogRecord;

/// Identity of one queued record, valid while the record is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(u64);

#[derive(Debug)]
struct Entry {
    id: EntryId,
    record: LogRecord,
}

#[derive(Debug)]
pub struct LogQueue {
    capacity: usize,
    entries: VecDeque<Entry>,
    next_id: u64,
}

impl LogQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
            next_id: 0,
        }
    }

    pub fn push(&mut self, record: LogRecord) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.entries.push_back(Entry { id, record });
        id
    }

    /// Borrows the front record.
    #[must_use]
    pub fn peek(&self) -> Option<(EntryId, &LogRecord)> {
        self.entries.front().map(|entry| (entry.id, &entry.record))
    }

    /// Removes the front record and returns it.
    ///
    /// # Panics
    ///
    /// Panics when `id` is not the current front entry. Popping anything but
    /// the record that was just peeked would reorder or lose data.
    pub fn pop(&mut self, id: EntryId) -> LogRecord {
        let front = self.entries.front().map(|entry| entry.id);
        assert_eq!(
            front,
            Some(id),
            "LogQueue::pop called for an entry that is not at the front"
        );
        #[allow(clippy::expect_used)]
        let entry = self.entries.pop_front().expect("front checked above");
        entry.record
    }

    /// Removes every record, oldest first.
    pub fn drain_all(&mut self) -> Vec<LogRecord> {
        self.entries.drain(..).map(|entry| entry.record).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        self.entries.iter().map(|entry| &entry.record)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
