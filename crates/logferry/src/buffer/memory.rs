// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::buffer::{snapshot, BufferBackend};
use crate::codec;
use crate::errors::BufferError;
use crate::queue::LogQueue;
use crate::record::LogRecord;

/// In-memory buffer. With a directory it is written to `<name>.mem.q` on
/// close and read back, then removed, on open.
pub struct MemoryBackend {
    name: String,
    directory: Option<PathBuf>,
    queue: LogQueue,
    sizes: VecDeque<u64>,
    bytes: u64,
}

impl MemoryBackend {
    #[must_use]
    pub fn new(name: &str, directory: Option<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            directory,
            queue: LogQueue::new(0),
            sizes: VecDeque::new(),
            bytes: 0,
        }
    }

    fn snapshot_path(&self) -> Option<PathBuf> {
        self.directory
            .as_ref()
            .map(|dir| dir.join(format!("{}.mem.q", self.name)))
    }

    fn enqueue(&mut self, record: LogRecord, size: u64) {
        self.queue.push(record);
        self.sizes.push_back(size);
        self.bytes += size;
    }
}

impl BufferBackend for MemoryBackend {
    fn open(&mut self) -> Result<(), BufferError> {
        let Some(path) = self.snapshot_path() else {
            return Ok(());
        };
        let records = snapshot::read(&path);
        if records.is_empty() && !path.exists() {
            return Ok(());
        }
        let restored = records.len();
        for record in records {
            let size = codec::encoded_len(&record)? as u64;
            self.enqueue(record, size);
        }
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(BufferError::io(&path, e)),
        }
        info!(
            "BUFFER | restored {restored} records of '{}' from {}",
            self.name,
            path.display()
        );
        Ok(())
    }

    fn push(&mut self, record: &LogRecord) -> Result<(), BufferError> {
        let size = codec::encoded_len(record)? as u64;
        self.enqueue(record.clone(), size);
        Ok(())
    }

    fn pop(&mut self) -> Result<Option<LogRecord>, BufferError> {
        let Some((entry, _)) = self.queue.peek() else {
            return Ok(None);
        };
        let record = self.queue.pop(entry);
        let size = self.sizes.pop_front().unwrap_or_default();
        self.bytes = self.bytes.saturating_sub(size);
        Ok(Some(record))
    }

    fn len(&self) -> u64 {
        self.queue.len() as u64
    }

    fn size(&self) -> u64 {
        self.bytes
    }

    fn close(&mut self) -> Result<(), BufferError> {
        let Some(path) = self.snapshot_path() else {
            return Ok(());
        };
        if self.queue.is_empty() {
            return Ok(());
        }
        snapshot::write(&path, self.queue.iter())?;
        debug!(
            "BUFFER | saved {} records of '{}' to {}",
            self.queue.len(),
            self.name,
            path.display()
        );
        self.queue.drain_all();
        self.sizes.clear();
        self.bytes = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_close_and_open_round_trip_in_order() {
        let dir = tempdir().expect("tempdir");
        let mut backend = MemoryBackend::new("mem", Some(dir.path().to_path_buf()));
        backend.open().expect("open");
        for i in 0..10 {
            backend
                .push(&LogRecord::from_raw(format!("r{i}")))
                .expect("push");
        }
        let first = backend.pop().expect("pop").expect("record");
        assert_eq!(first.raw_event(), Some("r0"));
        let size = backend.size();
        backend.close().expect("close");
        assert!(backend.is_empty());
        assert!(dir.path().join("mem.mem.q").exists());

        let mut reopened = MemoryBackend::new("mem", Some(dir.path().to_path_buf()));
        reopened.open().expect("reopen");
        assert!(!dir.path().join("mem.mem.q").exists());
        assert_eq!(reopened.len(), 9);
        assert_eq!(reopened.size(), size);
        let drained: Vec<String> = std::iter::from_fn(|| reopened.pop().expect("pop"))
            .filter_map(|r| r.raw_event().map(str::to_string))
            .collect();
        let expected: Vec<String> = (1..10).map(|i| format!("r{i}")).collect();
        assert_eq!(drained, expected);
        assert_eq!(reopened.size(), 0);
    }

    #[test]
    fn test_without_directory_content_stays_in_memory() {
        let mut backend = MemoryBackend::new("mem", None);
        backend.open().expect("open");
        backend.push(&LogRecord::from_raw("kept")).expect("push");
        backend.close().expect("close");
        backend.open().expect("open");
        assert_eq!(backend.len(), 1);
    }
}
