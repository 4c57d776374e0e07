// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Overflow storage for records that downstream cannot take yet.
//!
//! Two backends exist: [`memory::MemoryBackend`] keeps records in a queue and
//! snapshots it to a single file when closed, [`disk::DiskBackend`] appends
//! them to numbered chunk files. Both return records in push order and keep
//! their content across a close/open cycle.

pub mod disk;
pub mod memory;
pub mod snapshot;

use std::path::PathBuf;

use serde::Deserialize;

use crate::constants::DEFAULT_CHUNK_RECORDS;
use crate::errors::BufferError;
use crate::record::LogRecord;

pub trait BufferBackend: Send {
    /// Loads whatever a previous run left behind.
    fn open(&mut self) -> Result<(), BufferError>;

    fn push(&mut self, record: &LogRecord) -> Result<(), BufferError>;

    /// Oldest buffered record, or `None` when empty.
    fn pop(&mut self) -> Result<Option<LogRecord>, BufferError>;

    /// Number of buffered records.
    fn len(&self) -> u64;

    /// Serialized size of the buffered records, in bytes.
    fn size(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persists the content so a later [`BufferBackend::open`] sees it again.
    fn close(&mut self) -> Result<(), BufferError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferKind {
    Mem,
    Disk,
}

/// Settings of a buffer stage. Sizes are in kilobytes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BufferConfig {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: BufferKind,
    pub max_size: u64,
    #[serde(default)]
    pub warn_limit: Option<u64>,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_chunk_records")]
    pub chunk_records: u64,
}

fn default_kind() -> BufferKind {
    BufferKind::Mem
}

fn default_chunk_records() -> u64 {
    DEFAULT_CHUNK_RECORDS
}

impl BufferConfig {
    #[must_use]
    pub fn max_bytes(&self) -> u64 {
        self.max_size.saturating_mul(1024)
    }

    #[must_use]
    pub fn warn_bytes(&self) -> Option<u64> {
        self.warn_limit.map(|kb| kb.saturating_mul(1024))
    }
}

/// Creates the backend selected by `config` for the buffer module `name`.
/// The backend still has to be opened.
pub fn new_backend(name: &str, config: &BufferConfig) -> Result<Box<dyn BufferBackend>, BufferError> {
    match config.kind {
        BufferKind::Mem => Ok(Box::new(memory::MemoryBackend::new(
            name,
            config.directory.clone(),
        ))),
        BufferKind::Disk => {
            let directory = config.directory.clone().ok_or(BufferError::NoDirectory)?;
            Ok(Box::new(disk::DiskBackend::new(
                name,
                directory,
                config.chunk_records,
            )))
        }
    }
}
