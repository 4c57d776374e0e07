// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::constants::{DISPATCH_BATCH, RETRY_INTERVAL};
use crate::event::{Event, EventType};
use crate::module::{Module, ModuleContext, ModuleKind};
use crate::record::LogRecord;

/// Shared view of what a [`CaptureOutput`] received.
#[derive(Debug, Clone, Default)]
pub struct CaptureHandle {
    records: Arc<Mutex<Vec<LogRecord>>>,
    stalled: Arc<AtomicBool>,
}

impl CaptureHandle {
    /// Stops consuming; records pile up in the module's queue.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Consumes again from the next poll on.
    pub fn unstall(&self) {
        self.stalled.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().clone()
    }

    #[must_use]
    pub fn raw_events(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|record| record.raw_event().unwrap_or_default().to_string())
            .collect()
    }

    /// Removes and returns everything captured so far.
    pub fn take(&self) -> Vec<LogRecord> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Output that keeps records in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct CaptureOutput {
    handle: CaptureHandle,
}

impl CaptureOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn handle(&self) -> CaptureHandle {
        self.handle.clone()
    }
}

impl Module for CaptureOutput {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Output
    }

    fn start(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut ModuleContext<'_>, event: &Event) -> anyhow::Result<()> {
        if !matches!(event.kind(), EventType::DataAvailable | EventType::Poll) {
            return Ok(());
        }
        if self.handle.is_stalled() {
            ctx.post_job(EventType::Poll, Some(RETRY_INTERVAL));
            return Ok(());
        }
        let mut batch = Vec::new();
        while batch.len() < DISPATCH_BATCH {
            let Some((entry, _)) = ctx.peek() else {
                break;
            };
            batch.push(ctx.pop(entry));
        }
        self.handle.lock().extend(batch);
        if ctx.queue_len() > 0 {
            ctx.post_once(EventType::DataAvailable, None);
        }
        Ok(())
    }
}
