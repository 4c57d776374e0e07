// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffer stage: diverts records downstream refuses into a backend and
//! replays them, oldest first, once downstream accepts again.
//!
//! Records already in the backend always leave before records still waiting
//! in the module queue. Once the backend holds `max_size`, incoming records
//! stay queued and flow control blocks the producers upstream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::buffer::{new_backend, BufferBackend, BufferConfig};
use crate::constants::DISPATCH_BATCH;
use crate::errors::BufferError;
use crate::event::{Event, EventType};
use crate::module::{Module, ModuleContext, ModuleKind};

/// Occupancy of a buffer stage, readable from any thread.
#[derive(Debug, Default)]
pub struct BufferStats {
    records: AtomicU64,
    bytes: AtomicU64,
    peak_bytes: AtomicU64,
}

impl BufferStats {
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Highest byte size observed since start.
    #[must_use]
    pub fn peak_bytes(&self) -> u64 {
        self.peak_bytes.load(Ordering::Relaxed)
    }

    fn update(&self, backend: &dyn BufferBackend) {
        self.records.store(backend.len(), Ordering::Relaxed);
        self.bytes.store(backend.size(), Ordering::Relaxed);
        self.peak_bytes.fetch_max(backend.size(), Ordering::Relaxed);
    }
}

pub struct BufferProcessor {
    config: BufferConfig,
    backend: Box<dyn BufferBackend>,
    stats: Arc<BufferStats>,
    warned: bool,
}

impl BufferProcessor {
    pub fn new(name: &str, config: BufferConfig) -> Result<Self, BufferError> {
        let backend = new_backend(name, &config)?;
        Ok(Self::with_backend(config, backend))
    }

    #[must_use]
    pub fn with_backend(config: BufferConfig, backend: Box<dyn BufferBackend>) -> Self {
        Self {
            config,
            backend,
            stats: Arc::new(BufferStats::default()),
            warned: false,
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<BufferStats> {
        Arc::clone(&self.stats)
    }

    fn pump(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        let max_bytes = self.config.max_bytes();
        let mut moved = 0;

        while moved < DISPATCH_BATCH && !self.backend.is_empty() && ctx.may_send() {
            let Some(record) = self.backend.pop()? else {
                break;
            };
            ctx.forward(record);
            moved += 1;
        }

        while moved < DISPATCH_BATCH {
            let Some((entry, _)) = ctx.peek() else {
                break;
            };
            if self.backend.is_empty() && ctx.may_send() {
                let record = ctx.pop(entry);
                ctx.forward(record);
            } else if self.backend.size() < max_bytes {
                if let Some((_, record)) = ctx.peek() {
                    self.backend.push(record)?;
                }
                ctx.pop(entry);
            } else {
                break;
            }
            moved += 1;
        }

        self.stats.update(self.backend.as_ref());
        self.check_warn_limit(ctx);

        if ctx.is_blocked() {
            // downstream wakes us with Unblocked
            return Ok(());
        }
        if !self.backend.is_empty() {
            ctx.post_once(EventType::Poll, None);
        }
        if ctx.queue_len() > 0 {
            ctx.post_once(EventType::DataAvailable, None);
        }
        Ok(())
    }

    fn check_warn_limit(&mut self, ctx: &ModuleContext<'_>) {
        let Some(limit) = self.config.warn_bytes() else {
            return;
        };
        let size = self.backend.size();
        if !self.warned && size >= limit {
            self.warned = true;
            warn!(
                "BUFFER | '{}' holds {} bytes in {} records, above the warn limit of {} bytes",
                ctx.name(),
                size,
                self.backend.len(),
                limit
            );
        } else if self.warned && size <= limit / 2 {
            self.warned = false;
            info!("BUFFER | '{}' is back below half of its warn limit", ctx.name());
        }
    }
}

impl Module for BufferProcessor {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Processor
    }

    fn start(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        self.backend
            .open()
            .with_context(|| format!("cannot open buffer of '{}'", ctx.name()))?;
        self.stats.update(self.backend.as_ref());
        if !self.backend.is_empty() {
            info!(
                "BUFFER | '{}' starts with {} buffered records",
                ctx.name(),
                self.backend.len()
            );
            ctx.post_once(EventType::Poll, None);
        }
        Ok(())
    }

    fn stop(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        self.backend
            .close()
            .with_context(|| format!("cannot close buffer of '{}'", ctx.name()))
    }

    fn on_event(&mut self, ctx: &mut ModuleContext<'_>, event: &Event) -> anyhow::Result<()> {
        match event.kind() {
            EventType::DataAvailable | EventType::Unblocked | EventType::Poll => self.pump(ctx),
            _ => Ok(()),
        }
    }
}
