// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::event::{Event, EventType};
use crate::module::{Module, ModuleContext, ModuleKind};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { interval_ms: 60_000 }
    }
}

/// Extension that periodically logs queue sizes and counters of every module.
pub struct StatsExtension {
    interval: Duration,
}

impl StatsExtension {
    #[must_use]
    pub fn new(config: StatsConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms.max(1)),
        }
    }
}

impl Module for StatsExtension {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Extension
    }

    fn start(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        ctx.post(EventType::Poll, Some(self.interval));
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut ModuleContext<'_>, event: &Event) -> anyhow::Result<()> {
        if event.kind() != EventType::Poll {
            return Ok(());
        }
        for module in ctx.overview() {
            info!(
                module = module.name.as_str(),
                kind = %module.kind,
                status = %module.status,
                queued = module.queue_len,
                received = module.counters.received,
                forwarded = module.counters.forwarded,
                dropped = module.counters.dropped,
                errors = module.counters.errors,
                "STATS | module statistics"
            );
        }
        ctx.post(EventType::Poll, Some(self.interval));
        Ok(())
    }
}
