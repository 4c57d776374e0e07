// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::constants::DISPATCH_BATCH;
use crate::drivers::stamp;
use crate::event::{Event, EventType};
use crate::module::{Module, ModuleContext, ModuleKind};
use crate::record::LogRecord;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Records to emit in total; `0` emits forever.
    pub count: u64,
    /// Pause between two batches.
    pub interval_ms: u64,
    pub batch: usize,
    /// Text of every record, followed by its sequence number.
    pub message: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            count: 0,
            interval_ms: 0,
            batch: DISPATCH_BATCH,
            message: "generated record".to_string(),
        }
    }
}

/// Input emitting numbered synthetic records as fast as flow control allows.
pub struct Generator {
    config: GeneratorConfig,
    sent: u64,
}

impl Generator {
    #[must_use]
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config, sent: 0 }
    }

    fn exhausted(&self) -> bool {
        self.config.count != 0 && self.sent >= self.config.count
    }

    fn emit(&mut self, ctx: &mut ModuleContext<'_>) {
        let mut emitted = 0;
        while emitted < self.config.batch.max(1) && !self.exhausted() && ctx.may_send() {
            let mut record = LogRecord::from_raw(format!("{} {}", self.config.message, self.sent));
            stamp(&mut record, ctx, "generator");
            ctx.forward(record);
            self.sent += 1;
            emitted += 1;
        }
        ctx.count_received(emitted as u64);

        if self.exhausted() {
            debug!("GENERATOR | '{}' emitted all {} records", ctx.name(), self.sent);
        } else if !ctx.is_blocked() {
            let delay = (self.config.interval_ms > 0)
                .then(|| Duration::from_millis(self.config.interval_ms));
            ctx.post_job(EventType::Poll, delay);
        }
        // a blocked generator waits for Unblocked
    }
}

impl Module for Generator {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Input
    }

    fn start(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        ctx.post_job(EventType::Poll, None);
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut ModuleContext<'_>, event: &Event) -> anyhow::Result<()> {
        if matches!(event.kind(), EventType::Poll | EventType::Unblocked) {
            self.emit(ctx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::CaptureOutput;
    use crate::route::RouteSpec;
    use crate::scheduler::Scheduler;

    #[tokio::test(start_paused = true)]
    async fn test_paused_generator_forwards_nothing() {
        let capture = CaptureOutput::new();
        let out = capture.handle();
        let mut scheduler = Scheduler::builder()
            .module(
                "gen",
                None,
                Box::new(Generator::new(GeneratorConfig {
                    count: 0,
                    interval_ms: 100,
                    batch: 1,
                    ..GeneratorConfig::default()
                })),
            )
            .module("out", None, Box::new(capture))
            .route(RouteSpec::new("r", &["gen", "out"]))
            .build()
            .expect("build");
        scheduler.init_all();
        scheduler.start_all();
        scheduler.run_until_idle();
        assert_eq!(out.len(), 1);

        let gen = scheduler.module_id("gen").expect("gen");
        scheduler.pause(gen).expect("pause");
        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(100)).await;
            scheduler.run_until_idle();
        }
        assert_eq!(out.len(), 1);
        assert_eq!(scheduler.counters(gen).snapshot().forwarded, 1);

        scheduler.resume(gen).expect("resume");
        scheduler.run_until_idle();
        assert_eq!(out.len(), 2);
        tokio::time::advance(Duration::from_millis(100)).await;
        scheduler.run_until_idle();
        assert_eq!(out.len(), 3);
        assert_eq!(
            out.raw_events(),
            ["generated record 0", "generated record 1", "generated record 2"]
        );
    }
}
