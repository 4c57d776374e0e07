// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;
use tracing::debug;

use crate::constants::DISPATCH_BATCH;
use crate::event::{Event, EventType};
use crate::module::{Module, ModuleContext, ModuleKind};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileOutputConfig {
    pub path: PathBuf,
}

/// Appends the raw text of every record as one line.
pub struct FileOutput {
    config: FileOutputConfig,
    writer: Option<BufWriter<File>>,
}

impl FileOutput {
    #[must_use]
    pub fn new(config: FileOutputConfig) -> Self {
        Self {
            config,
            writer: None,
        }
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                self.discard_buffered();
                return Err(e)
                    .with_context(|| format!("cannot flush {}", self.config.path.display()));
            }
        }
        Ok(())
    }

    /// Drops bytes that never reached the file. Their records are still
    /// queued and get written again.
    fn discard_buffered(&mut self) {
        if let Some(writer) = self.writer.take() {
            let (file, lost) = writer.into_parts();
            debug!(
                "FILE_OUTPUT | discarding {} unwritten bytes for {}",
                lost.map_or(0, |buf| buf.len()),
                self.config.path.display()
            );
            self.writer = Some(BufWriter::new(file));
        }
    }
}

impl Module for FileOutput {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Output
    }

    fn start(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)
            .with_context(|| format!("cannot open {}", self.config.path.display()))?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        let flushed = self.flush();
        self.writer = None;
        flushed
    }

    fn on_event(&mut self, ctx: &mut ModuleContext<'_>, event: &Event) -> anyhow::Result<()> {
        if !matches!(event.kind(), EventType::DataAvailable | EventType::Poll) {
            return Ok(());
        }
        let path = &self.config.path;
        let Some(writer) = self.writer.as_mut() else {
            anyhow::bail!("{} is not open", path.display());
        };
        let mut written = 0;
        for record in ctx.queued().take(DISPATCH_BATCH) {
            let line = record.raw_event().unwrap_or_default();
            let result = writer
                .write_all(line.as_bytes())
                .and_then(|()| writer.write_all(b"\n"));
            if let Err(e) = result {
                let err =
                    anyhow::Error::new(e).context(format!("cannot write to {}", path.display()));
                self.discard_buffered();
                return Err(err);
            }
            written += 1;
        }
        // records stay queued until they reached the file
        self.flush()?;
        for _ in 0..written {
            let Some((entry, _)) = ctx.peek() else {
                break;
            };
            ctx.pop(entry);
        }
        debug!("FILE_OUTPUT | wrote {written} records to {}", self.config.path.display());
        if ctx.queue_len() > 0 {
            ctx.post_once(EventType::DataAvailable, None);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{FileInput, FileInputConfig, Generator, GeneratorConfig};
    use crate::module::Status;
    use crate::route::RouteSpec;
    use crate::scheduler::Scheduler;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test(start_paused = true)]
    async fn test_lines_are_copied_in_order() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("in.log");
        let output = dir.path().join("out.log");
        let lines: Vec<String> = (0..250).map(|i| format!("line {i}")).collect();
        fs::write(&input, lines.join("\n") + "\n").expect("write input");

        let mut scheduler = Scheduler::builder()
            .module(
                "tail",
                None,
                Box::new(FileInput::new(FileInputConfig {
                    path: input,
                    poll_interval_ms: 1000,
                    save_position: true,
                })),
            )
            .module(
                "sink",
                Some(20),
                Box::new(FileOutput::new(FileOutputConfig {
                    path: output.clone(),
                })),
            )
            .route(RouteSpec::new("r", &["tail", "sink"]))
            .build()
            .expect("build");
        scheduler.init_all();
        scheduler.start_all();
        scheduler.run_until_idle();

        let written = fs::read_to_string(&output).expect("read output");
        assert_eq!(written.lines().collect::<Vec<_>>(), lines);
        let offset = scheduler.cache().get::<u64>("tail.position");
        assert_eq!(offset, Some((lines.join("\n").len() + 1) as u64));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_records_queued() {
        let mut scheduler = Scheduler::builder()
            .module(
                "gen",
                None,
                Box::new(Generator::new(GeneratorConfig {
                    count: 5,
                    message: "kept".to_string(),
                    ..GeneratorConfig::default()
                })),
            )
            .module(
                "sink",
                Some(10),
                Box::new(FileOutput::new(FileOutputConfig {
                    path: PathBuf::from("/dev/full"),
                })),
            )
            .route(RouteSpec::new("r", &["gen", "sink"]))
            .build()
            .expect("build");
        scheduler.init_all();
        scheduler.start_all();
        scheduler.run_until_idle();

        let sink = scheduler.module_id("sink").expect("sink");
        assert!(scheduler.counters(sink).snapshot().errors >= 1);
        assert_eq!(scheduler.status(sink), Status::Stopped);
        assert_eq!(scheduler.queue_len(sink), 5);
    }
}
