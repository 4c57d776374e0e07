// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info};

use crate::constants::DISPATCH_BATCH;
use crate::drivers::stamp;
use crate::event::{Event, EventType};
use crate::module::{Module, ModuleContext, ModuleKind};
use crate::record::LogRecord;

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileInputConfig {
    pub path: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Resume from the last read offset after a restart.
    #[serde(default = "default_true")]
    pub save_position: bool,
}

/// Tails a text file, one record per complete line.
pub struct FileInput {
    config: FileInputConfig,
    offset: u64,
}

impl FileInput {
    #[must_use]
    pub fn new(config: FileInputConfig) -> Self {
        Self { config, offset: 0 }
    }

    fn position_key(ctx: &ModuleContext<'_>) -> String {
        format!("{}.position", ctx.name())
    }

    fn save_position(&self, ctx: &ModuleContext<'_>) {
        if self.config.save_position {
            ctx.cache().set(Self::position_key(ctx), &self.offset);
        }
    }

    /// Reads up to one batch of lines. Returns true when the batch limit was
    /// hit and more lines may be waiting.
    fn read_lines(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<bool> {
        let path = &self.config.path;
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("FILE_INPUT | {} does not exist yet", path.display());
                return Ok(false);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("cannot open {}", path.display()));
            }
        };
        let len = file
            .metadata()
            .with_context(|| format!("cannot stat {}", path.display()))?
            .len();
        if len < self.offset {
            info!(
                "FILE_INPUT | {} was truncated, reading from the start",
                path.display()
            );
            self.offset = 0;
        }
        file.seek(SeekFrom::Start(self.offset))
            .with_context(|| format!("cannot seek {}", path.display()))?;

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let mut read = 0;
        while read < DISPATCH_BATCH {
            if !ctx.may_send() {
                break;
            }
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .with_context(|| format!("cannot read {}", path.display()))?;
            if n == 0 || line.last() != Some(&b'\n') {
                // partial lines are read again once completed
                break;
            }
            self.offset += n as u64;
            let text = String::from_utf8_lossy(&line);
            if let Cow::Owned(_) = text {
                debug!(
                    "FILE_INPUT | invalid UTF-8 in {} before offset {}, replaced",
                    path.display(),
                    self.offset
                );
            }
            let mut record = LogRecord::from_raw(text.trim_end_matches(['\r', '\n']));
            stamp(&mut record, ctx, "file");
            ctx.forward(record);
            read += 1;
        }
        ctx.count_received(read as u64);
        Ok(read == DISPATCH_BATCH)
    }
}

impl Module for FileInput {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Input
    }

    fn start(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        if self.config.save_position {
            if let Some(offset) = ctx.cache().get::<u64>(&Self::position_key(ctx)) {
                self.offset = offset;
                debug!(
                    "FILE_INPUT | resuming {} at offset {offset}",
                    self.config.path.display()
                );
            }
        }
        ctx.post_job(EventType::Poll, None);
        Ok(())
    }

    fn stop(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        self.save_position(ctx);
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut ModuleContext<'_>, event: &Event) -> anyhow::Result<()> {
        if !matches!(
            event.kind(),
            EventType::Poll | EventType::Unblocked | EventType::Read
        ) {
            return Ok(());
        }
        let more = self.read_lines(ctx)?;
        self.save_position(ctx);
        if ctx.is_blocked() {
            return Ok(());
        }
        let delay = (!more).then(|| Duration::from_millis(self.config.poll_interval_ms));
        ctx.post_job(EventType::Poll, delay);
        Ok(())
    }
}
