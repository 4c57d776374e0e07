// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::DISPATCH_BATCH;
use crate::event::{Event, EventType};
use crate::module::{Module, ModuleContext, ModuleKind};

/// Processor that forwards records unchanged.
pub struct NullProcessor;

impl Module for NullProcessor {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Processor
    }

    fn start(&mut self, _ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut ModuleContext<'_>, event: &Event) -> anyhow::Result<()> {
        if !matches!(
            event.kind(),
            EventType::DataAvailable | EventType::Unblocked | EventType::Poll
        ) {
            return Ok(());
        }
        for _ in 0..DISPATCH_BATCH {
            let Some((entry, _)) = ctx.peek() else {
                break;
            };
            if !ctx.may_send() {
                break;
            }
            let record = ctx.pop(entry);
            ctx.forward(record);
        }
        if ctx.queue_len() > 0 && !ctx.is_blocked() {
            ctx.post_once(EventType::DataAvailable, None);
        }
        Ok(())
    }
}
