// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event-driven log collection engine.
//!
//! Records enter through input modules, travel along routes through processor
//! modules and leave through output modules. Every module owns a bounded
//! [`queue::LogQueue`]; a single [`scheduler::Scheduler`] loop dispatches
//! [`event::Event`]s to module handlers, and [`flow`] control keeps fast
//! producers from overrunning slow consumers. The [`buffer`] stage spills
//! records to memory or disk while downstream is blocked.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod cache;
pub mod codec;
pub mod config;
pub mod constants;
pub mod drivers;
pub mod errors;
pub mod event;
pub mod flow;
pub mod module;
pub mod poll;
pub mod queue;
pub mod record;
pub mod route;
pub mod scheduler;

pub use config::Config;
pub use module::{Module, ModuleContext, ModuleId, ModuleKind, Status};
pub use queue::LogQueue;
pub use record::{LogRecord, Value};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerHandle};
