// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Default number of records a module queue holds before upstream is blocked.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Default resume multiplier applied to the high-water mark of a blocked link.
pub const DEFAULT_RESUME_MULTIPLIER: f64 = 0.5;

/// Maximum number of records a handler moves per dispatched event.
pub const DISPATCH_BATCH: usize = 100;

/// Number of dispatches after which the scheduler yields to the runtime.
pub const YIELD_EVERY: usize = 256;

/// Delay before a stage that could not make progress polls again.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);

pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Default number of records per disk buffer chunk.
pub const DEFAULT_CHUNK_RECORDS: u64 = 500;

/// Largest serialized record accepted from a chunk or snapshot file.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Record field holding the original event text.
pub const RAW_EVENT: &str = "raw_event";
pub const EVENT_RECEIVED_TIME: &str = "EventReceivedTime";
pub const SOURCE_MODULE_NAME: &str = "SourceModuleName";
pub const SOURCE_MODULE_TYPE: &str = "SourceModuleType";

/// Config cache file name inside the cache directory.
pub const CONFIG_CACHE_FILE: &str = "configcache.json";
/// Suffix of persisted module queues inside the cache directory.
pub const LOGQUEUE_SUFFIX: &str = "logqueue";
