// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Built-in module drivers, selected by the `driver` key of a module entry.

pub mod buffer;
pub mod capture;
pub mod file_input;
pub mod file_output;
pub mod generator;
pub mod null;
pub mod stats;

use serde::Deserialize;
use time::OffsetDateTime;

use crate::buffer::BufferConfig;
use crate::constants::{EVENT_RECEIVED_TIME, SOURCE_MODULE_NAME, SOURCE_MODULE_TYPE};
use crate::errors::BufferError;
use crate::module::{Module, ModuleContext};
use crate::record::LogRecord;

pub use buffer::{BufferProcessor, BufferStats};
pub use capture::{CaptureHandle, CaptureOutput};
pub use file_input::{FileInput, FileInputConfig};
pub use file_output::{FileOutput, FileOutputConfig};
pub use generator::{Generator, GeneratorConfig};
pub use null::NullProcessor;
pub use stats::{StatsConfig, StatsExtension};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum DriverConfig {
    Generator(GeneratorConfig),
    FileInput(FileInputConfig),
    Null,
    Buffer(BufferConfig),
    FileOutput(FileOutputConfig),
    Stats(StatsConfig),
}

impl DriverConfig {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DriverConfig::Generator(_) => "generator",
            DriverConfig::FileInput(_) => "file_input",
            DriverConfig::Null => "null",
            DriverConfig::Buffer(_) => "buffer",
            DriverConfig::FileOutput(_) => "file_output",
            DriverConfig::Stats(_) => "stats",
        }
    }
}

/// Instantiates the driver of module `name`.
pub fn build_driver(name: &str, config: &DriverConfig) -> Result<Box<dyn Module>, BufferError> {
    let module: Box<dyn Module> = match config {
        DriverConfig::Generator(config) => Box::new(Generator::new(config.clone())),
        DriverConfig::FileInput(config) => Box::new(FileInput::new(config.clone())),
        DriverConfig::Null => Box::new(NullProcessor),
        DriverConfig::Buffer(config) => Box::new(BufferProcessor::new(name, config.clone())?),
        DriverConfig::FileOutput(config) => Box::new(FileOutput::new(config.clone())),
        DriverConfig::Stats(config) => Box::new(StatsExtension::new(config.clone())),
    };
    Ok(module)
}

/// Adds the fields every input sets on the records it creates.
pub(crate) fn stamp(record: &mut LogRecord, ctx: &ModuleContext<'_>, driver: &str) {
    record.set(EVENT_RECEIVED_TIME, OffsetDateTime::now_utc());
    record.set(SOURCE_MODULE_NAME, ctx.name());
    record.set(SOURCE_MODULE_TYPE, driver);
}
