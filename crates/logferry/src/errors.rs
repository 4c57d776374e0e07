// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use crate::module::Status;

/// Errors raised while turning records into bytes and back.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode record: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode record: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("unsupported record format version {0}")]
    UnsupportedVersion(u8),
    #[error("empty record payload")]
    Empty,
}

/// Errors raised by the persistent buffer backends.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("buffer I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("record of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
    #[error("disk buffer needs a directory")]
    NoDirectory,
    #[error("buffer '{0}' is not open")]
    NotOpen(String),
}

impl BufferError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BufferError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A frame that could not be read back from a chunk or snapshot file.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("truncated frame: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("bad length prefix {0}")]
    BadLength(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Rejected module lifecycle transition.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("module '{module}' cannot {operation} while {from}")]
pub struct TransitionError {
    pub module: String,
    pub operation: &'static str,
    pub from: Status,
}

/// Errors detected while assembling modules and routes into a scheduler.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("duplicate module name '{0}'")]
    DuplicateModule(String),
    #[error("route '{route}' references unknown module '{module}'")]
    UnknownModule { route: String, module: String },
    #[error("route '{0}' is empty")]
    EmptyRoute(String),
    #[error("route '{route}': {reason}")]
    InvalidRoute { route: String, reason: String },
}

/// Errors raised while loading or saving the config cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("config cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config cache {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while loading configuration or building the pipeline from it.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("module '{module}': {source}")]
    Driver {
        module: String,
        #[source]
        source: BufferError,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("cannot create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by a [`crate::poll::PollBridge`].
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("source {0} is already registered")]
    AlreadyRegistered(u64),
    #[error("scheduler is gone")]
    SchedulerGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_display() {
        let error = TransitionError {
            module: "in".to_string(),
            operation: "start",
            from: Status::Running,
        };
        assert_eq!(error.to_string(), "module 'in' cannot start while RUNNING");
    }

    #[test]
    fn test_build_error_display() {
        let error = BuildError::UnknownModule {
            route: "r1".to_string(),
            module: "missing".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "route 'r1' references unknown module 'missing'"
        );
    }

    #[test]
    fn test_buffer_error_keeps_source() {
        use std::error::Error;

        let error = BufferError::io(
            "/tmp/buf.1.q",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(error.to_string().contains("/tmp/buf.1.q"));
        assert!(error.source().is_some());
    }
}
