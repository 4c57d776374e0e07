// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Daemon configuration.
//!
//! Loaded from a YAML file merged with `LOGFERRY_`-prefixed environment
//! variables, which take precedence. Nested keys are separated by `__` in
//! variable names, e.g. `LOGFERRY_RESTART__MAX_BACKOFF_MS`.
//!
//! ```yaml
//! log_level: info
//! cache_dir: /var/lib/logferry
//! persist_queues: true
//! modules:
//!   - name: app
//!     driver: file_input
//!     path: /var/log/app.log
//!   - name: spill
//!     driver: buffer
//!     type: disk
//!     max_size: 10240
//!     warn_limit: 5120
//!     directory: /var/lib/logferry/spill
//!   - name: archive
//!     driver: file_output
//!     path: /var/log/archive.log
//! routes:
//!   - name: main
//!     path: [app, spill, archive]
//!     flow_control:
//!       high_water_mark: 100
//!       resume_multiplier: 0.5
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;

use crate::buffer::BufferKind;
use crate::cache::ConfigCache;
use crate::constants::{DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF, DEFAULT_QUEUE_SIZE};
use crate::drivers::{build_driver, DriverConfig};
use crate::errors::ConfigError;
use crate::route::RouteSpec;
use crate::scheduler::{Backoff, Scheduler, SchedulerBuilder};

pub const CONFIG_ENV: &str = "LOGFERRY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/logferry/logferry.yaml";
const ENV_PREFIX: &str = "LOGFERRY_";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Invalid log level: '{s}'. Valid levels are: error, warn, info, debug, trace",
            )),
        }
    }
}

/// Invalid values fall back to the default level instead of failing the load.
impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if let Value::String(s) = value {
            match LogLevel::from_str(&s) {
                Ok(level) => Ok(level),
                Err(e) => {
                    error!("{}", e);
                    Ok(LogLevel::default())
                }
            }
        } else {
            error!("Expected a string for log level, got {:?}", value);
            Ok(LogLevel::default())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: duration_ms(DEFAULT_INITIAL_BACKOFF),
            max_backoff_ms: duration_ms(DEFAULT_MAX_BACKOFF),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    #[serde(default)]
    pub queue_size: Option<usize>,
    #[serde(flatten)]
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: LogLevel,
    /// Home of the config cache and of persisted module queues.
    pub cache_dir: Option<PathBuf>,
    pub persist_queues: bool,
    pub default_queue_size: usize,
    pub restart: RestartConfig,
    pub modules: Vec<ModuleConfig>,
    pub routes: Vec<RouteSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            cache_dir: None,
            persist_queues: false,
            default_queue_size: DEFAULT_QUEUE_SIZE,
            restart: RestartConfig::default(),
            modules: Vec::new(),
            routes: Vec::new(),
        }
    }
}

/// Path of the configuration file: `$LOGFERRY_CONFIG` or the default path.
#[must_use]
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

impl Config {
    /// Loads and validates the configuration. A missing file leaves only
    /// defaults and environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Config = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.default_queue_size == 0 {
            return invalid("default_queue_size must be positive".to_string());
        }
        if self.restart.initial_backoff_ms == 0
            || self.restart.max_backoff_ms < self.restart.initial_backoff_ms
        {
            return invalid(format!(
                "restart backoff must satisfy 0 < initial_backoff_ms ({}) <= max_backoff_ms ({})",
                self.restart.initial_backoff_ms, self.restart.max_backoff_ms
            ));
        }
        if self.persist_queues && self.cache_dir.is_none() {
            return invalid("persist_queues requires cache_dir".to_string());
        }

        let mut names = HashSet::new();
        for module in &self.modules {
            if !names.insert(module.name.as_str()) {
                return invalid(format!("duplicate module name '{}'", module.name));
            }
            if let DriverConfig::Buffer(buffer) = &module.driver {
                if buffer.max_size == 0 {
                    return invalid(format!("buffer '{}': max_size must be positive", module.name));
                }
                if buffer.warn_limit.is_some_and(|warn| warn >= buffer.max_size) {
                    return invalid(format!(
                        "buffer '{}': warn_limit must be below max_size",
                        module.name
                    ));
                }
                if buffer.kind == BufferKind::Disk && buffer.directory.is_none() {
                    return invalid(format!("buffer '{}': disk buffers need a directory", module.name));
                }
            }
        }

        for route in &self.routes {
            for module in &route.path {
                if !names.contains(module.as_str()) {
                    return invalid(format!(
                        "route '{}' references unknown module '{module}'",
                        route.name
                    ));
                }
            }
            let multiplier = route.flow_control.resume_multiplier;
            if !(multiplier > 0.0 && multiplier <= 1.0) {
                return invalid(format!(
                    "route '{}': resume_multiplier {multiplier} is outside (0, 1]",
                    route.name
                ));
            }
            if route.flow_control.high_water_mark == Some(0) {
                return invalid(format!("route '{}': high_water_mark must be positive", route.name));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.restart.initial_backoff_ms),
            max: Duration::from_millis(self.restart.max_backoff_ms),
        }
    }

    /// Loads the config cache from `cache_dir`, or an in-memory one.
    pub fn open_cache(&self) -> Result<ConfigCache, ConfigError> {
        match &self.cache_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                    path: dir.clone(),
                    source,
                })?;
                Ok(ConfigCache::load(dir)?)
            }
            None => Ok(ConfigCache::in_memory()),
        }
    }

    /// Instantiates every module and route into a builder, so callers can
    /// still attach a poll bridge.
    pub fn builder(&self) -> Result<SchedulerBuilder, ConfigError> {
        let mut builder = Scheduler::builder()
            .backoff(self.backoff())
            .cache(Arc::new(self.open_cache()?));
        if self.persist_queues {
            if let Some(dir) = &self.cache_dir {
                builder = builder.persist_queues(dir.clone());
            }
        }
        for module in &self.modules {
            let driver =
                build_driver(&module.name, &module.driver).map_err(|source| ConfigError::Driver {
                    module: module.name.clone(),
                    source,
                })?;
            let queue_size = module.queue_size.unwrap_or(self.default_queue_size);
            builder = builder.module(module.name.clone(), Some(queue_size), driver);
        }
        for route in &self.routes {
            builder = builder.route(route.clone());
        }
        Ok(builder)
    }

    pub fn build_scheduler(&self) -> Result<Scheduler, ConfigError> {
        Ok(self.builder()?.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferConfig;
    use crate::flow::FlowControl;

    const YAML: &str = r#"
log_level: debug
default_queue_size: 50
modules:
  - name: gen
    driver: generator
    count: 10
  - name: spill
    driver: buffer
    type: disk
    max_size: 10
    warn_limit: 5
    directory: /tmp/logferry-spill
  - name: out
    queue_size: 5
    driver: file_output
    path: /tmp/logferry-out.log
routes:
  - name: main
    path: [gen, spill, out]
    priority: 2
    flow_control:
      high_water_mark: 20
      resume_multiplier: 0.25
"#;

    #[test]
    fn test_parse_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("logferry.yaml", YAML)?;
            let config = Config::load(Path::new("logferry.yaml")).expect("load");

            assert_eq!(config.log_level, LogLevel::Debug);
            assert_eq!(config.default_queue_size, 50);
            assert_eq!(config.modules.len(), 3);
            assert_eq!(config.modules[2].queue_size, Some(5));
            assert_eq!(
                config.modules[1].driver,
                DriverConfig::Buffer(BufferConfig {
                    kind: BufferKind::Disk,
                    max_size: 10,
                    warn_limit: Some(5),
                    directory: Some(PathBuf::from("/tmp/logferry-spill")),
                    chunk_records: crate::constants::DEFAULT_CHUNK_RECORDS,
                })
            );
            assert_eq!(config.routes[0].priority, 2);
            assert_eq!(
                config.routes[0].flow_control,
                FlowControl {
                    enabled: true,
                    high_water_mark: Some(20),
                    resume_multiplier: 0.25,
                }
            );
            assert_eq!(config.restart, RestartConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("logferry.yaml", YAML)?;
            jail.set_env("LOGFERRY_LOG_LEVEL", "ERROR");
            jail.set_env("LOGFERRY_RESTART__MAX_BACKOFF_MS", "5000");
            let config = Config::load(Path::new("logferry.yaml")).expect("load");
            assert_eq!(config.log_level, LogLevel::Error);
            assert_eq!(config.restart.max_backoff_ms, 5000);
            assert_eq!(config.backoff().max, Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            let config = Config::load(Path::new("absent.yaml")).expect("load");
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level_falls_back_to_default() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("LOGFERRY_LOG_LEVEL", "chatty");
            let config = Config::load(Path::new("absent.yaml")).expect("load");
            assert_eq!(config.log_level, LogLevel::Info);
            Ok(())
        });
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            (
                r#"modules: [{name: a, driver: "null"}, {name: a, driver: "null"}]"#,
                "duplicate module name 'a'",
            ),
            (
                "modules: [{name: b, driver: buffer, max_size: 10, warn_limit: 10}]",
                "warn_limit must be below max_size",
            ),
            (
                "modules: [{name: b, driver: buffer, type: disk, max_size: 10}]",
                "disk buffers need a directory",
            ),
            (
                "routes: [{name: r, path: [ghost]}]",
                "unknown module 'ghost'",
            ),
            (
                r#"modules: [{name: a, driver: "null"}]
routes: [{name: r, path: [a], flow_control: {resume_multiplier: 1.5}}]"#,
                "resume_multiplier 1.5",
            ),
            ("persist_queues: true", "persist_queues requires cache_dir"),
        ];
        for (yaml, expected) in cases {
            figment::Jail::expect_with(|jail| {
                jail.clear_env();
                jail.create_file("logferry.yaml", yaml)?;
                let err = Config::load(Path::new("logferry.yaml")).expect_err(yaml);
                assert!(
                    err.to_string().contains(expected),
                    "'{err}' does not mention '{expected}'"
                );
                Ok(())
            });
        }
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("WARN"), Ok(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("trace"), Ok(LogLevel::Trace));
        assert!(LogLevel::from_str("verbose").is_err());
        assert_eq!(LogLevel::Debug.as_ref(), "debug");
    }

    #[tokio::test]
    async fn test_builds_scheduler_from_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            cache_dir: Some(dir.path().join("cache")),
            persist_queues: true,
            modules: vec![
                ModuleConfig {
                    name: "gen".to_string(),
                    queue_size: None,
                    driver: DriverConfig::Generator(crate::drivers::GeneratorConfig::default()),
                },
                ModuleConfig {
                    name: "out".to_string(),
                    queue_size: Some(3),
                    driver: DriverConfig::FileOutput(crate::drivers::FileOutputConfig {
                        path: dir.path().join("out.log"),
                    }),
                },
            ],
            routes: vec![RouteSpec::new("r", &["gen", "out"])],
            ..Config::default()
        };
        config.validate().expect("valid");
        let scheduler = config.build_scheduler().expect("scheduler");
        assert!(dir.path().join("cache").is_dir());
        let out = scheduler.module_id("out").expect("out");
        assert_eq!(scheduler.queue(out).capacity(), 3);
        let gen = scheduler.module_id("gen").expect("gen");
        assert_eq!(scheduler.queue(gen).capacity(), DEFAULT_QUEUE_SIZE);
    }
}
