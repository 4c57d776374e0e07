// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Small JSON key/value store that survives restarts.
//!
//! Drivers keep resumption state here (e.g. file offsets). The store is loaded
//! once at startup and written back at shutdown.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::constants::CONFIG_CACHE_FILE;
use crate::errors::CacheError;

#[derive(Debug, Default)]
pub struct ConfigCache {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl ConfigCache {
    /// A cache that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads `<dir>/configcache.json`. A missing file yields an empty cache.
    pub fn load(dir: &Path) -> Result<Self, CacheError> {
        let path = dir.join(CONFIG_CACHE_FILE);
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| CacheError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        debug!("CACHE | loaded {} entries from {}", values.len(), path.display());
        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
        })
    }

    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.lock().get(key).cloned()?;
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("CACHE | ignoring malformed entry '{key}': {e}");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: &T) {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.lock().insert(key, value);
            }
            Err(e) => warn!("CACHE | cannot store entry '{key}': {e}"),
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Writes the cache next to its final path and renames it into place.
    /// In-memory caches are not saved.
    pub fn save(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = {
            let values = self.lock();
            serde_json::to_vec_pretty(&*values).map_err(|source| CacheError::Json {
                path: path.clone(),
                source,
            })?
        };
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|source| CacheError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, serde_json::Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
