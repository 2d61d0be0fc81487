// Copyright 2026 hoard Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use hoard_common::{
    error::{Error, Result},
    event::EventListener,
    fingerprint::Fingerprint,
};
use hoard_storage::{
    EvictionPolicy, Item, Statistics, Storage, StorageBuilder, DEFAULT_BUSY_TIMEOUT, DEFAULT_SIZE_LIMIT,
};
use serde::{Deserialize, Serialize};

use crate::barrier::Barrier;

/// An embedded key-value cache persisted on disk with a bounded total value size.
///
/// [`Cache`] is cheap to clone. All clones share the same file, counters and barrier.
#[derive(Debug, Clone)]
pub struct Cache {
    pub(crate) storage: Storage,
    pub(crate) barrier: Arc<Barrier>,
}

impl Cache {
    /// Read one live entry.
    pub fn get_one(&self, key: &str) -> Result<Option<Item>> {
        self.storage.get_one(key)
    }

    /// Read the live subset of `keys`.
    pub fn get_many<K>(&self, keys: impl IntoIterator<Item = K>) -> Result<HashMap<String, Item>>
    where
        K: AsRef<str>,
    {
        self.storage.get_many(keys)
    }

    /// Read every live entry.
    pub fn get_all(&self) -> Result<HashMap<String, Item>> {
        self.storage.get_all()
    }

    /// Write one entry.
    pub fn set_one(&self, key: impl Into<String>, item: Item) -> Result<()> {
        self.storage.set_one(key, item)
    }

    /// Write a batch of entries atomically.
    pub fn set_many<K>(&self, items: impl IntoIterator<Item = (K, Item)>) -> Result<()>
    where
        K: AsRef<str>,
    {
        self.storage.set_many(items)
    }

    /// Live keys.
    pub fn get_keys(&self) -> Result<HashSet<String>> {
        self.storage.get_keys()
    }

    /// The live subset of `keys`.
    pub fn get_keys_in<K>(&self, keys: impl IntoIterator<Item = K>) -> Result<HashSet<String>>
    where
        K: AsRef<str>,
    {
        self.storage.get_keys_in(keys)
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove_one(&self, key: &str) -> Result<bool> {
        self.storage.remove_one(key)
    }

    /// Remove the given entries. Returns how many existed.
    pub fn remove_many<K>(&self, keys: impl IntoIterator<Item = K>) -> Result<usize>
    where
        K: AsRef<str>,
    {
        self.storage.remove_many(keys)
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<usize> {
        self.storage.clear()
    }

    /// Sum of the lengths of all stored values in bytes.
    pub fn total_value_size(&self) -> Result<u64> {
        self.storage.total_value_size()
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<usize> {
        self.storage.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        self.storage.is_empty()
    }

    /// Operation counters.
    pub fn statistics(&self) -> &Arc<Statistics> {
        self.storage.statistics()
    }

    /// The underlying storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The per-key barrier [`Cache::fetch`] holds while computing a missing value.
    ///
    /// Holding a key here delays fetches of that key in this process until the guard is dropped.
    pub fn barrier(&self) -> &Barrier {
        &self.barrier
    }
}

/// Builder of [`Cache`].
#[derive(Debug)]
pub struct CacheBuilder {
    path: PathBuf,
    create_dir: bool,
    storage: StorageBuilder,
}

impl CacheBuilder {
    /// Setup a cache backed by the SQLite file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            storage: StorageBuilder::new(&path),
            path,
            create_dir: true,
        }
    }

    /// Set the upper bound of the sum of stored value lengths in bytes.
    ///
    /// Default: 1 GiB.
    pub fn with_size_limit(mut self, size_limit: u64) -> Self {
        self.storage = self.storage.with_size_limit(size_limit);
        self
    }

    /// Set the eviction policy.
    ///
    /// Default: [`EvictionPolicy::LeastRecentlyUsed`].
    pub fn with_eviction_policy(mut self, eviction_policy: EvictionPolicy) -> Self {
        self.storage = self.storage.with_eviction_policy(eviction_policy);
        self
    }

    /// Set the expiration of entries written without one.
    pub fn with_default_expiration(mut self, default_expiration: Duration) -> Self {
        self.storage = self.storage.with_default_expiration(default_expiration);
        self
    }

    /// Override the runtime fingerprint. See [`StorageBuilder::with_fingerprint`].
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.storage = self.storage.with_fingerprint(fingerprint);
        self
    }

    /// Set how long an operation waits for the write lock held by another connection.
    ///
    /// Default: 5 seconds.
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.storage = self.storage.with_busy_timeout(busy_timeout);
        self
    }

    /// Set the listener notified when entries leave the cache.
    pub fn with_event_listener(mut self, event_listener: Arc<dyn EventListener>) -> Self {
        self.storage = self.storage.with_event_listener(event_listener);
        self
    }

    /// Create the directory containing the file if it is missing.
    ///
    /// Default: `true`.
    pub fn with_create_dir(mut self, create_dir: bool) -> Self {
        self.create_dir = create_dir;
        self
    }

    /// Open the cache.
    pub fn build(self) -> Result<Cache> {
        if self.create_dir {
            if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir).map_err(|e| Error::from(e).with_context("dir", dir.display()))?;
            }
        }

        let storage = self.storage.build()?;
        tracing::info!(
            "[cache]: open {:?}, size limit: {}, eviction policy: {}",
            storage.path(),
            storage.size_limit(),
            storage.eviction_policy()
        );

        Ok(Cache {
            storage,
            barrier: Arc::<Barrier>::default(),
        })
    }
}

/// Serializable configuration of a [`Cache`].
///
/// ```
/// # use hoard::CacheConfig;
/// let config: CacheConfig = serde_json::from_str(
///     r#"{ "path": "/tmp/hoard/cache.db", "size_limit": 1048576, "eviction_policy": "least-frequently-used" }"#,
/// )
/// .unwrap();
/// assert_eq!(config.size_limit, 1 << 20);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Path of the database file.
    pub path: PathBuf,
    /// Upper bound of the sum of stored value lengths in bytes.
    #[serde(default = "default_size_limit")]
    pub size_limit: u64,
    /// Eviction policy, by kebab-case name.
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,
    /// Expiration in seconds of entries written without one.
    #[serde(default)]
    pub default_expiration_secs: Option<f64>,
    /// Create the directory containing the file if it is missing.
    #[serde(default = "default_create_dir")]
    pub create_dir: bool,
    /// Time in milliseconds an operation waits for the write lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Runtime fingerprint override.
    #[serde(default)]
    pub fingerprint: Option<Fingerprint>,
}

fn default_size_limit() -> u64 {
    DEFAULT_SIZE_LIMIT
}

fn default_create_dir() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT.as_millis() as u64
}

impl CacheConfig {
    /// Create a configuration with default settings for the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size_limit: default_size_limit(),
            eviction_policy: EvictionPolicy::default(),
            default_expiration_secs: None,
            create_dir: default_create_dir(),
            busy_timeout_ms: default_busy_timeout_ms(),
            fingerprint: None,
        }
    }

    /// Validate the configuration and turn it into a builder.
    pub fn into_builder(self) -> Result<CacheBuilder> {
        let mut builder = CacheBuilder::new(&self.path)
            .with_size_limit(self.size_limit)
            .with_eviction_policy(self.eviction_policy)
            .with_create_dir(self.create_dir)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms));
        if let Some(secs) = self.default_expiration_secs {
            let expiration = Duration::try_from_secs_f64(secs).map_err(|e| {
                Error::config("invalid default expiration")
                    .with_context("default_expiration_secs", secs)
                    .with_source(e)
            })?;
            builder = builder.with_default_expiration(expiration);
        }
        if let Some(fingerprint) = self.fingerprint {
            builder = builder.with_fingerprint(fingerprint);
        }
        Ok(builder)
    }

    /// Validate the configuration and open the cache.
    pub fn build(self) -> Result<Cache> {
        self.into_builder()?.build()
    }
}

#[cfg(test)]
mod tests {
    use hoard_common::error::ErrorKind;

    use super::*;

    #[test]
    fn test_cache_is_send_sync_static() {
        fn is_send_sync_static<T: Send + Sync + 'static>() {}
        is_send_sync_static::<Cache>();
    }

    #[test_log::test]
    fn test_create_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("cache.db");

        let err = CacheBuilder::new(&path).with_create_dir(false).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);

        let cache = CacheBuilder::new(&path).build().unwrap();
        assert!(path.exists());
        assert!(cache.is_empty().unwrap());
    }

    #[test_log::test]
    fn test_config_defaults() {
        let config: CacheConfig = serde_json::from_str(r#"{ "path": "cache.db" }"#).unwrap();
        assert_eq!(config, CacheConfig::new("cache.db"));
        assert_eq!(config.size_limit, 1 << 30);
        assert_eq!(config.eviction_policy, EvictionPolicy::LeastRecentlyUsed);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert!(config.create_dir);
    }

    #[test_log::test]
    fn test_config_rejects_unknown_policy() {
        let res = serde_json::from_str::<CacheConfig>(r#"{ "path": "cache.db", "eviction_policy": "random" }"#);
        assert!(res.is_err());
    }

    #[test_log::test]
    fn test_config_build() {
        let dir = tempfile::tempdir().unwrap();
        let json = serde_json::json!({
            "path": dir.path().join("nested").join("cache.db"),
            "size_limit": 10,
            "eviction_policy": "last-in-first-out",
            "default_expiration_secs": 60.0,
            "fingerprint": ["my-app", "2"],
        });
        let config: CacheConfig = serde_json::from_value(json).unwrap();
        let cache = config.build().unwrap();

        assert_eq!(cache.storage().size_limit(), 10);
        assert_eq!(cache.storage().eviction_policy(), EvictionPolicy::LastInFirstOut);
        assert_eq!(cache.storage().default_expiration(), Some(Duration::from_secs(60)));
        assert_eq!(cache.storage().fingerprint(), &Fingerprint::new(["my-app", "2"]));
    }

    #[test_log::test]
    fn test_config_invalid_values() {
        let dir = tempfile::tempdir().unwrap();

        let mut config = CacheConfig::new(dir.path().join("cache.db"));
        config.default_expiration_secs = Some(-1.0);
        assert_eq!(config.build().unwrap_err().kind(), ErrorKind::Config);

        let mut config = CacheConfig::new(dir.path().join("cache.db"));
        config.size_limit = u64::MAX;
        assert_eq!(config.build().unwrap_err().kind(), ErrorKind::Config);

        let mut config = CacheConfig::new(dir.path().join("cache.db"));
        config.size_limit = 0;
        assert_eq!(config.build().unwrap_err().kind(), ErrorKind::Config);
    }
}
