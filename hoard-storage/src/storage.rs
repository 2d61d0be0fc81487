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
    fmt::Debug,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use hoard_common::{
    error::{Error, Result},
    event::{Event, EventListener},
    fingerprint::Fingerprint,
    time,
};
use itertools::Itertools;
use rusqlite::{Connection, TransactionBehavior};

use crate::{
    eviction::{self, Evicted, EvictionPolicy},
    metadata::TOTAL_VALUE_SIZE,
    migrate::{self, Migration},
    record::{self, Item},
    statistics::Statistics,
};

/// Default size limit, 1 GiB.
pub const DEFAULT_SIZE_LIMIT: u64 = 1 << 30;

/// Default time a connection waits for the write lock held by another connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Entries that left the cache within one transaction, reported once it commits.
#[derive(Debug, Default)]
struct Leaves {
    leaves: Vec<(Event, String)>,
}

impl Leaves {
    fn extend(&mut self, event: Event, keys: impl IntoIterator<Item = String>) {
        self.leaves.extend(keys.into_iter().map(|key| (event, key)));
    }

    fn evicted(&mut self, evicted: Evicted) {
        self.extend(Event::Expire, evicted.expired);
        self.extend(Event::Evict, evicted.evicted);
    }
}

struct StorageInner {
    path: PathBuf,
    size_limit: i64,
    eviction_policy: EvictionPolicy,
    default_expiration: Option<Duration>,
    fingerprint: Fingerprint,
    busy_timeout: Duration,
    event_listener: Option<Arc<dyn EventListener>>,
    statistics: Arc<Statistics>,
}

/// A size-bounded key-value store persisted in a single SQLite file.
///
/// Every operation opens its own connection, runs inside one immediate transaction and commits before returning, so
/// clones of a [`Storage`] and other processes can share the file safely. Dropping a failed transaction rolls it back.
///
/// The sum of stored value lengths never exceeds the size limit after a write returns.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.inner.path)
            .field("size_limit", &self.inner.size_limit)
            .field("eviction_policy", &self.inner.eviction_policy)
            .field("default_expiration", &self.inner.default_expiration)
            .field("fingerprint", &self.inner.fingerprint)
            .field("busy_timeout", &self.inner.busy_timeout)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Read one live entry and record the access.
    pub fn get_one(&self, key: &str) -> Result<Option<Item>> {
        let mut items = self.get_many([key])?;
        Ok(items.remove(key))
    }

    /// Read the live subset of `keys` and record the accesses.
    ///
    /// Absent and expired keys are missing from the result. An empty `keys` returns an empty map.
    pub fn get_many<K>(&self, keys: impl IntoIterator<Item = K>) -> Result<HashMap<String, Item>>
    where
        K: AsRef<str>,
    {
        let keys = keys.into_iter().collect_vec();
        let keys = keys.iter().map(|key| key.as_ref()).unique().collect_vec();
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let now = time::now();
        let items = self.transact(|conn, _| record::get_items(conn, Some(keys.as_slice()), now))?;

        self.inner.statistics.record_hit(items.len());
        self.inner.statistics.record_miss(keys.len() - items.len());
        tracing::trace!(keys = keys.len(), hits = items.len(), "[storage]: get");

        Ok(items)
    }

    /// Read every live entry and record the accesses.
    pub fn get_all(&self) -> Result<HashMap<String, Item>> {
        let now = time::now();
        let items = self.transact(|conn, _| record::get_items(conn, None, now))?;

        self.inner.statistics.record_hit(items.len());
        tracing::trace!(hits = items.len(), "[storage]: get all");

        Ok(items)
    }

    /// Write one entry, replacing any entry with the same key.
    ///
    /// A value larger than the size limit is written and evicted again before this returns.
    pub fn set_one(&self, key: impl Into<String>, item: Item) -> Result<()> {
        self.set_many([(key.into(), item)])
    }

    /// Write a batch of entries atomically.
    ///
    /// Room for the batch is made before the write by evicting down to `size_limit - batch size`. When the batch alone
    /// exceeds the limit, a second pass evicts down to the limit after the write. A batch containing the same key
    /// twice fails with [`hoard_common::error::ErrorKind::InvalidArgument`] and writes nothing.
    pub fn set_many<K>(&self, items: impl IntoIterator<Item = (K, Item)>) -> Result<()>
    where
        K: AsRef<str>,
    {
        let items = items.into_iter().collect_vec();
        if items.is_empty() {
            return Ok(());
        }
        record::check_unique(&items)?;

        let items_size = items
            .iter()
            .map(|(_, item)| item.size() as i64)
            .fold(0i64, |acc, size| acc.saturating_add(size));
        let size_limit = self.inner.size_limit;
        let policy = self.inner.eviction_policy;
        let now = time::now();

        self.transact(|conn, leaves| {
            leaves.evicted(eviction::evict(
                conn,
                size_limit.saturating_sub(items_size),
                policy,
                now,
            )?);
            let replaced = record::set_items(conn, &items, self.inner.default_expiration, now)?;
            leaves.extend(Event::Replace, replaced);
            if items_size > size_limit {
                leaves.evicted(eviction::evict(conn, size_limit, policy, now)?);
            }
            Ok(())
        })?;

        self.inner.statistics.record_insert(items.len());
        tracing::trace!(items = items.len(), bytes = items_size, "[storage]: set");

        Ok(())
    }

    /// Live keys. Does not count as an access.
    pub fn get_keys(&self) -> Result<HashSet<String>> {
        let now = time::now();
        self.transact(|conn, _| record::get_keys(conn, None, now))
    }

    /// The live subset of `keys`. Does not count as an access.
    ///
    /// An empty `keys` returns an empty set.
    pub fn get_keys_in<K>(&self, keys: impl IntoIterator<Item = K>) -> Result<HashSet<String>>
    where
        K: AsRef<str>,
    {
        let keys = keys.into_iter().collect_vec();
        let keys = keys.iter().map(|key| key.as_ref()).collect_vec();
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let now = time::now();
        self.transact(|conn, _| record::get_keys(conn, Some(keys.as_slice()), now))
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove_one(&self, key: &str) -> Result<bool> {
        Ok(self.remove_many([key])? == 1)
    }

    /// Remove the given entries. Returns how many existed.
    pub fn remove_many<K>(&self, keys: impl IntoIterator<Item = K>) -> Result<usize>
    where
        K: AsRef<str>,
    {
        let keys = keys.into_iter().collect_vec();
        let keys = keys.iter().map(|key| key.as_ref()).collect_vec();
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.transact(|conn, leaves| {
            let removed = record::remove_items(conn, &keys)?;
            let count = removed.len();
            leaves.extend(Event::Remove, removed);
            Ok(count)
        })?;
        tracing::trace!(keys = keys.len(), removed, "[storage]: remove");
        Ok(removed)
    }

    /// Remove every entry. Returns how many entries were removed.
    pub fn clear(&self) -> Result<usize> {
        let cleared = self.transact(|conn, leaves| {
            let cleared = record::clear(conn)?;
            let count = cleared.len();
            leaves.extend(Event::Clear, cleared);
            Ok(count)
        })?;
        tracing::debug!(cleared, "[storage]: clear");
        Ok(cleared)
    }

    /// Sum of the lengths of all stored values in bytes, including expired entries not swept yet.
    pub fn total_value_size(&self) -> Result<u64> {
        let total = self.transact(|conn, _| TOTAL_VALUE_SIZE.get(conn))?;
        Ok(total.max(0) as u64)
    }

    /// Number of stored entries, including expired entries not swept yet.
    pub fn len(&self) -> Result<usize> {
        self.transact(|conn, _| record::count(conn))
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Size limit in bytes.
    pub fn size_limit(&self) -> u64 {
        self.inner.size_limit as u64
    }

    /// Eviction policy.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.inner.eviction_policy
    }

    /// Expiration applied to entries written without one.
    pub fn default_expiration(&self) -> Option<Duration> {
        self.inner.default_expiration
    }

    /// Runtime fingerprint stamped on the store.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.inner.fingerprint
    }

    /// Operation counters of this handle and its clones.
    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.inner.statistics
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.inner.path)?;
        conn.busy_timeout(self.inner.busy_timeout)?;
        Ok(conn)
    }

    /// Run `f` inside an immediate transaction on a fresh connection.
    ///
    /// Leave events are delivered only after a successful commit.
    fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection, &mut Leaves) -> Result<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut leaves = Leaves::default();
        let res = f(&tx, &mut leaves)?;
        tx.commit()?;
        self.notify(leaves);
        Ok(res)
    }

    fn notify(&self, leaves: Leaves) {
        let statistics = &self.inner.statistics;
        for (event, key) in leaves.leaves {
            match event {
                Event::Evict => statistics.record_evict(1),
                Event::Expire => statistics.record_expire(1),
                Event::Remove | Event::Clear => statistics.record_remove(1),
                Event::Replace => {}
            }
            if let Some(listener) = self.inner.event_listener.as_ref() {
                listener.on_leave(event, &key);
            }
        }
    }
}

/// Builder of [`Storage`].
pub struct StorageBuilder {
    path: PathBuf,
    size_limit: u64,
    eviction_policy: EvictionPolicy,
    default_expiration: Option<Duration>,
    fingerprint: Fingerprint,
    busy_timeout: Duration,
    event_listener: Option<Arc<dyn EventListener>>,
}

impl Debug for StorageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBuilder")
            .field("path", &self.path)
            .field("size_limit", &self.size_limit)
            .field("eviction_policy", &self.eviction_policy)
            .field("default_expiration", &self.default_expiration)
            .field("fingerprint", &self.fingerprint)
            .field("busy_timeout", &self.busy_timeout)
            .finish_non_exhaustive()
    }
}

impl StorageBuilder {
    /// Setup a storage backed by the SQLite file at `path`.
    ///
    /// The file is created if missing. Its directory must exist.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            size_limit: DEFAULT_SIZE_LIMIT,
            eviction_policy: EvictionPolicy::default(),
            default_expiration: None,
            fingerprint: Fingerprint::current(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            event_listener: None,
        }
    }

    /// Set the upper bound of the sum of stored value lengths in bytes.
    ///
    /// Must be positive and must not exceed `i64::MAX`.
    ///
    /// Default: [`DEFAULT_SIZE_LIMIT`].
    pub fn with_size_limit(mut self, size_limit: u64) -> Self {
        self.size_limit = size_limit;
        self
    }

    /// Set the eviction policy.
    ///
    /// Default: [`EvictionPolicy::LeastRecentlyUsed`].
    pub fn with_eviction_policy(mut self, eviction_policy: EvictionPolicy) -> Self {
        self.eviction_policy = eviction_policy;
        self
    }

    /// Set the expiration of entries written without one.
    ///
    /// Default: entries never expire.
    pub fn with_default_expiration(mut self, default_expiration: Duration) -> Self {
        self.default_expiration = Some(default_expiration);
        self
    }

    /// Override the runtime fingerprint.
    ///
    /// Opening a store last written with another fingerprint drops every entry. Include the version of whatever
    /// produces the stored bytes.
    ///
    /// Default: [`Fingerprint::current`].
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Set how long an operation waits for the write lock held by another connection before failing.
    ///
    /// Default: [`DEFAULT_BUSY_TIMEOUT`].
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Set the listener notified when entries leave the store.
    pub fn with_event_listener(mut self, event_listener: Arc<dyn EventListener>) -> Self {
        self.event_listener = Some(event_listener);
        self
    }

    /// Open the storage, migrate the schema and evict down to the size limit.
    pub fn build(self) -> Result<Storage> {
        if self.size_limit == 0 {
            return Err(Error::config("size limit must be positive").with_context("size_limit", self.size_limit));
        }
        let size_limit = i64::try_from(self.size_limit).map_err(|_| {
            Error::config("size limit must not exceed i64::MAX").with_context("size_limit", self.size_limit)
        })?;

        let inner = StorageInner {
            path: self.path,
            size_limit,
            eviction_policy: self.eviction_policy,
            default_expiration: self.default_expiration,
            fingerprint: self.fingerprint,
            busy_timeout: self.busy_timeout,
            event_listener: self.event_listener,
            statistics: Arc::<Statistics>::default(),
        };
        let storage = Storage { inner: Arc::new(inner) };

        let now = time::now();
        let migration = storage.transact(|conn, leaves| {
            let migration = migrate::run(conn, &storage.inner.fingerprint)?;
            leaves.evicted(eviction::evict(conn, size_limit, storage.inner.eviction_policy, now)?);
            Ok(migration)
        })?;

        match migration {
            Migration::Current => tracing::debug!("[storage]: open {:?}", storage.inner.path),
            migration => tracing::info!("[storage]: open {:?}, migration: {migration:?}", storage.inner.path),
        }

        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use hoard_common::error::ErrorKind;

    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        leaves: Mutex<Vec<(Event, String)>>,
    }

    impl EventListener for Recorder {
        fn on_leave(&self, reason: Event, key: &str) {
            self.leaves.lock().unwrap().push((reason, key.to_string()));
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<(Event, String)> {
            std::mem::take(&mut *self.leaves.lock().unwrap())
        }
    }

    fn leave(event: Event, key: &str) -> (Event, String) {
        (event, key.to_string())
    }

    #[test_log::test]
    fn test_size_limit_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let err = StorageBuilder::new(dir.path().join("cache.db"))
            .with_size_limit(u64::MAX)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(!dir.path().join("cache.db").exists());
    }

    #[test_log::test]
    fn test_zero_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let err = StorageBuilder::new(dir.path().join("cache.db"))
            .with_size_limit(0)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(!dir.path().join("cache.db").exists());

        let storage = StorageBuilder::new(dir.path().join("cache.db"))
            .with_size_limit(1)
            .build()
            .unwrap();
        assert_eq!(storage.size_limit(), 1);
    }

    #[test_log::test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = StorageBuilder::new(dir.path().join("missing").join("cache.db"))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test_log::test]
    fn test_events_and_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let storage = StorageBuilder::new(dir.path().join("cache.db"))
            .with_size_limit(6)
            .with_eviction_policy(EvictionPolicy::FirstInFirstOut)
            .with_event_listener(recorder.clone())
            .build()
            .unwrap();

        storage.set_one("a", Item::new(b"12".to_vec())).unwrap();
        storage.set_one("b", Item::new(b"34".to_vec())).unwrap();
        storage.set_one("a", Item::new(b"1".to_vec())).unwrap();
        assert_eq!(recorder.take(), vec![leave(Event::Replace, "a")]);

        // Making room for 4 bytes evicts the oldest write, which is b since a was rewritten.
        storage.set_one("c", Item::new(b"5678".to_vec())).unwrap();
        assert_eq!(recorder.take(), vec![leave(Event::Evict, "b")]);
        assert_eq!(storage.total_value_size().unwrap(), 5);

        assert!(storage.remove_one("a").unwrap());
        assert!(!storage.remove_one("a").unwrap());
        assert_eq!(recorder.take(), vec![leave(Event::Remove, "a")]);

        storage.get_many(["c", "missing", "c"]).unwrap();
        assert_eq!(storage.clear().unwrap(), 1);
        assert_eq!(recorder.take(), vec![leave(Event::Clear, "c")]);

        let statistics = storage.statistics();
        assert_eq!(statistics.insert(), 4);
        assert_eq!(statistics.evict(), 1);
        assert_eq!(statistics.remove(), 2);
        assert_eq!(statistics.hit(), 1);
        assert_eq!(statistics.miss(), 1);
        assert_eq!(statistics.expire(), 0);
    }

    #[test_log::test]
    fn test_events_are_dropped_on_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let storage = StorageBuilder::new(dir.path().join("cache.db"))
            .with_size_limit(4)
            .with_event_listener(recorder.clone())
            .build()
            .unwrap();

        storage.set_one("a", Item::new(b"1234".to_vec())).unwrap();
        let err = storage
            .transact(|conn, leaves| {
                leaves.evicted(eviction::evict(conn, 0, EvictionPolicy::LeastRecentlyUsed, time::now())?);
                Err::<(), _>(Error::invalid_argument("abort"))
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(recorder.take().is_empty());
        assert_eq!(storage.get_keys().unwrap(), HashSet::from(["a".to_string()]));
        assert_eq!(storage.total_value_size().unwrap(), 4);
    }

    #[test_log::test]
    fn test_clones_share_state() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageBuilder::new(dir.path().join("cache.db")).build().unwrap();
        let clone = storage.clone();

        storage.set_one("a", Item::new(b"1".to_vec())).unwrap();
        assert_eq!(clone.get_one("a").unwrap(), Some(Item::new(b"1".to_vec())));
        assert_eq!(storage.statistics().hit(), 1);
        assert_eq!(clone.len().unwrap(), 1);
        assert!(!clone.is_empty().unwrap());
    }

    #[test_log::test]
    fn test_shrinking_limit_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let storage = StorageBuilder::new(&path).build().unwrap();
        storage
            .set_many([
                ("a", Item::new(b"111".to_vec())),
                ("b", Item::new(b"222".to_vec())),
                ("c", Item::new(b"333".to_vec())),
            ])
            .unwrap();
        drop(storage);

        let storage = StorageBuilder::new(&path)
            .with_size_limit(4)
            .with_eviction_policy(EvictionPolicy::LastInFirstOut)
            .build()
            .unwrap();
        assert_eq!(storage.get_keys().unwrap(), HashSet::from(["a".to_string()]));
        assert_eq!(storage.total_value_size().unwrap(), 3);
    }
}
