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

//! Row level operations on the `cache` table.
//!
//! Every row mutation goes through `insert` or `delete`, which keep `total_value_size` in step with the rows
//! inside the caller's transaction. [`clear`] is the only bulk path and resets the aggregate explicitly.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use hoard_common::{
    error::{Error, Result},
    time::{self, Timestamp},
};
use itertools::Itertools;
use rusqlite::{params, types::ToSql, Connection, OptionalExtension};

use crate::metadata::TOTAL_VALUE_SIZE;

/// Upper bound of keys bound into a single `IN (...)` list.
const KEYS_PER_STATEMENT: usize = 500;

const LIVE: &str = "(expires_at IS NULL OR expires_at > ?1)";

/// A cache value with its expiration.
///
/// On write, `expiration` is relative to the write instant. On read, it is the time left before the entry expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// The opaque payload.
    pub value: Vec<u8>,
    /// Time to live, `None` for entries that never expire.
    pub expiration: Option<Duration>,
}

impl Item {
    /// Create an item without expiration.
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
            expiration: None,
        }
    }

    /// Set the time to live of the item.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Size of the payload in bytes, as accounted against the size limit.
    pub fn size(&self) -> usize {
        self.value.len()
    }
}

impl From<Vec<u8>> for Item {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

impl From<&[u8]> for Item {
    fn from(value: &[u8]) -> Self {
        Self::new(value)
    }
}

/// Insert a fresh row. The key must not exist.
fn insert(conn: &Connection, key: &str, value: &[u8], now: Timestamp, expires_at: Option<Timestamp>) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO cache (key, value, accessed_at, access_count, expires_at) VALUES (?1, ?2, ?3, 0, ?4)",
    )?
    .execute(params![key, value, now, expires_at])?;
    TOTAL_VALUE_SIZE.adjust(conn, value.len() as i64)?;
    Ok(())
}

/// Delete a row, returning the size of its value if it existed.
pub(crate) fn delete(conn: &Connection, key: &str) -> Result<Option<i64>> {
    let size: Option<i64> = conn
        .prepare_cached("SELECT LENGTH(value) FROM cache WHERE key = ?1")?
        .query_row([key], |row| row.get(0))
        .optional()?;
    let Some(size) = size else {
        return Ok(None);
    };
    conn.prepare_cached("DELETE FROM cache WHERE key = ?1")?.execute([key])?;
    TOTAL_VALUE_SIZE.adjust(conn, -size)?;
    Ok(Some(size))
}

/// Read live entries and record the access.
///
/// `None` reads every live entry. `Some(keys)` reads the live subset of `keys`; an empty slice never touches the
/// table.
pub fn get_items(conn: &Connection, keys: Option<&[&str]>, now: Timestamp) -> Result<HashMap<String, Item>> {
    let mut items = HashMap::new();

    match keys {
        None => {
            let sql = format!("SELECT key, value, expires_at FROM cache WHERE {LIVE}");
            collect_items(conn, &sql, &[&now as &dyn ToSql], now, &mut items)?;
            conn.prepare_cached(&format!(
                "UPDATE cache SET accessed_at = ?1, access_count = access_count + 1 WHERE {LIVE}"
            ))?
            .execute([now])?;
        }
        Some(keys) => {
            let keys = keys.iter().unique().collect_vec();
            for chunk in keys.chunks(KEYS_PER_STATEMENT) {
                let sql = format!(
                    "SELECT key, value, expires_at FROM cache WHERE {LIVE} AND key IN ({})",
                    placeholders(2, chunk.len())
                );
                let params = bind(&now, chunk);
                collect_items(conn, &sql, &params, now, &mut items)?;
            }
            let mut touch =
                conn.prepare_cached("UPDATE cache SET accessed_at = ?1, access_count = access_count + 1 WHERE key = ?2")?;
            for key in items.keys() {
                touch.execute(params![now, key])?;
            }
        }
    }

    Ok(items)
}

fn collect_items(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
    now: Timestamp,
    items: &mut HashMap<String, Item>,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, |row| {
        let key: String = row.get(0)?;
        let value: Vec<u8> = row.get(1)?;
        let expires_at: Option<Timestamp> = row.get(2)?;
        Ok((key, value, expires_at))
    })?;
    for row in rows {
        let (key, value, expires_at) = row?;
        let item = Item {
            value,
            expiration: expires_at.map(|deadline| time::remaining(deadline, now)),
        };
        items.insert(key, item);
    }
    Ok(())
}

/// Live keys, optionally restricted to `filter`. Does not count as an access.
pub fn get_keys(conn: &Connection, filter: Option<&[&str]>, now: Timestamp) -> Result<HashSet<String>> {
    let mut keys = HashSet::new();

    match filter {
        None => {
            let sql = format!("SELECT key FROM cache WHERE {LIVE}");
            collect_keys(conn, &sql, &[&now as &dyn ToSql], &mut keys)?;
        }
        Some(filter) => {
            let filter = filter.iter().unique().collect_vec();
            for chunk in filter.chunks(KEYS_PER_STATEMENT) {
                let sql = format!(
                    "SELECT key FROM cache WHERE {LIVE} AND key IN ({})",
                    placeholders(2, chunk.len())
                );
                let params = bind(&now, chunk);
                collect_keys(conn, &sql, &params, &mut keys)?;
            }
        }
    }

    Ok(keys)
}

fn collect_keys(conn: &Connection, sql: &str, params: &[&dyn ToSql], keys: &mut HashSet<String>) -> Result<()> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
    for key in rows {
        keys.insert(key?);
    }
    Ok(())
}

/// Write every item, replacing existing entries. Returns the keys that were replaced.
///
/// Fails with [`hoard_common::error::ErrorKind::InvalidArgument`] before touching the table if a key appears twice.
pub fn set_items<K>(
    conn: &Connection,
    items: &[(K, Item)],
    default_expiration: Option<Duration>,
    now: Timestamp,
) -> Result<Vec<String>>
where
    K: AsRef<str>,
{
    check_unique(items)?;

    let mut replaced = vec![];
    for (key, item) in items {
        let key = key.as_ref();
        if delete(conn, key)?.is_some() {
            replaced.push(key.to_string());
        }
        let expires_at = item
            .expiration
            .or(default_expiration)
            .map(|ttl| time::deadline(now, ttl));
        insert(conn, key, &item.value, now, expires_at)?;
    }
    Ok(replaced)
}

/// Fail with [`hoard_common::error::ErrorKind::InvalidArgument`] if a key appears twice in a write batch.
pub fn check_unique<K>(items: &[(K, Item)]) -> Result<()>
where
    K: AsRef<str>,
{
    match items.iter().map(|(key, _)| key.as_ref()).duplicates().next() {
        Some(key) => Err(Error::invalid_argument("duplicate key in write batch").with_context("key", key)),
        None => Ok(()),
    }
}

/// Delete the given keys. Returns the keys that existed.
pub fn remove_items(conn: &Connection, keys: &[&str]) -> Result<Vec<String>> {
    let mut removed = vec![];
    for key in keys.iter().unique() {
        if delete(conn, key)?.is_some() {
            removed.push(key.to_string());
        }
    }
    Ok(removed)
}

/// Delete every entry whose deadline has passed at `now`. Returns the removed keys, earliest deadline first.
pub fn remove_expired(conn: &Connection, now: Timestamp) -> Result<Vec<String>> {
    let keys = conn
        .prepare_cached(
            "SELECT key FROM cache WHERE expires_at IS NOT NULL AND expires_at <= ?1 ORDER BY expires_at ASC, key ASC",
        )?
        .query_map([now], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for key in &keys {
        delete(conn, key)?;
    }
    Ok(keys)
}

/// Delete every entry and reset the aggregate. Returns the removed keys in insertion order.
pub fn clear(conn: &Connection) -> Result<Vec<String>> {
    let keys = conn
        .prepare_cached("SELECT key FROM cache ORDER BY rowid ASC")?
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    conn.execute("DELETE FROM cache", [])?;
    TOTAL_VALUE_SIZE.set(conn, &0)?;
    Ok(keys)
}

/// Number of stored rows, including expired rows that have not been swept yet.
pub fn count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn
        .prepare_cached("SELECT COUNT(*) FROM cache")?
        .query_row([], |row| row.get(0))?;
    Ok(count as usize)
}

/// Recompute the value size sum from the rows.
pub fn sum_value_size(conn: &Connection) -> Result<i64> {
    let sum = conn
        .prepare_cached("SELECT COALESCE(SUM(LENGTH(value)), 0) FROM cache")?
        .query_row([], |row| row.get(0))?;
    Ok(sum)
}

/// `?{start}, ?{start + 1}, ...` with `n` entries.
fn placeholders(start: usize, n: usize) -> String {
    (start..start + n).map(|i| format!("?{i}")).join(", ")
}

fn bind<'a>(now: &'a Timestamp, keys: &'a [&&str]) -> Vec<&'a dyn ToSql> {
    std::iter::once(now as &dyn ToSql)
        .chain(keys.iter().map(|key| *key as &dyn ToSql))
        .collect()
}

#[cfg(test)]
mod tests {
    use hoard_common::{error::ErrorKind, fingerprint::Fingerprint};

    use super::*;
    use crate::migrate;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate::run(&conn, &Fingerprint::current()).unwrap();
        conn
    }

    fn assert_aggregate(conn: &Connection) {
        assert_eq!(TOTAL_VALUE_SIZE.get(conn).unwrap(), sum_value_size(conn).unwrap());
    }

    fn access(conn: &Connection, key: &str) -> (f64, i64) {
        conn.query_row(
            "SELECT accessed_at, access_count FROM cache WHERE key = ?1",
            [key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap()
    }

    #[test]
    fn test_set_and_get() {
        let conn = open();
        let replaced = set_items(
            &conn,
            &[("a", Item::new(b"123".to_vec())), ("b", Item::new(b"4567".to_vec()))],
            None,
            100.0,
        )
        .unwrap();
        assert!(replaced.is_empty());
        assert_eq!(TOTAL_VALUE_SIZE.get(&conn).unwrap(), 7);

        let items = get_items(&conn, Some(&["a", "c"][..]), 101.0).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items["a"], Item::new(b"123".to_vec()));
        assert_eq!(access(&conn, "a"), (101.0, 1));
        assert_eq!(access(&conn, "b"), (100.0, 0));
        assert_aggregate(&conn);
    }

    #[test]
    fn test_duplicate_keys_in_read_count_once() {
        let conn = open();
        set_items(&conn, &[("a", Item::new(b"1".to_vec()))], None, 100.0).unwrap();
        get_items(&conn, Some(&["a", "a"][..]), 101.0).unwrap();
        assert_eq!(access(&conn, "a").1, 1);
    }

    #[test]
    fn test_replace_resets_access() {
        let conn = open();
        set_items(&conn, &[("a", Item::new(b"123".to_vec()))], None, 100.0).unwrap();
        get_items(&conn, Some(&["a"][..]), 101.0).unwrap();
        get_items(&conn, None, 102.0).unwrap();
        assert_eq!(access(&conn, "a"), (102.0, 2));

        let replaced = set_items(&conn, &[("a", Item::new(b"12".to_vec()))], None, 103.0).unwrap();
        assert_eq!(replaced, vec!["a".to_string()]);
        assert_eq!(access(&conn, "a"), (103.0, 0));
        assert_eq!(TOTAL_VALUE_SIZE.get(&conn).unwrap(), 2);
        assert_aggregate(&conn);
    }

    #[test]
    fn test_duplicate_keys_in_write_batch() {
        let conn = open();
        let err = set_items(
            &conn,
            &[("a", Item::new(b"1".to_vec())), ("a", Item::new(b"2".to_vec()))],
            None,
            100.0,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_empty_key_lists() {
        let conn = open();
        set_items(&conn, &[("a", Item::new(b"1".to_vec()))], None, 100.0).unwrap();

        assert!(get_items(&conn, Some(&[][..]), 101.0).unwrap().is_empty());
        assert!(get_keys(&conn, Some(&[][..]), 101.0).unwrap().is_empty());
        assert_eq!(access(&conn, "a").1, 0);

        assert_eq!(get_items(&conn, None, 101.0).unwrap().len(), 1);
        assert_eq!(get_keys(&conn, None, 101.0).unwrap().len(), 1);
    }

    #[test]
    fn test_expiration() {
        let conn = open();
        set_items(
            &conn,
            &[
                ("short", Item::new(b"1".to_vec()).with_expiration(Duration::from_secs(10))),
                ("default", Item::new(b"22".to_vec())),
            ],
            Some(Duration::from_secs(20)),
            100.0,
        )
        .unwrap();
        set_items(&conn, &[("forever", Item::new(b"333".to_vec()))], None, 100.0).unwrap();

        let items = get_items(&conn, None, 104.0).unwrap();
        assert_eq!(items["short"].expiration, Some(Duration::from_secs(6)));
        assert_eq!(items["default"].expiration, Some(Duration::from_secs(16)));
        assert_eq!(items["forever"].expiration, None);

        // Expired rows are hidden from reads before they are swept.
        let items = get_items(&conn, Some(&["short", "default"][..]), 110.0).unwrap();
        assert_eq!(items.keys().collect_vec(), vec!["default"]);
        let keys = get_keys(&conn, None, 110.0).unwrap();
        assert_eq!(keys, HashSet::from(["default".to_string(), "forever".to_string()]));
        assert_eq!(count(&conn).unwrap(), 3);

        let expired = remove_expired(&conn, 120.0).unwrap();
        assert_eq!(expired, vec!["short".to_string(), "default".to_string()]);
        assert_eq!(count(&conn).unwrap(), 1);
        assert_aggregate(&conn);
    }

    #[test]
    fn test_longest_expiration_stays_live() {
        let conn = open();
        set_items(
            &conn,
            &[("k", Item::new(b"v".to_vec()).with_expiration(Duration::MAX))],
            None,
            100.0,
        )
        .unwrap();

        let items = get_items(&conn, Some(&["k"][..]), 101.0).unwrap();
        assert_eq!(items["k"].expiration, Some(Duration::MAX));
        assert!(remove_expired(&conn, 101.0).unwrap().is_empty());
    }

    #[test]
    fn test_remove_and_clear() {
        let conn = open();
        set_items(
            &conn,
            &[
                ("a", Item::new(b"1".to_vec())),
                ("b", Item::new(b"22".to_vec())),
                ("c", Item::new(b"333".to_vec())),
            ],
            None,
            100.0,
        )
        .unwrap();

        let removed = remove_items(&conn, &["a", "missing", "a"]).unwrap();
        assert_eq!(removed, vec!["a".to_string()]);
        assert_eq!(TOTAL_VALUE_SIZE.get(&conn).unwrap(), 5);

        let cleared = clear(&conn).unwrap();
        assert_eq!(cleared, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(TOTAL_VALUE_SIZE.get(&conn).unwrap(), 0);
        assert_eq!(count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_many_keys_span_statements() {
        let conn = open();
        let items = (0..KEYS_PER_STATEMENT * 2 + 7)
            .map(|i| (format!("key-{i}"), Item::new(vec![0u8; i % 5])))
            .collect_vec();
        set_items(&conn, &items, None, 100.0).unwrap();

        let keys = items.iter().map(|(key, _)| key.as_str()).collect_vec();
        assert_eq!(get_items(&conn, Some(keys.as_slice()), 101.0).unwrap().len(), items.len());
        assert_eq!(get_keys(&conn, Some(keys.as_slice()), 101.0).unwrap().len(), items.len());
        assert_aggregate(&conn);
    }
}
