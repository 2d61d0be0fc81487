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

//! Typed sidecar values stored in the `metadata` table next to the entries.
//!
//! Values are kept as their canonical text representation so the file stays inspectable with any SQLite client.

use std::{fmt::Display, str::FromStr};

use hoard_common::{
    error::{Error, ErrorKind, Result},
    fingerprint::Fingerprint,
};
use itertools::Itertools;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

/// A well-known metadata key with its text codec.
pub struct Metadata<T> {
    key: &'static str,
    dump: fn(&T) -> Result<String>,
    load: fn(&str) -> Result<T>,
}

impl<T> Metadata<T> {
    /// Define a metadata key.
    pub const fn new(key: &'static str, dump: fn(&T) -> Result<String>, load: fn(&str) -> Result<T>) -> Self {
        Self { key, dump, load }
    }

    /// Name of the metadata key.
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Read the value.
    ///
    /// Fails with [`ErrorKind::NotFound`] if the key is absent. Use [`Metadata::exists`] first when absence is
    /// expected.
    pub fn get(&self, conn: &Connection) -> Result<T> {
        let raw: Option<String> = conn
            .prepare_cached("SELECT value FROM metadata WHERE key = ?1")?
            .query_row([self.key], |row| row.get(0))
            .optional()?;
        match raw {
            Some(raw) => (self.load)(&raw).map_err(|e| e.with_context("key", self.key)),
            None => Err(Error::metadata_not_found(self.key)),
        }
    }

    /// Insert or overwrite the value.
    pub fn set(&self, conn: &Connection, value: &T) -> Result<()> {
        let raw = (self.dump)(value)?;
        conn.prepare_cached("INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)")?
            .execute([self.key, raw.as_str()])?;
        Ok(())
    }

    /// Check whether the value exists.
    ///
    /// Returns `false` when the metadata table itself has not been created yet.
    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        if !table_exists(conn)? {
            return Ok(false);
        }
        let found = conn
            .prepare_cached("SELECT 1 FROM metadata WHERE key = ?1")?
            .exists([self.key])?;
        Ok(found)
    }
}

impl Metadata<i64> {
    /// Add `delta` to the stored integer in a single statement.
    ///
    /// The update happens inside the caller's transaction, so concurrent writers never lose an increment.
    pub fn adjust(&self, conn: &Connection, delta: i64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        let updated = conn
            .prepare_cached("UPDATE metadata SET value = CAST(CAST(value AS INTEGER) + ?2 AS TEXT) WHERE key = ?1")?
            .execute(rusqlite::params![self.key, delta])?;
        if updated == 0 {
            return Err(Error::metadata_not_found(self.key));
        }
        Ok(())
    }
}

/// Schema version of the store.
pub const SCHEMA_VERSION: Metadata<u32> = Metadata::new("schema_version", dump_display, load_parse);

/// Fingerprint of the runtime that last opened the store.
pub const RUNTIME_VERSION: Metadata<Fingerprint> = Metadata::new("runtime_version", dump_json, load_json);

/// Sum of the byte lengths of all stored values.
pub const TOTAL_VALUE_SIZE: Metadata<i64> = Metadata::new("total_value_size", dump_display, load_parse);

/// Delete every metadata key except the given ones.
pub(crate) fn retain(conn: &Connection, keys: &[&str]) -> Result<usize> {
    let sql = if keys.is_empty() {
        "DELETE FROM metadata".to_string()
    } else {
        format!(
            "DELETE FROM metadata WHERE key NOT IN ({})",
            keys.iter().map(|_| "?").join(", ")
        )
    };
    let deleted = conn.execute(&sql, params_from_iter(keys))?;
    Ok(deleted)
}

fn table_exists(conn: &Connection) -> Result<bool> {
    let exists = conn
        .prepare_cached("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'metadata'")?
        .exists([])?;
    Ok(exists)
}

fn dump_display<T: Display>(value: &T) -> Result<String> {
    Ok(value.to_string())
}

fn load_parse<T>(raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>().map_err(|e| {
        Error::new(ErrorKind::Parse, "malformed metadata value")
            .with_context("value", raw)
            .with_context("reason", e)
    })
}

fn dump_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn load_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}
