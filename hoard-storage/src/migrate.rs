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

//! Schema versioning of the persisted store.
//!
//! Upgrade steps are applied in order, each one moving the schema from version `i` to `i + 1`. Every step must be
//! idempotent: a step interrupted before the version bump is simply applied again on the next open.

use hoard_common::{error::Result, fingerprint::Fingerprint};
use rusqlite::Connection;

use crate::{
    metadata::{self, RUNTIME_VERSION, SCHEMA_VERSION, TOTAL_VALUE_SIZE},
    record,
};

type Upgrade = fn(&Connection) -> Result<()>;

/// Upgrade steps, `UPGRADES[i]` moves the schema from version `i` to `i + 1`.
const UPGRADES: &[Upgrade] = &[create_tables, create_indexes];

/// The schema version this build writes.
pub const CURRENT_VERSION: u32 = UPGRADES.len() as u32;

/// Outcome of [`run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Migration {
    /// The store was empty and has been initialized.
    Fresh,
    /// The schema has been upgraded.
    Upgraded {
        /// Version found on open.
        from: u32,
        /// Version after the upgrade.
        to: u32,
    },
    /// Nothing to do.
    Current,
    /// The runtime fingerprint changed and every entry has been dropped.
    Truncated {
        /// Number of entries dropped.
        removed: usize,
    },
}

/// Bring the store up to [`CURRENT_VERSION`] and validate the runtime fingerprint.
///
/// Must run inside a transaction. On error nothing is applied once the transaction rolls back.
pub fn run(conn: &Connection, fingerprint: &Fingerprint) -> Result<Migration> {
    let version = if SCHEMA_VERSION.exists(conn)? {
        SCHEMA_VERSION.get(conn)?
    } else {
        0
    };

    if version >= CURRENT_VERSION {
        if version > CURRENT_VERSION {
            tracing::warn!(
                "[migrate]: store schema version {version} is newer than supported version {CURRENT_VERSION}"
            );
        }
        return check_fingerprint(conn, fingerprint);
    }

    for (step, upgrade) in UPGRADES.iter().enumerate().skip(version as usize) {
        tracing::debug!("[migrate]: upgrade schema from version {step} to {}", step + 1);
        upgrade(conn)?;
    }

    SCHEMA_VERSION.set(conn, &CURRENT_VERSION)?;
    RUNTIME_VERSION.set(conn, fingerprint)?;
    if !TOTAL_VALUE_SIZE.exists(conn)? {
        TOTAL_VALUE_SIZE.set(conn, &record::sum_value_size(conn)?)?;
    }

    if version == 0 {
        tracing::info!("[migrate]: initialized store at schema version {CURRENT_VERSION}");
        Ok(Migration::Fresh)
    } else {
        tracing::info!("[migrate]: upgraded store schema from version {version} to {CURRENT_VERSION}");
        Ok(Migration::Upgraded {
            from: version,
            to: CURRENT_VERSION,
        })
    }
}

fn check_fingerprint(conn: &Connection, fingerprint: &Fingerprint) -> Result<Migration> {
    let stored = if RUNTIME_VERSION.exists(conn)? {
        Some(RUNTIME_VERSION.get(conn)?)
    } else {
        None
    };

    if stored.as_ref() == Some(fingerprint) {
        if !TOTAL_VALUE_SIZE.exists(conn)? {
            TOTAL_VALUE_SIZE.set(conn, &record::sum_value_size(conn)?)?;
        }
        return Ok(Migration::Current);
    }

    let removed = record::clear(conn)?.len();
    metadata::retain(conn, &[SCHEMA_VERSION.key()])?;
    RUNTIME_VERSION.set(conn, fingerprint)?;
    TOTAL_VALUE_SIZE.set(conn, &0)?;

    match stored {
        Some(stored) => tracing::warn!(
            "[migrate]: runtime fingerprint changed from {stored} to {fingerprint}, dropped {removed} entries"
        ),
        None => tracing::warn!("[migrate]: runtime fingerprint missing, dropped {removed} entries"),
    }
    Ok(Migration::Truncated { removed })
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cache (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL,
            accessed_at REAL NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            expires_at REAL
        );
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS cache_accessed_at ON cache (accessed_at);
        CREATE INDEX IF NOT EXISTS cache_access_count ON cache (access_count);
        CREATE INDEX IF NOT EXISTS cache_expires_at ON cache (expires_at);",
    )?;
    Ok(())
}
