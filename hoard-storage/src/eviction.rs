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

use std::{fmt::Display, str::FromStr};

use hoard_common::{
    error::{Error, Result},
    time::Timestamp,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{metadata::TOTAL_VALUE_SIZE, record};

/// Order in which entries are evicted when the store exceeds its size limit.
///
/// Entries with the same rank are evicted in ascending key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Evict the entry read or written the longest time ago.
    #[default]
    LeastRecentlyUsed,
    /// Evict the entry read the fewest times since it was written.
    LeastFrequentlyUsed,
    /// Evict the entry read or written most recently.
    MostRecentlyUsed,
    /// Evict the oldest written entry.
    FirstInFirstOut,
    /// Evict the newest written entry.
    LastInFirstOut,
}

impl EvictionPolicy {
    /// All supported policies.
    pub const ALL: [Self; 5] = [
        Self::LeastRecentlyUsed,
        Self::LeastFrequentlyUsed,
        Self::MostRecentlyUsed,
        Self::FirstInFirstOut,
        Self::LastInFirstOut,
    ];

    /// The kebab-case name of the policy.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LeastRecentlyUsed => "least-recently-used",
            Self::LeastFrequentlyUsed => "least-frequently-used",
            Self::MostRecentlyUsed => "most-recently-used",
            Self::FirstInFirstOut => "first-in-first-out",
            Self::LastInFirstOut => "last-in-first-out",
        }
    }

    /// Ranking of rows, most evictable first.
    fn order_by(&self) -> &'static str {
        match self {
            Self::LeastRecentlyUsed => "accessed_at ASC",
            Self::LeastFrequentlyUsed => "access_count ASC",
            Self::MostRecentlyUsed => "accessed_at DESC",
            Self::FirstInFirstOut => "rowid ASC",
            Self::LastInFirstOut => "rowid DESC",
        }
    }
}

impl Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for EvictionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|policy| policy.name() == s)
            .ok_or_else(|| Error::config("unknown eviction policy").with_context("policy", s))
    }
}

/// Keys removed by an eviction pass.
#[derive(Debug, Default)]
pub struct Evicted {
    /// Keys removed because their deadline passed.
    pub expired: Vec<String>,
    /// Keys removed to satisfy the size limit, in eviction order.
    pub evicted: Vec<String>,
}

impl Evicted {
    /// Whether nothing was removed.
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.evicted.is_empty()
    }
}

/// Sweep expired entries, then evict entries in `policy` order until the value size sum is at most `size_limit`.
///
/// A negative `size_limit` evicts everything. The victims are the shortest ranked prefix whose removal brings the sum
/// within the limit, selected with a running sum in a single query.
pub fn evict(conn: &Connection, size_limit: i64, policy: EvictionPolicy, now: Timestamp) -> Result<Evicted> {
    let expired = record::remove_expired(conn, now)?;

    let total = TOTAL_VALUE_SIZE.get(conn)?;
    if total <= size_limit {
        return Ok(Evicted {
            expired,
            evicted: vec![],
        });
    }
    let excess = total.saturating_sub(size_limit);

    let sql = format!(
        "SELECT key FROM (
            SELECT
                key,
                LENGTH(value) AS size,
                SUM(LENGTH(value)) OVER ranking AS cumulative,
                ROW_NUMBER() OVER ranking AS position
            FROM cache
            WINDOW ranking AS (ORDER BY {}, key ASC ROWS UNBOUNDED PRECEDING)
        )
        WHERE cumulative - size < ?1
        ORDER BY position",
        policy.order_by()
    );
    let victims = conn
        .prepare_cached(&sql)?
        .query_map([excess], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut freed = 0;
    for key in &victims {
        freed += record::delete(conn, key)?.unwrap_or_default();
    }

    tracing::debug!(
        "[evict]: policy: {policy}, limit: {size_limit}, total: {total}, evicted: {} entries ({freed} bytes), expired: {} entries",
        victims.len(),
        expired.len(),
    );

    Ok(Evicted {
        expired,
        evicted: victims,
    })
}
