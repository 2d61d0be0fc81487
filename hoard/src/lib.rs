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

//! hoard is an embedded key-value cache persisted in a single SQLite file.
//!
//! The sum of stored value lengths is bounded by a size limit. Writes that would exceed it evict entries in the
//! order of the configured [`EvictionPolicy`], after sweeping expired entries.
//!
//! ```
//! use hoard::{CacheBuilder, EvictionPolicy, Item};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let cache = CacheBuilder::new(dir.path().join("cache.db"))
//!     .with_size_limit(64 * 1024 * 1024)
//!     .with_eviction_policy(EvictionPolicy::LeastFrequentlyUsed)
//!     .build()
//!     .unwrap();
//!
//! cache.set_one("answer", Item::new(b"42".to_vec())).unwrap();
//! assert_eq!(cache.get_one("answer").unwrap().unwrap().value, b"42");
//! ```

mod barrier;
mod cache;
mod memo;

pub use hoard_common as common;
pub use hoard_storage as storage;

/// Commonly used types of hoard.
pub mod prelude;
pub use prelude::*;
