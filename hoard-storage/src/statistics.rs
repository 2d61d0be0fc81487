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

//! Per-instance operation counters.
//!
//! The counters only cover operations issued through one [`crate::Storage`] handle and its clones. Other processes
//! sharing the same file are not observed.

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters of a storage.
#[derive(Debug, Default)]
pub struct Statistics {
    hit: AtomicU64,
    miss: AtomicU64,
    insert: AtomicU64,
    evict: AtomicU64,
    expire: AtomicU64,
    remove: AtomicU64,
}

macro_rules! counter {
    ($($field:ident, $record:ident, $doc:literal;)*) => {
        impl Statistics {
            $(
                #[doc = $doc]
                pub fn $field(&self) -> u64 {
                    self.$field.load(Ordering::Relaxed)
                }

                pub(crate) fn $record(&self, n: usize) {
                    self.$field.fetch_add(n as u64, Ordering::Relaxed);
                }
            )*
        }
    };
}

counter! {
    hit, record_hit, "Keys found by reads.";
    miss, record_miss, "Keys requested by reads but absent or expired.";
    insert, record_insert, "Entries written.";
    evict, record_evict, "Entries evicted to respect the size limit.";
    expire, record_expire, "Expired entries swept.";
    remove, record_remove, "Entries removed explicitly or by a clear.";
}
