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

use hashbrown::HashSet;
use parking_lot::{Condvar, Mutex};

/// In-process mutual exclusion per key.
///
/// Only one [`BarrierGuard`] per key exists at a time; other callers locking the same key block until it is dropped.
/// Different keys never block each other. The barrier does not coordinate with other processes.
#[derive(Debug, Default)]
pub struct Barrier {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl Barrier {
    /// Block until `key` is free and take it.
    pub fn lock(&self, key: &str) -> BarrierGuard<'_> {
        let mut held = self.held.lock();
        while held.contains(key) {
            self.released.wait(&mut held);
        }
        held.insert(key.to_string());
        BarrierGuard {
            barrier: self,
            key: key.to_string(),
        }
    }

    /// Take `key` if it is free.
    pub fn try_lock(&self, key: &str) -> Option<BarrierGuard<'_>> {
        let mut held = self.held.lock();
        if !held.insert(key.to_string()) {
            return None;
        }
        Some(BarrierGuard {
            barrier: self,
            key: key.to_string(),
        })
    }

    /// Number of keys currently held.
    pub fn held(&self) -> usize {
        self.held.lock().len()
    }
}

/// Releases its key when dropped.
#[derive(Debug)]
#[must_use]
pub struct BarrierGuard<'a> {
    barrier: &'a Barrier,
    key: String,
}

impl BarrierGuard<'_> {
    /// The held key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for BarrierGuard<'_> {
    fn drop(&mut self) {
        self.barrier.held.lock().remove(&self.key);
        self.barrier.released.notify_all();
    }
}
