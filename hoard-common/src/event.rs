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

/// Reason an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Removed by the eviction sweep to respect the size limit.
    Evict,
    /// Removed by the expiration sweep.
    Expire,
    /// Replaced by a newer write under the same key.
    Replace,
    /// Removed explicitly.
    Remove,
    /// Removed by an explicit clear.
    Clear,
}

/// Trait for the customized event listener.
///
/// Listeners are invoked after the transaction that removed the entries has committed, in the order the entries
/// were removed.
pub trait EventListener: Send + Sync + 'static {
    /// Called when a cache entry leaves the cache with the reason.
    #[expect(unused_variables)]
    fn on_leave(&self, reason: Event, key: &str) {}
}
