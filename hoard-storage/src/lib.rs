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

//! The storage engine of hoard.
//!
//! A [`Storage`] keeps entries in the `cache` table of a SQLite file and bounds the sum of their value lengths.
//! The lower level modules operate on a caller-provided connection and are exposed for tooling that needs to
//! inspect or repair a store inside its own transaction.

/// Size-bounded eviction policies and the eviction pass.
pub mod eviction;
/// Typed values of the `metadata` table.
pub mod metadata;
/// Schema upgrades and runtime fingerprint validation.
pub mod migrate;
/// Row operations on the `cache` table.
pub mod record;
/// Operation counters.
pub mod statistics;
/// The storage handle and its builder.
pub mod storage;

/// Re-exported types of the storage engine.
pub mod prelude;
pub use prelude::*;
