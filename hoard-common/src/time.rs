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

//! Persisted timestamps are seconds since the Unix epoch as `f64`, which keeps sub-second precision and sorts
//! natively as `REAL` in the store.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
pub type Timestamp = f64;

/// Current wall-clock time as a [`Timestamp`].
///
/// A clock set before the epoch reads as `0.0`.
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Absolute deadline `ttl` after `at`.
pub fn deadline(at: Timestamp, ttl: Duration) -> Timestamp {
    at + ttl.as_secs_f64()
}

/// Time left from `at` until `deadline`.
///
/// Zero once the deadline has passed. Saturates at [`Duration::MAX`] for deadlines too far away to represent.
pub fn remaining(deadline: Timestamp, at: Timestamp) -> Duration {
    if deadline <= at {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(deadline - at).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_and_remaining() {
        let at = 1_700_000_000.25;
        let d = deadline(at, Duration::from_millis(1500));
        assert_eq!(d, 1_700_000_001.75);
        assert_eq!(remaining(d, at), Duration::from_millis(1500));
        assert_eq!(remaining(at, d), Duration::ZERO);
        assert_eq!(remaining(at, at), Duration::ZERO);
    }

    #[test]
    fn test_far_deadline_saturates() {
        let at = 1_700_000_000.25;
        let d = deadline(at, Duration::MAX);
        assert_eq!(remaining(d, at), Duration::MAX);
        assert_eq!(remaining(d, d), Duration::ZERO);
    }

    #[test]
    fn test_now_is_monotonic_enough() {
        let a = now();
        let b = now();
        assert!(a > 0.0);
        assert!(b >= a);
    }
}
