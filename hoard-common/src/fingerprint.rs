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

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Identity of the runtime that writes the cache.
///
/// Payloads are opaque bytes produced by a serializer whose format may change between builds. The store records the
/// fingerprint of the last writer and drops every entry when a process with a different fingerprint opens it.
///
/// The fingerprint is an ordered list of components and is persisted as a JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(Vec<String>);

impl Fingerprint {
    /// Create a fingerprint from the given components.
    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(components.into_iter().map(Into::into).collect())
    }

    /// The fingerprint of the running build: hoard version, compiler version and target triple.
    pub fn current() -> Self {
        Self::new([
            concat!("hoard ", env!("CARGO_PKG_VERSION")),
            env!("HOARD_RUSTC_VERSION"),
            env!("HOARD_TARGET"),
        ])
    }

    /// Components of the fingerprint.
    pub fn components(&self) -> &[String] {
        &self.0
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::current()
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_fingerprint() {
        let fingerprint = Fingerprint::current();
        assert_eq!(fingerprint.components().len(), 3);
        assert!(fingerprint.components()[0].starts_with("hoard "));
        assert_eq!(fingerprint, Fingerprint::current());
    }

    #[test]
    fn test_fingerprint_json() {
        let fingerprint = Fingerprint::new(["3", "8", "0"]);
        let json = serde_json::to_string(&fingerprint).unwrap();
        assert_eq!(json, r#"["3","8","0"]"#);
        assert_eq!(serde_json::from_str::<Fingerprint>(&json).unwrap(), fingerprint);
        assert_eq!(fingerprint.to_string(), "[3, 8, 0]");
    }
}
