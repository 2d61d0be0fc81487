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

//! Read-through helpers on top of [`Cache`].

use std::time::Duration;

use hoard_common::{
    code::Code,
    error::{Error, Result},
};
use hoard_storage::Item;
use serde::Serialize;

use crate::cache::Cache;

/// Build a memoization key from a namespace and the serialized arguments of a call.
///
/// Arguments are rendered as JSON, so equal arguments map to the same key.
pub fn memo_key<A>(namespace: &str, args: &A) -> Result<String>
where
    A: Serialize + ?Sized,
{
    let args = serde_json::to_string(args)?;
    Ok(format!("{namespace}:{args}"))
}

impl Cache {
    /// Return the value under `key`, or compute it with `f`, store it and return it.
    ///
    /// Concurrent callers fetching the same missing key in this process run `f` once; the others wait and read the
    /// stored value. An error returned by `f` is reported as [`hoard_common::error::ErrorKind::External`] and nothing
    /// is stored.
    pub fn fetch<F, E>(&self, key: &str, expiration: Option<Duration>, f: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> std::result::Result<Vec<u8>, E>,
        E: Into<anyhow::Error>,
    {
        self.fetch_bytes(key, expiration, || {
            f().map_err(|e| Error::external(e).with_context("key", key))
        })
    }

    /// Typed variant of [`Cache::fetch`]. Values are stored in their [`Code`] encoding.
    ///
    /// Encoding and decoding failures are reported as [`hoard_common::error::ErrorKind::Code`].
    pub fn fetch_value<V, F, E>(&self, key: &str, expiration: Option<Duration>, f: F) -> Result<V>
    where
        V: Code,
        F: FnOnce() -> std::result::Result<V, E>,
        E: Into<anyhow::Error>,
    {
        let mut computed = None;
        let bytes = self.fetch_bytes(key, expiration, || {
            let value = f().map_err(|e| Error::external(e).with_context("key", key))?;
            let bytes = value
                .encode_to_vec()
                .map_err(|e| Error::from(e).with_context("key", key))?;
            computed = Some(value);
            Ok(bytes)
        })?;

        match computed {
            Some(value) => Ok(value),
            None => V::decode_from_slice(&bytes).map_err(|e| Error::from(e).with_context("key", key)),
        }
    }

    fn fetch_bytes<F>(&self, key: &str, expiration: Option<Duration>, f: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        if let Some(item) = self.get_one(key)? {
            return Ok(item.value);
        }

        let _guard = self.barrier.lock(key);
        if let Some(item) = self.get_one(key)? {
            return Ok(item.value);
        }

        let value = f()?;
        let mut item = Item::new(value.clone());
        if let Some(expiration) = expiration {
            item = item.with_expiration(expiration);
        }
        self.set_one(key, item)?;
        tracing::trace!(key, "[cache]: fetch computed");

        Ok(value)
    }
}
