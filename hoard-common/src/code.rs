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

//! Encoding of typed values into the opaque byte payloads the store keeps.
//!
//! The store itself never interprets payloads. [`Code`] is only used by the memoization helpers that turn typed
//! results into bytes and back.

use std::io::{Read, Write};

use serde::{de::DeserializeOwned, Serialize};

/// Error raised while encoding or decoding a value.
#[derive(Debug, thiserror::Error)]
pub enum CodeError {
    /// The value cannot be encoded, or the payload is not a valid encoding of the requested type.
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Result type of the coding layer.
pub type CodeResult<T> = std::result::Result<T, CodeError>;

/// Encode/decode trait for values stored through the memoization helpers.
///
/// Every `serde` type implements it via bincode.
pub trait Code {
    /// Encode the object into a writer.
    fn encode(&self, writer: &mut impl Write) -> CodeResult<()>;

    /// Decode the object from a reader.
    fn decode(reader: &mut impl Read) -> CodeResult<Self>
    where
        Self: Sized;

    /// Encode the object into a freshly allocated buffer.
    fn encode_to_vec(&self) -> CodeResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode the object from a byte slice.
    fn decode_from_slice(mut slice: &[u8]) -> CodeResult<Self>
    where
        Self: Sized,
    {
        Self::decode(&mut slice)
    }
}

impl<T> Code for T
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, writer: &mut impl Write) -> CodeResult<()> {
        bincode::serialize_into(writer, self).map_err(CodeError::from)
    }

    fn decode(reader: &mut impl Read) -> CodeResult<Self> {
        bincode::deserialize_from(reader).map_err(CodeError::from)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Report {
        name: String,
        scores: Vec<u32>,
        passed: Option<bool>,
    }

    #[test]
    fn test_serde_value_roundtrip() {
        let report = Report {
            name: "alice".to_string(),
            scores: vec![1, 2, 3],
            passed: Some(true),
        };
        let buf = report.encode_to_vec().unwrap();
        assert_eq!(Report::decode_from_slice(&buf).unwrap(), report);
    }

    #[test]
    fn test_decode_truncated_payload() {
        let buf = "hello".to_string().encode_to_vec().unwrap();
        let err = String::decode_from_slice(&buf[..buf.len() - 2]).unwrap_err();
        assert!(matches!(err, CodeError::Bincode(_)));
    }
}
