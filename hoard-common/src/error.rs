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

use std::{
    fmt::{Debug, Display},
    sync::Arc,
};

/// All kinds of [`Error`] raised by hoard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid configuration, detected before any I/O.
    Config,
    /// Malformed call parameters.
    InvalidArgument,
    /// A metadata key was requested without checking its existence first.
    NotFound,
    /// The underlying transactional store failed.
    Storage,
    /// Filesystem error outside of the store.
    Io,
    /// A persisted value could not be decoded.
    Parse,
    /// Value encoding or decoding failed.
    Code,
    /// Error raised by user code, e.g. a memoized computation.
    External,
}

impl ErrorKind {
    /// Convert self into static str.
    pub fn into_static(self) -> &'static str {
        self.into()
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.into_static())
    }
}

impl From<ErrorKind> for &'static str {
    fn from(v: ErrorKind) -> &'static str {
        match v {
            ErrorKind::Config => "Invalid configuration",
            ErrorKind::InvalidArgument => "Invalid argument",
            ErrorKind::NotFound => "Not found",
            ErrorKind::Storage => "Storage failure",
            ErrorKind::Io => "I/O error",
            ErrorKind::Parse => "Parse error",
            ErrorKind::Code => "Coding error",
            ErrorKind::External => "External error",
        }
    }
}

/// Error is the error struct returned by all hoard functions.
///
/// `Display` renders a single line:
///
/// ```shell
/// Storage failure, context: { op: set_many } => commit failed, source: database is locked
/// ```
///
/// `Debug` renders the kind and message on the first line, followed by the context and the source chain on separate
/// lines. The alternate form (`{:#?}`) falls back to the conventional struct representation.
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: Vec<(&'static str, String)>,
    source: Option<Arc<anyhow::Error>>,
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            return f
                .debug_struct("Error")
                .field("kind", &self.kind)
                .field("message", &self.message)
                .field("context", &self.context)
                .field("source", &self.source)
                .finish();
        }

        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        for (k, v) in self.context.iter() {
            write!(f, "\n  {k}: {v}")?;
        }
        if let Some(source) = &self.source {
            write!(f, "\nSource:\n  {source:#}")?;
        }
        Ok(())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;

        if !self.context.is_empty() {
            let context = self
                .context
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, ", context: {{ {context} }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|v| v.as_ref().as_ref())
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            context: self.context.clone(),
            source: self.source.clone(),
        }
    }
}

impl Error {
    /// Create a new error.
    ///
    /// Use [`Error::with_source`] to attach the underlying cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::new(),
            source: None,
        }
    }

    /// Add more context in error.
    pub fn with_context(mut self, key: &'static str, value: impl ToString) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    /// Set source for error.
    ///
    /// # Notes
    ///
    /// Setting the source twice raises a panic in debug builds.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "the source error has been set");
        self.source = Some(Arc::new(source.into()));
        self
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the error context.
    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Get the error source.
    pub fn source(&self) -> Option<&anyhow::Error> {
        self.source.as_deref()
    }

    /// Downcast the reference of the source error to a specific error type reference.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source.as_deref().and_then(|e| e.downcast_ref::<E>())
    }
}

/// Result type for hoard.
pub type Result<T> = std::result::Result<T, Error>;

/// Helper methods for Error.
impl Error {
    /// Helper for creating an [`ErrorKind::Config`] error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Config, message)
    }

    /// Helper for creating an [`ErrorKind::InvalidArgument`] error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidArgument, message)
    }

    /// Helper for creating an [`ErrorKind::NotFound`] error for a missing metadata key.
    pub fn metadata_not_found(key: &str) -> Self {
        Error::new(ErrorKind::NotFound, "metadata key not found").with_context("key", key)
    }

    /// Helper for creating an [`ErrorKind::Storage`] error from [`rusqlite::Error`].
    pub fn storage(source: rusqlite::Error) -> Self {
        Error::new(ErrorKind::Storage, "store operation failed").with_source(source)
    }

    /// Helper for creating an [`ErrorKind::External`] error from user code.
    pub fn external(source: impl Into<anyhow::Error>) -> Self {
        Error::new(ErrorKind::External, "external error").with_source(source)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::storage(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, "filesystem operation failed").with_source(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::new(ErrorKind::Parse, "malformed json value").with_source(e)
    }
}

impl From<crate::code::CodeError> for Error {
    fn from(e: crate::code::CodeError) -> Self {
        Error::new(ErrorKind::Code, "coding error").with_source(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<Error>();
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[test]
    fn test_error_display() {
        let err = Error::new(ErrorKind::Storage, "commit failed")
            .with_source(TestError("database is locked".into()))
            .with_context("op", "set_many")
            .with_context("items", 2);

        assert_eq!(
            "Storage failure, context: { op: set_many, items: 2 } => commit failed, source: TestError: database is locked",
            err.to_string()
        );
    }

    #[test]
    fn test_error_display_without_context() {
        let err = Error::config("invalid eviction policy");
        assert_eq!("Invalid configuration => invalid eviction policy", err.to_string());
    }

    #[test]
    fn test_error_downcast() {
        let inner = TestError("Error or not error, that is a question.".to_string());
        let err = Error::external(inner.clone());

        assert_eq!(err.kind(), ErrorKind::External);
        let downcasted = err.downcast_ref::<TestError>().unwrap();
        assert_eq!(downcasted, &inner);
    }

    #[test]
    fn test_rusqlite_error_is_storage_failure() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.downcast_ref::<rusqlite::Error>().is_some());
    }

    #[test]
    fn test_metadata_not_found() {
        let err = Error::metadata_not_found("schema_version");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.context(), &[("key", "schema_version".to_string())]);
    }
}
