//! Error types for Quiver.
//!
//! Every fallible operation reports one of the concern-specific enums below.
//! [`QuiverError`] is the crate-wide umbrella that all of them convert into,
//! so callers that do not care about the distinction can use [`Result`].
//!
//! # Examples
//!
//! ```
//! use quiver::error::{QuiverError, Result, SchemaError};
//!
//! fn example_operation() -> Result<()> {
//!     Err(SchemaError::MissingPrimaryKey.into())
//! }
//!
//! match example_operation() {
//!     Err(QuiverError::Schema(SchemaError::MissingPrimaryKey)) => {}
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;

use thiserror::Error;

/// Definition-time errors. A schema that fails validation is never persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A field, function or index definition is malformed.
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// The schema declares no primary key field.
    #[error("schema has no primary key field")]
    MissingPrimaryKey,

    /// Vector dimensions declared in different places disagree.
    #[error("dimension mismatch for '{field}': field declares {expected}, embedding produces {actual}")]
    DimensionMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// Two fields (or a field and a function) share a name.
    #[error("duplicate field name '{0}'")]
    DuplicateField(String),

    /// The embedding function names a provider/model nobody registered.
    #[error("no embedder registered for provider '{provider}' model '{model}'")]
    UnsupportedProvider { provider: String, model: String },
}

impl SchemaError {
    /// Shorthand for [`SchemaError::InvalidField`].
    pub fn invalid_field<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        SchemaError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Operation is not valid for the collection's lifecycle state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("collection '{0}' is not loaded")]
    NotLoaded(String),

    #[error("collection '{0}' has been dropped")]
    AlreadyDropped(String),

    #[error("collection '{0}' does not exist")]
    CollectionNotFound(String),

    #[error("collection '{0}' already exists")]
    CollectionExists(String),
}

/// Vector index errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector index is not loaded")]
    NotLoaded,

    #[error("vector for '{0}' contains NaN or infinite values")]
    InvalidVector(String),
}

/// Errors reported by an embedding provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("embedding provider rate limited: {0}")]
    RateLimited(String),

    #[error("invalid embedding input: {0}")]
    InvalidInput(String),

    #[error("embedding request cancelled: {0}")]
    Cancelled(String),
}

impl EmbeddingError {
    /// Transient errors are retried by the gateway; the rest surface at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbeddingError::ProviderUnavailable(_) | EmbeddingError::RateLimited(_)
        )
    }
}

/// An insert failed; carries the id of the offending record.
#[derive(Error, Debug)]
#[error("insert of '{id}' failed: {source}")]
pub struct InsertError {
    pub id: String,
    #[source]
    pub source: Box<QuiverError>,
}

impl InsertError {
    pub fn new<S: Into<String>, E: Into<QuiverError>>(id: S, source: E) -> Self {
        InsertError {
            id: id.into(),
            source: Box::new(source.into()),
        }
    }

    /// The underlying failure.
    pub fn cause(&self) -> &QuiverError {
        &self.source
    }
}

/// A search failed; carries the query that was being served.
#[derive(Error, Debug)]
#[error("search for '{query}' failed: {source}")]
pub struct SearchError {
    pub query: String,
    #[source]
    pub source: Box<QuiverError>,
}

impl SearchError {
    pub fn new<S: Into<String>, E: Into<QuiverError>>(query: S, source: E) -> Self {
        SearchError {
            query: query.into(),
            source: Box::new(source.into()),
        }
    }

    /// The underlying failure.
    pub fn cause(&self) -> &QuiverError {
        &self.source
    }
}

/// The main error type for Quiver operations.
#[derive(Error, Debug)]
pub enum QuiverError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Insert(#[from] InsertError),

    #[error(transparent)]
    Search(#[from] SearchError),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for operations that may fail with QuiverError.
pub type Result<T> = std::result::Result<T, QuiverError>;

impl QuiverError {
    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        QuiverError::Storage(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        QuiverError::InvalidConfig(msg.into())
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        QuiverError::Internal(msg.into())
    }

    /// Strip `Insert`/`Search` context and return the root cause.
    pub fn root_cause(&self) -> &QuiverError {
        match self {
            QuiverError::Insert(err) => err.cause().root_cause(),
            QuiverError::Search(err) => err.cause().root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = QuiverError::from(SchemaError::DuplicateField("title".into()));
        assert_eq!(error.to_string(), "Schema error: duplicate field name 'title'");

        let error = QuiverError::from(IndexError::DimensionMismatch {
            expected: 4,
            actual: 3,
        });
        assert_eq!(
            error.to_string(),
            "Index error: vector dimension mismatch: expected 4, got 3"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let quiver_error = QuiverError::from(io_error);

        match quiver_error {
            QuiverError::Io(_) => {}
            _ => panic!("Expected IO error variant"),
        }
    }

    #[test]
    fn test_root_cause_unwraps_context() {
        let err: QuiverError = InsertError::new("a", EmbeddingError::RateLimited("slow".into())).into();
        assert!(matches!(
            err.root_cause(),
            QuiverError::Embedding(EmbeddingError::RateLimited(_))
        ));
        assert!(err.to_string().starts_with("insert of 'a' failed"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(EmbeddingError::RateLimited("x".into()).is_transient());
        assert!(EmbeddingError::ProviderUnavailable("x".into()).is_transient());
        assert!(!EmbeddingError::InvalidInput("x".into()).is_transient());
        assert!(!EmbeddingError::Cancelled("x".into()).is_transient());
    }
}
