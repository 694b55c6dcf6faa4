//! Error types and result types for query translation and unit-of-work operations.
//!
//! Every fallible operation in this crate returns [`N1qlResult<T>`]. None of these
//! errors are transient: they describe translation gaps, malformed inputs or store
//! writes that reported failure, so they are surfaced to the caller immediately.

use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised while translating, executing or tracking queries.
#[derive(Error, Debug)]
pub enum N1qlError {
    /// An expression node or method call has no registered rendering rule.
    #[error("Unsupported translation: {0}")]
    UnsupportedTranslation(String),
    /// A translator, converter or query model was constructed from malformed input.
    #[error("Invalid shape: {0}")]
    InvalidShape(String),
    /// A change-tracking proxy cannot be created for the given type.
    #[error("Cannot create change-tracking proxy for {0}: {1}")]
    ProxyCreationUnsupported(String, String),
    /// The document has no resolvable key. The argument names the document type.
    #[error("Document of type {0} has no key")]
    DocumentKeyMissing(String),
    /// The store did not report success for a write.
    /// The first argument is the document key, the second the store status.
    #[error("Write of document {0} failed with status {1}")]
    WriteFailed(String, String),
    /// A `First`/`Single` query returned no rows.
    #[error("Sequence contains no elements: {0}")]
    NotFound(String),
    /// A `Single`/`SingleOrDefault` query returned more than one row.
    #[error("Sequence contains more than one element: {0}")]
    MultipleElements(String),
    /// Serialization/deserialization error when converting to or from JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An error reported by the underlying bucket backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for query translation and execution.
pub type N1qlResult<T> = Result<T, N1qlError>;

impl From<SerdeJsonError> for N1qlError {
    fn from(err: SerdeJsonError) -> Self {
        N1qlError::Serialization(err.to_string())
    }
}
