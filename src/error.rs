//! Error types for collections.

use std::sync::Arc;

use crate::keys::Address;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by collections and their components.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A log entry, writer or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Resolving a batch of versions failed. The batch was not applied.
    #[error("failed to resolve batch: {0}")]
    Resolution(#[source] Arc<Error>),
    /// A query did not name the field to scan.
    #[error("query is missing the `field` option")]
    MissingField,
    /// A query named a field that is not part of the schema.
    #[error("unknown field: {0}")]
    UnknownField(String),
    /// A query bound is a value that is never indexed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// No index with this name is known to the catalog manager.
    #[error("index not found: {0}")]
    IndexNotFound(String),
    /// The underlying log or file system failed.
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
    /// A stored entry could not be decoded.
    #[error("failed to decode: {0}")]
    Decode(String),
    /// The persistent store failed.
    #[error("storage error: {0}")]
    Storage(String),
    /// The component was closed.
    #[error("closed")]
    Closed,
}

impl Error {
    /// Create a [`Error::NotFound`] for a version address.
    pub fn version_not_found(address: &Address) -> Self {
        Self::NotFound(format!("version {address}"))
    }

    /// Wrap an error as a batch resolution failure.
    pub fn resolution(cause: Error) -> Self {
        match cause {
            err @ Self::Resolution(_) => err,
            cause => Self::Resolution(Arc::new(cause)),
        }
    }

    /// Whether this is a [`Error::NotFound`] error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

macro_rules! impl_storage_error {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Error {
                fn from(err: $ty) -> Self {
                    Self::Storage(err.to_string())
                }
            }
        )*
    };
}

impl_storage_error!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);
