//! Error types for lowprofile-cache

use std::io;
use std::path::PathBuf;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for disk cache operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error while touching the cache namespace
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The cache namespace could not be created
    #[error("cannot create cache namespace {path:?}: {source}")]
    Namespace {
        /// Directory that was being created
        path: PathBuf,
        /// Underlying failure
        source: io::Error,
    },

    /// A namespace name that would escape the cache root
    #[error("invalid cache namespace: {0:?}")]
    InvalidNamespace(String),

    /// A string that is not a 40-character uppercase hex digest
    #[error("invalid cache key: {0:?}")]
    InvalidKey(String),
}
