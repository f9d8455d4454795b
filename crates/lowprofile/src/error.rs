//! Error types for lowprofile

use std::io;

/// Result type alias for engine construction and configuration
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned while building an [`Engine`](crate::Engine)
///
/// Nothing that happens after a request is enqueued is reported through
/// this type; see [`LoadError`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Disk cache could not be opened
    #[error("disk cache: {0}")]
    Cache(#[from] lowprofile_cache::Error),

    /// HTTP client could not be built
    #[error("HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    /// Runtime or worker thread could not be started
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failure of a single load step
///
/// The scheduler and dispatcher match on these and drop the load; none of
/// them reach the code that requested the resource.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Bundled resource absent, or a 404-class network response
    #[error("resource not found")]
    NotFound,

    /// Transport error, timeout, or non-success HTTP status
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// Bytes were fetched but could not be materialized
    #[error("decode failure: {0}")]
    DecodeFailure(String),

    /// Cache or bundle storage could not be read or written
    #[error("storage failure: {0}")]
    StorageFailure(#[from] io::Error),
}
