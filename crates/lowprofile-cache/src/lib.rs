//! # lowprofile-cache
//!
//! Content-addressed disk cache for fetched resource bytes.
//!
//! ## Properties
//! - Keys are SHA-1 digests of the lower-cased locator string
//! - One flat namespace directory, one file per key, raw bytes only
//! - Write-once entries: a second write for a key is a no-op
//! - No eviction or expiry; the namespace grows until cleared externally

#![warn(missing_docs)]

mod error;
mod key;
mod storage;

pub use error::{Error, Result};
pub use key::{CacheKey, KEY_LEN};
pub use storage::{DiskCache, DEFAULT_NAMESPACE};
