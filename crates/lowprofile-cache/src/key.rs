//! Cache key derivation
//!
//! A key is the SHA-1 digest of the lower-cased locator string, hashed as
//! UTF-16LE code units and rendered as 40 uppercase hex digits. The digest
//! doubles as the on-disk file name, so the format must stay stable across
//! releases: entries written by older builds are only reachable if the same
//! bytes hash to the same name.
//!
//! The digest covers the locator string exactly as given. Callers that
//! normalize URLs first (percent-encoding, escaped spaces) only share keys
//! with other writers for plain ASCII URLs without escapes.

use std::fmt;
use std::fmt::Write as _;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Length of a rendered key in hex digits
pub const KEY_LEN: usize = 40;

/// Content address of a cached resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a locator's string form.
    ///
    /// Locators that differ only by case map to the same key.
    pub fn for_locator(locator: &str) -> Self {
        let lowered = locator.to_lowercase();

        let mut hasher = Sha1::new();
        for unit in lowered.encode_utf16() {
            hasher.update(unit.to_le_bytes());
        }
        let digest = hasher.finalize();

        let mut hex = String::with_capacity(KEY_LEN);
        for byte in digest.iter() {
            // Writing into a String cannot fail
            let _ = write!(hex, "{:02X}", byte);
        }
        CacheKey(hex)
    }

    /// Parse a previously rendered key, e.g. a file name read back from the
    /// cache namespace.
    pub fn parse(hex: &str) -> Result<Self> {
        let valid = hex.len() == KEY_LEN
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b));
        if !valid {
            return Err(Error::InvalidKey(hex.to_string()));
        }
        Ok(CacheKey(hex.to_string()))
    }

    /// The uppercase hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
