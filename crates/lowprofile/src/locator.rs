//! Resource locators
//!
//! The absolute/relative decision is made once, when a locator is parsed:
//! anything that parses as an absolute URL is fetched over the network,
//! everything else is looked up in the application bundle.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use lowprofile_cache::CacheKey;
use url::Url;

/// Where a resource comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceLocator {
    /// Absolute URL, fetched over the network and cached on disk
    Network(Url),
    /// Relative path into the application bundle, never cached
    Bundled(String),
}

impl ResourceLocator {
    /// Classify a locator string
    pub fn parse(input: &str) -> Self {
        match Url::parse(input) {
            Ok(url) => ResourceLocator::Network(url),
            Err(_) => ResourceLocator::Bundled(input.to_string()),
        }
    }

    /// Whether this locator is fetched over the network
    pub fn is_network(&self) -> bool {
        matches!(self, ResourceLocator::Network(_))
    }

    /// String form used for display and key derivation
    pub fn as_str(&self) -> &str {
        match self {
            ResourceLocator::Network(url) => url.as_str(),
            ResourceLocator::Bundled(path) => path,
        }
    }

    /// Disk cache key for this locator.
    ///
    /// Network keys hash the serialized [`Url`], which keeps percent-escapes
    /// and encodes spaces. Entries written by another implementation that
    /// hashed an unescaped form are only shared for plain ASCII URLs.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_locator(self.as_str())
    }

    /// Bundle-relative path with leading `/` trimmed, for bundled locators
    pub fn bundle_path(&self) -> Option<&str> {
        match self {
            ResourceLocator::Network(_) => None,
            ResourceLocator::Bundled(path) => Some(path.trim_start_matches('/')),
        }
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceLocator {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ResourceLocator::parse(s))
    }
}

impl From<&str> for ResourceLocator {
    fn from(s: &str) -> Self {
        ResourceLocator::parse(s)
    }
}

impl From<Url> for ResourceLocator {
    fn from(url: Url) -> Self {
        ResourceLocator::Network(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_is_network() {
        let locator = ResourceLocator::parse("http://host/a.png");
        assert!(locator.is_network());
        assert_eq!(locator.as_str(), "http://host/a.png");
        assert_eq!(locator.bundle_path(), None);
    }

    #[test]
    fn test_relative_is_bundled() {
        let locator = ResourceLocator::parse("/images/logo.png");
        assert!(!locator.is_network());
        assert_eq!(locator.as_str(), "/images/logo.png");
        assert_eq!(locator.bundle_path(), Some("images/logo.png"));

        let plain = ResourceLocator::parse("images/logo.png");
        assert_eq!(plain.bundle_path(), Some("images/logo.png"));
    }

    #[test]
    fn test_cache_key_matches_string_form() {
        let locator = ResourceLocator::parse("http://host/a.png");
        assert_eq!(
            locator.cache_key().as_str(),
            "FBD613B0A45341A3A5F3BD25F06AD29AD4BE9F39"
        );
    }

    #[test]
    fn test_case_variants_share_key_but_differ() {
        let a = ResourceLocator::parse("http://host/a.png");
        let b = ResourceLocator::parse("http://host/A.png");
        assert_ne!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_cache_key_uses_serialized_url() {
        let spaced = ResourceLocator::parse("http://host/my image.png");
        assert_eq!(spaced.as_str(), "http://host/my%20image.png");
        assert_eq!(
            spaced.cache_key(),
            CacheKey::for_locator("http://host/my%20image.png")
        );
        assert_ne!(
            spaced.cache_key(),
            CacheKey::for_locator("http://host/my image.png")
        );
    }

    #[test]
    fn test_from_str() {
        let locator: ResourceLocator = "https://example.com/x.jpg".parse().unwrap();
        assert!(locator.is_network());
        assert_eq!(locator.to_string(), "https://example.com/x.jpg");
    }
}
