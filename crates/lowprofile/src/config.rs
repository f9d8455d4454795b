//! Engine configuration

use std::path::PathBuf;
use std::time::Duration;

use lowprofile_cache::DEFAULT_NAMESPACE;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of requests (and responses) handled per scheduler iteration
pub const DEFAULT_QUANTUM: usize = 5;

/// Settings for an [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum requests and maximum responses processed per iteration
    pub quantum: usize,

    /// Directory containing the cache namespace
    pub cache_root: PathBuf,

    /// Name of the namespace directory under `cache_root`
    pub cache_namespace: String,

    /// Root of the application bundle for relative locators
    pub bundle_root: Option<PathBuf>,

    /// Whole-request timeout for network fetches
    pub request_timeout_ms: u64,

    /// Threads in the network runtime
    pub network_threads: usize,

    /// Cache network bytes even when they fail to materialize
    pub cache_undecodable: bool,

    /// Yield the worker thread after every processed item
    pub yield_between_items: bool,

    /// Use the async path; when false every request takes the bypass
    pub enabled: bool,

    /// Seed for request selection order (random when unset)
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            cache_root: std::env::temp_dir().join("lowprofile"),
            cache_namespace: DEFAULT_NAMESPACE.to_string(),
            bundle_root: None,
            request_timeout_ms: 30_000,
            network_threads: 2,
            cache_undecodable: true,
            yield_between_items: true,
            enabled: true,
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    /// Config rooted at `cache_root`, defaults elsewhere
    pub fn with_cache_root<P: Into<PathBuf>>(cache_root: P) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    /// Network request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.quantum == 0 {
            return Err(Error::Config("quantum must be at least 1".to_string()));
        }
        if self.network_threads == 0 {
            return Err(Error::Config(
                "network_threads must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config(
                "request_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
