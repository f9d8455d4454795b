//! Byte sources: disk cache, application bundle, network
//!
//! Network fetches are fire-and-forget. The caller hands over a callback
//! that is invoked exactly once, on whatever thread finishes the request,
//! with the fully buffered body or the reason it failed.

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lowprofile_cache::{CacheKey, DiskCache};
use parking_lot::RwLock;
use reqwest::StatusCode;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, trace};
use url::Url;

use crate::config::EngineConfig;
use crate::error::{LoadError, Result};

/// Receives the outcome of a network fetch
pub type FetchCallback = Box<dyn FnOnce(std::result::Result<Vec<u8>, LoadError>) + Send + 'static>;

/// Resources shipped with the application, addressed by relative path
pub trait BundledSource: Send + Sync + 'static {
    /// Read a bundled resource. `path` has no leading `/`.
    fn open(&self, path: &str) -> Option<Vec<u8>>;
}

/// Asynchronous network access
pub trait NetworkFetcher: Send + Sync + 'static {
    /// Start fetching `url` and return immediately. `on_done` runs once
    /// with the full body or the failure.
    fn fetch(&self, url: &Url, on_done: FetchCallback);
}

/// Bundle backed by a directory on disk
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Serve files below `root`
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Map a bundle path to a file, refusing anything that leaves the root
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl BundledSource for DirectorySource {
    fn open(&self, path: &str) -> Option<Vec<u8>> {
        let Some(file) = self.resolve(path) else {
            debug!("Rejected bundle path {:?}", path);
            return None;
        };
        match std::fs::read(&file) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                debug!("Bundle read {:?} failed: {}", file, e);
                None
            }
        }
    }
}

/// Bundle held in memory
#[derive(Debug, Default)]
pub struct MemorySource {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySource {
    /// Create an empty bundle
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a resource. A leading `/` is ignored.
    pub fn insert(&self, path: &str, bytes: impl Into<Vec<u8>>) {
        self.entries
            .write()
            .insert(path.trim_start_matches('/').to_string(), bytes.into());
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the bundle is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl BundledSource for MemorySource {
    fn open(&self, path: &str) -> Option<Vec<u8>> {
        self.entries.read().get(path).cloned()
    }
}

/// HTTP(S) fetcher running on a tokio runtime
pub struct HttpFetcher {
    client: reqwest::Client,
    handle: Handle,
    /// Present when the fetcher owns its runtime
    runtime: Option<Runtime>,
}

impl HttpFetcher {
    /// Build a fetcher with its own runtime sized from `config`
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.network_threads)
            .thread_name("lowprofile-net")
            .enable_all()
            .build()?;
        let client = build_client(config.request_timeout())?;

        Ok(Self {
            client,
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Build a fetcher that spawns onto an existing runtime
    pub fn with_handle(handle: Handle, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            handle,
            runtime: None,
        })
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("lowprofile/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

impl NetworkFetcher for HttpFetcher {
    fn fetch(&self, url: &Url, on_done: FetchCallback) {
        let client = self.client.clone();
        let url = url.clone();
        self.handle.spawn(async move {
            let result = download(&client, url.clone()).await;
            match &result {
                Ok(bytes) => trace!("Fetched {} ({} bytes)", url, bytes.len()),
                Err(e) => debug!("Fetch {} failed: {}", url, e),
            }
            on_done(result);
        });
    }
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("owns_runtime", &self.runtime.is_some())
            .finish()
    }
}

impl Drop for HttpFetcher {
    fn drop(&mut self) {
        // In-flight fetches are abandoned, not awaited
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// GET `url` and buffer the whole body
async fn download(client: &reqwest::Client, url: Url) -> std::result::Result<Vec<u8>, LoadError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| LoadError::NetworkFailure(e.to_string()))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Err(LoadError::NotFound);
    }
    if !status.is_success() {
        return Err(LoadError::NetworkFailure(format!("HTTP {}", status)));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| LoadError::NetworkFailure(e.to_string()))?;
    Ok(body.to_vec())
}

/// The three byte sources behind one handle
#[derive(Clone)]
pub struct Fetcher {
    cache: Arc<DiskCache>,
    bundled: Arc<dyn BundledSource>,
    network: Arc<dyn NetworkFetcher>,
}

impl Fetcher {
    /// Combine the sources
    pub fn new(
        cache: Arc<DiskCache>,
        bundled: Arc<dyn BundledSource>,
        network: Arc<dyn NetworkFetcher>,
    ) -> Self {
        Self {
            cache,
            bundled,
            network,
        }
    }

    /// Look up a cached network resource
    pub fn fetch_cached(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.cache.get(key)
    }

    /// Read a bundled resource
    pub fn fetch_bundled(&self, path: &str) -> std::result::Result<Vec<u8>, LoadError> {
        self.bundled
            .open(path.trim_start_matches('/'))
            .ok_or(LoadError::NotFound)
    }

    /// Start a network fetch
    pub fn fetch_network(&self, url: &Url, on_done: FetchCallback) {
        self.network.fetch(url, on_done);
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("cache", &self.cache.namespace_dir())
            .finish()
    }
}
