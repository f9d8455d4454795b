//! Engine: the public entry point
//!
//! Construction opens the disk cache and starts the worker thread;
//! [`Engine::shutdown`] (or dropping the engine) stops it. Work still queued
//! at shutdown is abandoned.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use lowprofile_cache::DiskCache;
use tracing::{debug, info, warn};

use crate::coalescer::PendingRequest;
use crate::config::EngineConfig;
use crate::dispatcher::{CompletionDispatcher, Foreground};
use crate::error::Result;
use crate::fetcher::{BundledSource, DirectorySource, Fetcher, HttpFetcher, MemorySource, NetworkFetcher};
use crate::locator::ResourceLocator;
use crate::scheduler::{Scheduler, Shared};
use crate::stats::EngineStats;
use crate::target::{Materializer, VisualTarget};

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Turn async loading on or off for every engine in the process. While
/// off, requests take the synchronous bypass.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::SeqCst);
}

/// Whether async loading is on process-wide
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

/// Builder for [`Engine`]
pub struct EngineBuilder<T: VisualTarget> {
    config: EngineConfig,
    materializer: Arc<dyn Materializer<T::Renderable>>,
    foreground: Arc<dyn Foreground>,
    network: Option<Arc<dyn NetworkFetcher>>,
    bundled: Option<Arc<dyn BundledSource>>,
}

impl<T: VisualTarget> EngineBuilder<T> {
    /// Replace the configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `network` instead of the default HTTP fetcher
    pub fn network(mut self, network: Arc<dyn NetworkFetcher>) -> Self {
        self.network = Some(network);
        self
    }

    /// Use `bundled` instead of the configured bundle directory
    pub fn bundled(mut self, bundled: Arc<dyn BundledSource>) -> Self {
        self.bundled = Some(bundled);
        self
    }

    /// Open the cache and start the worker
    pub fn build(self) -> Result<Engine<T>> {
        let config = self.config;
        config.validate()?;

        let cache = Arc::new(DiskCache::open(&config.cache_root, &config.cache_namespace)?);
        let network: Arc<dyn NetworkFetcher> = match self.network {
            Some(network) => network,
            None => Arc::new(HttpFetcher::new(&config)?),
        };
        let bundled: Arc<dyn BundledSource> = match (self.bundled, &config.bundle_root) {
            (Some(bundled), _) => bundled,
            (None, Some(root)) => Arc::new(DirectorySource::new(root.clone())),
            (None, None) => Arc::new(MemorySource::new()),
        };

        let stats = Arc::new(EngineStats::new());
        let shared = Arc::new(Shared::new());
        let dispatcher = Arc::new(CompletionDispatcher::new(
            self.foreground,
            Arc::clone(&self.materializer),
            Arc::clone(&cache),
            Arc::clone(&stats),
            config.cache_undecodable,
        ));
        let fetcher = Fetcher::new(Arc::clone(&cache), bundled, network);
        let scheduler = Scheduler::new(
            Arc::clone(&shared),
            fetcher,
            dispatcher,
            Arc::clone(&stats),
            &config,
        );

        let worker = std::thread::Builder::new()
            .name("lowprofile-worker".to_string())
            .spawn(move || scheduler.run())?;

        info!(
            "Engine started (cache {:?}, quantum {})",
            cache.namespace_dir(),
            config.quantum
        );

        Ok(Engine {
            shared,
            worker: Some(worker),
            materializer: self.materializer,
            cache,
            stats,
            config,
        })
    }
}

/// Asynchronous loader with request coalescing and a disk cache
pub struct Engine<T: VisualTarget> {
    shared: Arc<Shared<T>>,
    worker: Option<JoinHandle<()>>,
    materializer: Arc<dyn Materializer<T::Renderable>>,
    cache: Arc<DiskCache>,
    stats: Arc<EngineStats>,
    config: EngineConfig,
}

impl<T: VisualTarget> Engine<T> {
    /// Start building an engine that decodes with `materializer` and
    /// applies results on `foreground`
    pub fn builder<M>(materializer: M, foreground: Arc<dyn Foreground>) -> EngineBuilder<T>
    where
        M: Materializer<T::Renderable>,
    {
        EngineBuilder {
            config: EngineConfig::default(),
            materializer: Arc::new(materializer),
            foreground,
            network: None,
            bundled: None,
        }
    }

    /// The target now wants `locator`.
    ///
    /// Clears the target's current value and queues the load, replacing
    /// any load still queued for the same target. When async loading is
    /// disabled the bypass runs instead and nothing is queued.
    pub fn request(&self, target: &Arc<T>, locator: ResourceLocator) {
        self.stats.record_request();

        if !self.config.enabled || !is_enabled() {
            debug!("Async loading disabled, bypassing for {}", locator);
            target.set_renderable(self.materializer.materialize_direct(&locator));
            return;
        }

        // Stale while the new resource loads
        target.set_renderable(None);

        if self.shared.is_exiting() {
            debug!("Engine shut down, ignoring request for {}", locator);
            return;
        }

        let request = PendingRequest::new(Arc::clone(target), locator);
        if self.shared.enqueue_request(request) {
            self.stats.record_superseded();
        }
    }

    /// Parse `locator` and [`request`](Self::request) it
    pub fn request_str(&self, target: &Arc<T>, locator: &str) {
        self.request(target, ResourceLocator::parse(locator));
    }

    /// Stop the worker and wait for it to exit. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.request_exit();
        if worker.join().is_err() {
            warn!("Worker thread panicked");
        }
        info!("Engine stopped");
    }

    /// Whether the worker is running
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Requests waiting to be picked up by the worker
    pub fn queued_requests(&self) -> usize {
        self.shared.queued_requests()
    }

    /// Engine statistics
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// The disk cache
    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// The configuration the engine was built with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl<T: VisualTarget> Drop for Engine<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: VisualTarget> fmt::Debug for Engine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.is_running())
            .field("cache", &self.cache.namespace_dir())
            .field("quantum", &self.config.quantum)
            .finish()
    }
}
