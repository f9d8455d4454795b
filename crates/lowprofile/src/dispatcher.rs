//! Hand-off of finished loads to the foreground
//!
//! Every scheduler iteration that produces completions posts exactly one
//! unit of work to the foreground. That unit checks each completion
//! against the target's current locator, materializes the fresh ones, and
//! writes network bytes into the disk cache.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use lowprofile_cache::DiskCache;
use tracing::{debug, trace};

use crate::locator::ResourceLocator;
use crate::stats::EngineStats;
use crate::target::{Materializer, VisualTarget};

/// A unit of work for the foreground context
pub type ForegroundWork = Box<dyn FnOnce() + Send + 'static>;

/// The single-threaded context that owns the targets (the UI thread)
pub trait Foreground: Send + Sync + 'static {
    /// Schedule `work` to run on the foreground. Must not run it inline
    /// on the calling thread.
    fn post(&self, work: ForegroundWork);
}

/// Foreground backed by a channel that the owning thread pumps
#[derive(Debug, Clone)]
pub struct ForegroundQueue {
    tx: Sender<ForegroundWork>,
    rx: Receiver<ForegroundWork>,
}

impl ForegroundQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Run everything already posted. Returns the number of units run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(work) = self.rx.try_recv() {
            work();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for work, then run everything posted so far.
    pub fn run_for(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(work) => {
                work();
                1 + self.run_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Pump until `done` returns true or `timeout` elapses. Returns `done()`.
    pub fn run_until<F: FnMut() -> bool>(&self, timeout: Duration, mut done: F) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.run_for((deadline - now).min(Duration::from_millis(20)));
        }
    }

    /// Units posted but not yet run
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Default for ForegroundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Foreground for ForegroundQueue {
    fn post(&self, work: ForegroundWork) {
        // The queue holds its own receiver, so sending cannot fail
        let _ = self.tx.send(work);
    }
}

/// Where a completion's bytes came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Disk cache hit
    Cache,
    /// Application bundle
    Bundled,
    /// Network response
    Network,
}

/// Bytes ready to be applied to a target
pub struct PendingCompletion<T> {
    /// Target that asked for the bytes
    pub target: Arc<T>,
    /// Locator the bytes were loaded for
    pub locator: ResourceLocator,
    /// The loaded bytes, dropped once the completion is processed
    pub bytes: Vec<u8>,
    /// Source of the bytes
    pub origin: Origin,
}

impl<T> PendingCompletion<T> {
    /// Create a completion
    pub fn new(target: Arc<T>, locator: ResourceLocator, bytes: Vec<u8>, origin: Origin) -> Self {
        Self {
            target,
            locator,
            bytes,
            origin,
        }
    }
}

impl<T> fmt::Debug for PendingCompletion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCompletion")
            .field("target", &Arc::as_ptr(&self.target))
            .field("locator", &self.locator)
            .field("bytes", &self.bytes.len())
            .field("origin", &self.origin)
            .finish()
    }
}

/// What the foreground did with one completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Target had moved on to another locator
    Stale,
    /// Value assigned to the target
    Assigned,
    /// Bytes did not materialize; target left without a value
    DecodeFailed,
}

/// Posts completion batches to the foreground and applies them there
pub struct CompletionDispatcher<T: VisualTarget> {
    foreground: Arc<dyn Foreground>,
    materializer: Arc<dyn Materializer<T::Renderable>>,
    cache: Arc<DiskCache>,
    stats: Arc<EngineStats>,
    cache_undecodable: bool,
}

impl<T: VisualTarget> CompletionDispatcher<T> {
    /// Create a dispatcher
    pub fn new(
        foreground: Arc<dyn Foreground>,
        materializer: Arc<dyn Materializer<T::Renderable>>,
        cache: Arc<DiskCache>,
        stats: Arc<EngineStats>,
        cache_undecodable: bool,
    ) -> Self {
        Self {
            foreground,
            materializer,
            cache,
            stats,
            cache_undecodable,
        }
    }

    /// Post `batch` to the foreground as one unit of work
    pub fn deliver(self: &Arc<Self>, batch: Vec<PendingCompletion<T>>) {
        if batch.is_empty() {
            return;
        }
        self.stats.record_batch(batch.len());
        trace!("Posting batch of {} completions", batch.len());

        let dispatcher = Arc::clone(self);
        self.foreground.post(Box::new(move || {
            for completion in batch {
                dispatcher.apply(completion);
            }
        }));
    }

    /// Apply one completion. Runs on the foreground.
    pub fn apply(&self, completion: PendingCompletion<T>) -> Applied {
        let PendingCompletion {
            target,
            locator,
            bytes,
            origin,
        } = completion;

        if target.current_locator().as_ref() != Some(&locator) {
            self.stats.record_stale();
            trace!("Discarding stale completion for {}", locator);
            return Applied::Stale;
        }

        let applied = match self.materializer.materialize(&bytes) {
            Ok(value) => {
                target.set_renderable(Some(value));
                Applied::Assigned
            }
            Err(e) => {
                self.stats.record_decode_failure();
                debug!("Materializing {} failed: {}", locator, e);
                Applied::DecodeFailed
            }
        };

        // Cache hits are already on disk
        let cacheable = applied == Applied::Assigned || self.cache_undecodable;
        if locator.is_network() && origin != Origin::Cache && cacheable {
            if self.cache.put(&locator.cache_key(), &bytes) {
                self.stats.record_cache_write();
            }
        }

        applied
    }
}

impl<T: VisualTarget> fmt::Debug for CompletionDispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionDispatcher")
            .field("cache", &self.cache.namespace_dir())
            .field("cache_undecodable", &self.cache_undecodable)
            .finish()
    }
}
