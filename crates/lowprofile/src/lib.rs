//! # lowprofile
//!
//! Loads images (or any resource bytes) off the UI thread.
//!
//! ## Architecture
//! - **Coalescer**: one pending request per target, newest wins
//! - **Scheduler**: a single worker thread handling a bounded quantum of
//!   requests and network responses per iteration, in random order
//! - **Fetcher**: disk cache, application bundle, or async HTTP
//! - **Dispatcher**: one foreground unit of work per iteration; stale
//!   results are dropped, fresh network bytes are cached
//!
//! Failures never reach the requester. A load that cannot complete leaves
//! the target without a value; the target can retry by requesting again.
//!
//! ## Example
//!
//! ```ignore
//! let foreground = Arc::new(ForegroundQueue::new());
//! let engine = Engine::builder(decoder, foreground.clone())
//!     .config(EngineConfig::with_cache_root("/var/cache/app"))
//!     .build()?;
//!
//! engine.request_str(&image, "https://example.com/a.png");
//!
//! // On the UI thread, once per frame
//! foreground.run_pending();
//! ```

#![warn(missing_docs)]

mod coalescer;
mod config;
mod dispatcher;
mod engine;
mod error;
mod fetcher;
mod locator;
mod scheduler;
mod stats;
mod target;

pub use coalescer::{Coalescer, PendingRequest};
pub use config::{EngineConfig, DEFAULT_QUANTUM};
pub use dispatcher::{Foreground, ForegroundQueue, ForegroundWork};
pub use engine::{is_enabled, set_enabled, Engine, EngineBuilder};
pub use error::{Error, LoadError, Result};
pub use fetcher::{
    BundledSource, DirectorySource, FetchCallback, Fetcher, HttpFetcher, MemorySource, NetworkFetcher,
};
pub use locator::ResourceLocator;
pub use stats::{EngineStats, StatsSnapshot};
pub use target::{Materializer, VisualTarget};

pub use lowprofile_cache::{CacheKey, DiskCache};
