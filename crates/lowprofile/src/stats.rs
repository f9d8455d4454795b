//! Engine statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters for what the engine did with its requests
#[derive(Debug, Default)]
pub struct EngineStats {
    requests: AtomicU64,
    superseded: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    network_fetches: AtomicU64,
    network_failures: AtomicU64,
    bundled_hits: AtomicU64,
    bundled_missing: AtomicU64,
    completions: AtomicU64,
    stale_discarded: AtomicU64,
    decode_failures: AtomicU64,
    cache_writes: AtomicU64,
    batches: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Requests accepted by the engine
    pub requests: u64,
    /// Queued requests replaced by a newer one for the same target
    pub superseded: u64,
    /// Network locators served from the disk cache
    pub cache_hits: u64,
    /// Network locators not found in the disk cache
    pub cache_misses: u64,
    /// Network fetches issued
    pub network_fetches: u64,
    /// Network fetches that failed and were dropped
    pub network_failures: u64,
    /// Bundled locators resolved
    pub bundled_hits: u64,
    /// Bundled locators that were absent
    pub bundled_missing: u64,
    /// Completions handed to the foreground
    pub completions: u64,
    /// Completions discarded because the target moved on
    pub stale_discarded: u64,
    /// Completions whose bytes failed to materialize
    pub decode_failures: u64,
    /// New disk cache entries written
    pub cache_writes: u64,
    /// Foreground batches posted
    pub batches: u64,
}

macro_rules! counters {
    ($($field:ident => $record:ident),* $(,)?) => {
        $(
            #[doc = concat!("Count one `", stringify!($field), "` event")]
            pub fn $record(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }

            #[doc = concat!("Total `", stringify!($field), "` events")]
            pub fn $field(&self) -> u64 {
                self.$field.load(Ordering::Relaxed)
            }
        )*
    };
}

impl EngineStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    counters! {
        requests => record_request,
        superseded => record_superseded,
        cache_hits => record_cache_hit,
        cache_misses => record_cache_miss,
        network_fetches => record_network_fetch,
        network_failures => record_network_failure,
        bundled_hits => record_bundled_hit,
        bundled_missing => record_bundled_missing,
        stale_discarded => record_stale,
        decode_failures => record_decode_failure,
        cache_writes => record_cache_write,
    }

    /// Record a batch of `completions` posted to the foreground
    pub fn record_batch(&self, completions: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.completions
            .fetch_add(completions as u64, Ordering::Relaxed);
    }

    /// Count `n` superseded requests at once
    pub fn record_superseded_n(&self, n: usize) {
        self.superseded.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Total completions posted
    pub fn completions(&self) -> u64 {
        self.completions.load(Ordering::Relaxed)
    }

    /// Total batches posted
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Disk cache hit ratio over network locators (0.0 to 1.0)
    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits();
        let total = hits + self.cache_misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Copy all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests(),
            superseded: self.superseded(),
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            network_fetches: self.network_fetches(),
            network_failures: self.network_failures(),
            bundled_hits: self.bundled_hits(),
            bundled_missing: self.bundled_missing(),
            completions: self.completions(),
            stale_discarded: self.stale_discarded(),
            decode_failures: self.decode_failures(),
            cache_writes: self.cache_writes(),
            batches: self.batches(),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [
            &self.requests,
            &self.superseded,
            &self.cache_hits,
            &self.cache_misses,
            &self.network_fetches,
            &self.network_failures,
            &self.bundled_hits,
            &self.bundled_missing,
            &self.completions,
            &self.stale_discarded,
            &self.decode_failures,
            &self.cache_writes,
            &self.batches,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
