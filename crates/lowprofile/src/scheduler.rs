//! Background worker loop
//!
//! Requests and network responses cross threads through [`Shared`], a
//! single mutex-protected pair of queues with a condition variable. The
//! worker is the only waiter; request producers and network callbacks are
//! the notifiers.
//!
//! Each iteration moves everything queued into worker-local storage, then
//! handles at most `quantum` requests and at most `quantum` responses before
//! posting whatever completed to the foreground. Requests are taken in
//! random order so that neither the oldest nor the newest can starve.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, trace};

use crate::coalescer::{Coalescer, PendingRequest};
use crate::config::EngineConfig;
use crate::dispatcher::{CompletionDispatcher, Origin, PendingCompletion};
use crate::error::LoadError;
use crate::fetcher::Fetcher;
use crate::locator::ResourceLocator;
use crate::stats::EngineStats;
use crate::target::VisualTarget;

/// Outcome of a network fetch, correlated with the request that issued it
pub struct FetchResponse<T> {
    /// Target that asked for the resource
    pub target: Arc<T>,
    /// Locator that was fetched
    pub locator: ResourceLocator,
    /// Body or failure
    pub result: Result<Vec<u8>, LoadError>,
}

impl<T> fmt::Debug for FetchResponse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("locator", &self.locator)
            .field("ok", &self.result.is_ok())
            .finish()
    }
}

/// Queues shared between producers and the worker
pub(crate) struct SharedQueues<T> {
    pub(crate) requests: Coalescer<T>,
    pub(crate) responses: VecDeque<FetchResponse<T>>,
}

/// Cross-thread state: the queues, their condition, and the exit flag
pub(crate) struct Shared<T> {
    queues: Mutex<SharedQueues<T>>,
    wake: Condvar,
    exiting: AtomicBool,
}

impl<T> Shared<T> {
    pub(crate) fn new() -> Self {
        Self {
            queues: Mutex::new(SharedQueues {
                requests: Coalescer::new(),
                responses: VecDeque::new(),
            }),
            wake: Condvar::new(),
            exiting: AtomicBool::new(false),
        }
    }

    /// Queue a request and wake the worker. Returns `true` if a queued
    /// request for the same target was replaced.
    pub(crate) fn enqueue_request(&self, request: PendingRequest<T>) -> bool {
        let mut queues = self.queues.lock();
        let superseded = queues.requests.enqueue(request);
        self.wake.notify_one();
        superseded
    }

    /// Queue a network response and wake the worker
    pub(crate) fn enqueue_response(&self, response: FetchResponse<T>) {
        let mut queues = self.queues.lock();
        queues.responses.push_back(response);
        self.wake.notify_one();
    }

    /// Ask the worker to exit at its next wake-up
    pub(crate) fn request_exit(&self) {
        self.exiting.store(true, Ordering::SeqCst);
        let _queues = self.queues.lock();
        self.wake.notify_all();
    }

    pub(crate) fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    /// Requests queued but not yet picked up by the worker
    pub(crate) fn queued_requests(&self) -> usize {
        self.queues.lock().requests.len()
    }
}

/// Where the worker is within an iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for work
    Idle,
    /// Moving shared queues into local storage
    Draining,
    /// Handling up to one quantum of requests
    ProcessingRequests,
    /// Handling up to one quantum of responses
    ProcessingResponses,
    /// Posting completions to the foreground
    Dispatching,
    /// Loop has exited
    Terminated,
}

/// Work done by one scheduler iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationReport {
    /// Requests taken from the working set
    pub requests_processed: usize,
    /// Responses taken from the response queue
    pub responses_processed: usize,
    /// Completions posted to the foreground
    pub completions: usize,
    /// Requests left for later iterations
    pub requests_remaining: usize,
    /// Responses left for later iterations
    pub responses_remaining: usize,
}

/// Worker-local state of the background loop
pub(crate) struct Scheduler<T: VisualTarget> {
    shared: Arc<Shared<T>>,
    requests: Coalescer<T>,
    responses: VecDeque<FetchResponse<T>>,
    fetcher: Fetcher,
    dispatcher: Arc<CompletionDispatcher<T>>,
    stats: Arc<EngineStats>,
    rng: StdRng,
    quantum: usize,
    yield_between_items: bool,
    state: SchedulerState,
}

impl<T: VisualTarget> Scheduler<T> {
    pub(crate) fn new(
        shared: Arc<Shared<T>>,
        fetcher: Fetcher,
        dispatcher: Arc<CompletionDispatcher<T>>,
        stats: Arc<EngineStats>,
        config: &EngineConfig,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            shared,
            requests: Coalescer::new(),
            responses: VecDeque::new(),
            fetcher,
            dispatcher,
            stats,
            rng,
            quantum: config.quantum,
            yield_between_items: config.yield_between_items,
            state: SchedulerState::Idle,
        }
    }

    /// Run until shutdown is requested
    pub(crate) fn run(mut self) {
        info!("Worker started (quantum {})", self.quantum);
        while self.wait_for_work() {
            let report = self.iterate();
            trace!(?report, "Iteration done");
        }
        self.transition(SchedulerState::Terminated);
        info!(
            "Worker stopped with {} requests and {} responses abandoned",
            self.requests.len(),
            self.responses.len()
        );
    }

    /// Block until there is work anywhere, then drain the shared queues.
    /// Returns `false` once shutdown has been requested.
    fn wait_for_work(&mut self) -> bool {
        let shared = Arc::clone(&self.shared);
        let mut queues = shared.queues.lock();
        loop {
            if shared.is_exiting() {
                return false;
            }
            let idle = queues.requests.is_empty()
                && queues.responses.is_empty()
                && self.requests.is_empty()
                && self.responses.is_empty();
            if !idle {
                break;
            }
            shared.wake.wait(&mut queues);
        }
        self.drain(&mut queues);
        true
    }

    /// Drain the shared queues without blocking
    #[cfg(test)]
    pub(crate) fn drain_now(&mut self) {
        let shared = Arc::clone(&self.shared);
        let mut queues = shared.queues.lock();
        self.drain(&mut queues);
    }

    fn drain(&mut self, queues: &mut SharedQueues<T>) {
        self.transition(SchedulerState::Draining);
        let superseded = self.requests.absorb(&mut queues.requests);
        if superseded > 0 {
            self.stats.record_superseded_n(superseded);
        }
        self.responses.extend(queues.responses.drain(..));
    }

    /// Handle one quantum of requests and responses and post the results
    pub(crate) fn iterate(&mut self) -> IterationReport {
        let mut report = IterationReport::default();
        let mut completions = Vec::new();

        self.transition(SchedulerState::ProcessingRequests);
        while report.requests_processed < self.quantum {
            let Some(request) = self.requests.remove_random(&mut self.rng) else {
                break;
            };
            self.process_request(request, &mut completions);
            report.requests_processed += 1;
            self.pause();
        }

        self.transition(SchedulerState::ProcessingResponses);
        while report.responses_processed < self.quantum {
            let Some(response) = self.responses.pop_front() else {
                break;
            };
            self.process_response(response, &mut completions);
            report.responses_processed += 1;
            self.pause();
        }

        self.transition(SchedulerState::Dispatching);
        report.completions = completions.len();
        self.dispatcher.deliver(completions);

        report.requests_remaining = self.requests.len();
        report.responses_remaining = self.responses.len();
        self.transition(SchedulerState::Idle);
        report
    }

    fn process_request(
        &mut self,
        request: PendingRequest<T>,
        completions: &mut Vec<PendingCompletion<T>>,
    ) {
        let PendingRequest { target, locator } = request;
        match &locator {
            ResourceLocator::Network(url) => {
                if let Some(bytes) = self.fetcher.fetch_cached(&locator.cache_key()) {
                    self.stats.record_cache_hit();
                    trace!("Cache hit for {}", locator);
                    completions.push(PendingCompletion::new(target, locator, bytes, Origin::Cache));
                    return;
                }

                self.stats.record_cache_miss();
                self.stats.record_network_fetch();
                trace!("Fetching {}", locator);
                let shared = Arc::clone(&self.shared);
                let url = url.clone();
                self.fetcher.fetch_network(
                    &url,
                    Box::new(move |result| {
                        shared.enqueue_response(FetchResponse {
                            target,
                            locator,
                            result,
                        });
                    }),
                );
            }
            ResourceLocator::Bundled(path) => match self.fetcher.fetch_bundled(path) {
                Ok(bytes) => {
                    self.stats.record_bundled_hit();
                    completions.push(PendingCompletion::new(target, locator, bytes, Origin::Bundled));
                }
                Err(e) => {
                    self.stats.record_bundled_missing();
                    debug!("Dropping {}: {}", locator, e);
                }
            },
        }
    }

    fn process_response(
        &mut self,
        response: FetchResponse<T>,
        completions: &mut Vec<PendingCompletion<T>>,
    ) {
        let FetchResponse {
            target,
            locator,
            result,
        } = response;
        match result {
            Ok(bytes) => {
                completions.push(PendingCompletion::new(target, locator, bytes, Origin::Network));
            }
            Err(e) => {
                // No retry: the target can ask again by changing its locator
                self.stats.record_network_failure();
                debug!("Dropping {}: {}", locator, e);
            }
        }
    }

    fn pause(&self) {
        if self.yield_between_items {
            std::thread::yield_now();
        }
    }

    fn transition(&mut self, next: SchedulerState) {
        trace!(from = ?self.state, to = ?next, "Scheduler state");
        self.state = next;
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SchedulerState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn local_requests(&self) -> usize {
        self.requests.len()
    }

    #[cfg(test)]
    pub(crate) fn local_responses(&self) -> usize {
        self.responses.len()
    }
}
