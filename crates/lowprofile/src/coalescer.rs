//! Pending-request queue with one slot per target
//!
//! A request for a target that already has a queued request replaces it in
//! place, so at most one request per target survives. Requests are taken
//! out in uniformly random order by the scheduler.

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use rand::Rng;

use crate::locator::ResourceLocator;

/// A target waiting for a resource
pub struct PendingRequest<T> {
    /// Who receives the result
    pub target: Arc<T>,
    /// What to load
    pub locator: ResourceLocator,
}

impl<T> PendingRequest<T> {
    /// Create a request
    pub fn new(target: Arc<T>, locator: ResourceLocator) -> Self {
        Self { target, locator }
    }
}

impl<T> fmt::Debug for PendingRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("target", &Arc::as_ptr(&self.target))
            .field("locator", &self.locator)
            .finish()
    }
}

/// Identity of a target: the address of its shared allocation. Stable for
/// as long as some queue holds the `Arc`.
pub(crate) fn target_id<T>(target: &Arc<T>) -> usize {
    Arc::as_ptr(target) as *const () as usize
}

/// Queue that keeps at most one request per target
pub struct Coalescer<T> {
    requests: Vec<PendingRequest<T>>,
    /// target id -> position in `requests`
    slots: AHashMap<usize, usize>,
}

impl<T> Coalescer<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            slots: AHashMap::new(),
        }
    }

    /// Add a request, replacing any queued request for the same target.
    ///
    /// Returns `true` if an older request was superseded.
    pub fn enqueue(&mut self, request: PendingRequest<T>) -> bool {
        let id = target_id(&request.target);
        match self.slots.get(&id) {
            Some(&pos) => {
                self.requests[pos] = request;
                true
            }
            None => {
                self.slots.insert(id, self.requests.len());
                self.requests.push(request);
                false
            }
        }
    }

    /// Take every queued request, leaving the queue empty
    pub fn drain_all(&mut self) -> Vec<PendingRequest<T>> {
        self.slots.clear();
        std::mem::take(&mut self.requests)
    }

    /// Move every request of `other` into this queue, coalescing against
    /// what is already here. Returns the number of superseded requests.
    pub fn absorb(&mut self, other: &mut Coalescer<T>) -> usize {
        let mut superseded = 0;
        for request in other.drain_all() {
            if self.enqueue(request) {
                superseded += 1;
            }
        }
        superseded
    }

    /// Remove one request chosen uniformly at random
    pub fn remove_random<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<PendingRequest<T>> {
        if self.requests.is_empty() {
            return None;
        }
        let pos = rng.gen_range(0..self.requests.len());
        let request = self.requests.swap_remove(pos);
        self.slots.remove(&target_id(&request.target));
        if let Some(moved) = self.requests.get(pos) {
            self.slots.insert(target_id(&moved.target), pos);
        }
        Some(request)
    }

    /// Locator queued for `target`, if any
    pub fn get(&self, target: &Arc<T>) -> Option<&ResourceLocator> {
        self.slots
            .get(&target_id(target))
            .map(|&pos| &self.requests[pos].locator)
    }

    /// Number of queued requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl<T> Default for Coalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Coalescer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.requests.iter()).finish()
    }
}
