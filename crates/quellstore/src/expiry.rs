//! Time-indexed expiry bookkeeping
//!
//! One min-heap keyed by `expiresAt` replaces a timer per entry. Rewriting a
//! key pushes a fresh heap item; the latest deadline per key is kept on the
//! side so superseded items are skipped when they surface.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use ahash::RandomState;

/// Min-heap of `(expires_at, key)` with lazy invalidation
#[derive(Debug, Default)]
pub struct ExpiryIndex {
    heap: BinaryHeap<Reverse<(u64, String)>>,
    deadlines: HashMap<String, u64, RandomState>,
}

impl ExpiryIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule (or reschedule) `key` to expire at `expires_at`
    pub fn schedule(&mut self, key: &str, expires_at: u64) {
        self.deadlines.insert(key.to_string(), expires_at);
        self.heap.push(Reverse((expires_at, key.to_string())));

        if self.heap.len() > 2 * self.deadlines.len() + 64 {
            self.compact();
        }
    }

    /// Forget `key`; its heap item is skipped when it surfaces
    pub fn cancel(&mut self, key: &str) {
        self.deadlines.remove(key);
    }

    /// Current deadline of `key`, if tracked
    pub fn deadline(&self, key: &str) -> Option<u64> {
        self.deadlines.get(key).copied()
    }

    /// Check a tracked key against `now`; untracked keys are never expired here
    pub fn is_expired(&self, key: &str, now: u64) -> bool {
        self.deadline(key).is_some_and(|at| now >= at)
    }

    /// Remove and return every key whose deadline is at or before `now`
    pub fn pop_expired(&mut self, now: u64) -> Vec<String> {
        let mut expired = Vec::new();

        while let Some(Reverse((at, _))) = self.heap.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((at, key))) = self.heap.pop() else {
                break;
            };
            if self.deadlines.get(&key) == Some(&at) {
                self.deadlines.remove(&key);
                expired.push(key);
            }
        }

        expired
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Drop all bookkeeping
    pub fn clear(&mut self) {
        self.heap.clear();
        self.deadlines.clear();
    }

    fn compact(&mut self) {
        self.heap = self
            .deadlines
            .iter()
            .map(|(key, at)| Reverse((*at, key.clone())))
            .collect();
    }
}
