//! A bounded window of recent overload observations.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use conv::ConvUtil;

/// The most recent `capacity` keys seen during overload, with a running count per key.
///
/// Oldest observations are evicted first once the window is full.
#[derive(Debug)]
pub struct ObservationWindow {
    capacity: usize,

    keys: VecDeque<Arc<str>>,
    counts: HashMap<Arc<str>, usize>,
}

impl ObservationWindow {
    /// Create an empty window holding at most `capacity` observations.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be > 0");
        Self {
            capacity,

            keys: VecDeque::with_capacity(capacity),
            counts: HashMap::new(),
        }
    }

    /// Record one observation of `key`, evicting the oldest observation if the window is full.
    pub fn record(&mut self, key: &str) {
        if self.keys.len() >= self.capacity {
            let oldest = self.keys.pop_front().expect("should be non-empty");
            self.forget(&oldest);
        }

        let key = match self.counts.get_key_value(key) {
            Some((existing, _)) => Arc::clone(existing),
            None => Arc::from(key),
        };

        *self.counts.entry(Arc::clone(&key)).or_insert(0) += 1;
        self.keys.push_back(key);
    }

    fn forget(&mut self, key: &Arc<str>) {
        if let Some(count) = self.counts.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(key);
            }
        }
    }

    /// How many observations of `key` are in the window.
    pub fn count(&self, key: &str) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// How many observations, across all keys, are in the window.
    pub fn total(&self) -> usize {
        self.keys.len()
    }

    /// The share of the window taken by `key`, in `[0, 1]`. Zero for an empty window.
    pub fn ratio(&self, key: &str) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }

        let count = self
            .count(key)
            .approx_as::<f64>()
            .expect("count is bounded by the window capacity");
        let total = total
            .approx_as::<f64>()
            .expect("total is bounded by the window capacity");

        count / total
    }

    /// The maximum number of observations held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of distinct keys currently in the window.
    pub fn distinct_keys(&self) -> usize {
        self.counts.len()
    }
}
