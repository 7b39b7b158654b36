//! Fixed-capacity rolling statistics
//!
//! Used for ping round-trip times, initial play offsets and per-file-type
//! seek adjustments. Each window keeps at most `capacity` samples; inserting
//! into a full window evicts the oldest sample. Derived values are recomputed
//! after every mutation.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::time::format_seconds;

/// Sliding window over the most recent samples
#[derive(Debug, Clone, PartialEq)]
pub struct RollingStatistics {
    name: String,
    capacity: usize,
    samples: VecDeque<f64>,
    average: f64,
    min: f64,
    max: f64,
}

impl RollingStatistics {
    /// Create an empty window holding up to `capacity` samples
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            samples: VecDeque::with_capacity(capacity),
            average: 0.0,
            min: 0.0,
            max: 0.0,
        }
    }

    /// Add a sample as the newest entry, evicting the oldest on overflow
    pub fn insert(&mut self, sample: f64) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.update();
    }

    /// Insert several samples in order
    pub fn extend<I: IntoIterator<Item = f64>>(&mut self, samples: I) {
        for sample in samples {
            self.samples.push_back(sample);
        }
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.update();
    }

    /// Empty the window. Calling it on an empty window is a no-op.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.update();
    }

    /// Mean of the samples, 0 when empty
    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Samples oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    fn update(&mut self) {
        if self.samples.is_empty() {
            self.average = 0.0;
            self.min = 0.0;
            self.max = 0.0;
        } else {
            let sum: f64 = self.samples.iter().sum();
            self.min = self.samples.iter().copied().fold(f64::INFINITY, f64::min);
            self.max = self.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            // Summation rounding can push the mean a hair outside [min, max]
            let mean = sum / self.samples.len() as f64;
            self.average = if self.min <= self.max {
                mean.clamp(self.min, self.max)
            } else {
                mean
            };
        }
        tracing::trace!(stats = %self, "rolling statistics updated");
    }
}

impl fmt::Display for RollingStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name:{} average:{} range:{} max:{} min:{}",
            self.name,
            format_seconds(self.average),
            format_seconds(self.range()),
            format_seconds(self.max),
            format_seconds(self.min)
        )
    }
}

/// Rolling statistics keyed by category, created on first use
///
/// Each category gets its own window of `capacity` samples.
#[derive(Debug, Clone, Default)]
pub struct StatsByCategory {
    capacity: usize,
    windows: HashMap<String, RollingStatistics>,
}

impl StatsByCategory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            windows: HashMap::new(),
        }
    }

    /// Record a sample under `category`, creating its window if needed
    pub fn insert(&mut self, category: &str, sample: f64) {
        let capacity = self.capacity;
        self.windows
            .entry(category.to_string())
            .or_insert_with(|| RollingStatistics::new(category, capacity))
            .insert(sample);
    }

    pub fn get(&self, category: &str) -> Option<&RollingStatistics> {
        self.windows.get(category)
    }

    /// Categories in sorted order
    pub fn categories(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.windows.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
