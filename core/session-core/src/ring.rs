//! Fixed-capacity sample buffers with oldest-first eviction.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: i64,
    pub value: f64,
}

/// Keeps the most recent `capacity` samples in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRing {
    capacity: usize,
    samples: VecDeque<MetricSample>,
}

impl MetricRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a sample, returning the evicted one if the ring was full.
    pub fn push(&mut self, sample: MetricSample) -> Option<MetricSample> {
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front()
        } else {
            None
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSample> {
        self.samples.iter()
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|sample| sample.value).collect()
    }

    /// Arithmetic mean of the retained window; `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|sample| sample.value).sum();
        Some(sum / self.samples.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp: i64, value: f64) -> MetricSample {
        MetricSample { timestamp, value }
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut ring = MetricRing::new(3);
        for i in 0..3 {
            assert!(ring.push(sample(i, i as f64)).is_none());
        }
        let evicted = ring.push(sample(3, 3.0)).expect("evicted");
        assert_eq!(evicted.timestamp, 0);
        assert_eq!(ring.values(), vec![1.0, 2.0, 3.0]);
        assert_eq!(ring.latest().map(|s| s.value), Some(3.0));
    }

    #[test]
    fn mean_covers_retained_window_only() {
        let mut ring = MetricRing::new(2);
        ring.push(sample(0, 100.0));
        ring.push(sample(1, 10.0));
        ring.push(sample(2, 20.0));
        assert_eq!(ring.mean(), Some(15.0));
    }

    #[test]
    fn empty_ring_has_no_mean() {
        let ring = MetricRing::new(5);
        assert!(ring.is_empty());
        assert_eq!(ring.mean(), None);
    }

    #[test]
    fn zero_capacity_is_coerced_to_one() {
        let mut ring = MetricRing::new(0);
        ring.push(sample(0, 1.0));
        ring.push(sample(1, 2.0));
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.values(), vec![2.0]);
    }
}
