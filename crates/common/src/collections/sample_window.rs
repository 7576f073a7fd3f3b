//! A fixed-capacity rolling window of numeric samples.
//!
//! A [`SampleWindow`] keeps the most recent `capacity` observations in
//! insertion order. When [`push`](SampleWindow::push) receives a sample and
//! the window is full, the oldest sample is discarded. Aggregates
//! ([`mean`](SampleWindow::mean), [`max`](SampleWindow::max)) are computed
//! over whatever is currently retained, so memory stays bounded no matter how
//! long a monitor runs.
//!
//! # Complexity
//! - `push`, `last`, `len`, `is_full` are **O(1)**; `mean` and `max` are
//!   **O(n)** over at most `capacity` samples.

use std::collections::VecDeque;

/// Rolling window of `f64` samples
///
/// # Examples
///
/// ```rust
/// use streamwarden_common::collections::SampleWindow;
///
/// let mut latencies = SampleWindow::new(3);
/// latencies.push(10.0);
/// latencies.push(20.0);
/// latencies.push(30.0);
/// latencies.push(40.0); // evicts 10.0
///
/// assert_eq!(latencies.mean(), Some(30.0));
/// assert_eq!(latencies.last(), Some(40.0));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct SampleWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SampleWindow {
    /// Creates a new window; a capacity of zero is clamped to `1`.
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    /// Records a sample, evicting the oldest when full.
    ///
    /// Non-finite samples are ignored so a single bad measurement cannot
    /// poison the aggregates.
    #[inline]
    pub fn push(&mut self, sample: f64) {
        if !sample.is_finite() {
            return;
        }
        if self.is_full() {
            let _ = self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Arithmetic mean of the retained samples, `None` when empty.
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Largest retained sample, `None` when empty.
    #[must_use]
    pub fn max(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::max)
    }

    /// Most recent sample.
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Number of retained samples.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` when no samples are retained.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `true` once the window holds `capacity` samples.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Maximum number of retained samples.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops every sample, keeping the capacity.
    #[inline]
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Iterates samples from oldest to newest.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut window = SampleWindow::new(0);
        assert_eq!(window.capacity(), 1);
        window.push(1.0);
        window.push(2.0);
        assert_eq!(window.len(), 1);
        assert_eq!(window.last(), Some(2.0));
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let mut window = SampleWindow::new(100);
        for i in 0..250 {
            window.push(f64::from(i));
        }
        assert_eq!(window.len(), 100);
        assert_eq!(window.iter().next(), Some(150.0));
        assert_eq!(window.last(), Some(249.0));
    }

    #[test]
    fn test_aggregates() {
        let mut window = SampleWindow::new(4);
        assert_eq!(window.mean(), None);
        assert_eq!(window.max(), None);

        window.push(2.0);
        window.push(4.0);
        window.push(9.0);
        assert_eq!(window.mean(), Some(5.0));
        assert_eq!(window.max(), Some(9.0));
    }

    #[test]
    fn test_non_finite_samples_ignored() {
        let mut window = SampleWindow::new(3);
        window.push(f64::NAN);
        window.push(f64::INFINITY);
        assert!(window.is_empty());
        window.push(1.5);
        assert_eq!(window.mean(), Some(1.5));
    }

    #[test]
    fn test_clear() {
        let mut window = SampleWindow::new(2);
        window.push(1.0);
        window.push(2.0);
        assert!(window.is_full());
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.capacity(), 2);
    }
}
