// SPDX-License-Identifier: AGPL-3.0
//! # Pollution Windows
//!
//! Raw sensor readings are smoothed through an overlapping sliding window and
//! only the per-window averages travel to the master with each completed
//! delivery.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Overlapping sliding window over a stream of measurements.
///
/// The first window is emitted once `size` readings are buffered. From then on
/// the buffer grows to `size + overlap`, the oldest `overlap` readings are
/// discarded and the remaining `size` readings form the next window.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    size: usize,
    overlap: usize,
    buffer: VecDeque<f64>,
    emitted_first: bool,
}

impl SlidingWindow {
    pub fn new(size: usize, overlap: usize) -> Self {
        assert!(
            size > overlap,
            "window size ({size}) must be greater than its overlap ({overlap})"
        );
        Self {
            size,
            overlap,
            buffer: VecDeque::with_capacity(size + overlap),
            emitted_first: false,
        }
    }

    /// Add a reading, returning a full window when one completes.
    pub fn push(&mut self, measurement: f64) -> Option<Vec<f64>> {
        self.buffer.push_back(measurement);
        if !self.emitted_first {
            if self.buffer.len() == self.size {
                self.emitted_first = true;
                return Some(self.buffer.iter().copied().collect());
            }
            return None;
        }
        if self.buffer.len() == self.size + self.overlap {
            self.buffer.drain(..self.overlap);
            return Some(self.buffer.iter().copied().collect());
        }
        None
    }
}

/// Collects window averages between two delivery reports.
#[derive(Debug)]
pub struct PollutionTracker {
    window: Mutex<SlidingWindow>,
    averages: Mutex<Vec<f64>>,
}

impl PollutionTracker {
    pub fn new(window_size: usize, window_overlap: usize) -> Self {
        Self {
            window: Mutex::new(SlidingWindow::new(window_size, window_overlap)),
            averages: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, measurement: f64) {
        let completed = self.window.lock().push(measurement);
        if let Some(window) = completed {
            let average = window.iter().sum::<f64>() / window.len() as f64;
            self.averages.lock().push(average);
        }
    }

    /// Take every average gathered since the last drain.
    pub fn drain(&self) -> Vec<f64> {
        std::mem::take(&mut *self.averages.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_window_after_size_readings() {
        let mut window = SlidingWindow::new(4, 2);
        assert!(window.push(1.0).is_none());
        assert!(window.push(2.0).is_none());
        assert!(window.push(3.0).is_none());
        assert_eq!(window.push(4.0), Some(vec![1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_following_windows_overlap() {
        let mut window = SlidingWindow::new(4, 2);
        for v in 1..=4 {
            window.push(v as f64);
        }
        assert!(window.push(5.0).is_none());
        assert_eq!(window.push(6.0), Some(vec![3.0, 4.0, 5.0, 6.0]));
        assert!(window.push(7.0).is_none());
        assert_eq!(window.push(8.0), Some(vec![5.0, 6.0, 7.0, 8.0]));
    }

    #[test]
    #[should_panic(expected = "greater than its overlap")]
    fn test_overlap_must_be_smaller() {
        SlidingWindow::new(4, 4);
    }

    #[test]
    fn test_tracker_averages_and_drains() {
        let tracker = PollutionTracker::new(2, 1);
        tracker.record(10.0);
        tracker.record(20.0); // [10, 20]
        tracker.record(40.0); // [20, 40]
        assert_eq!(tracker.drain(), vec![15.0, 30.0]);
        assert!(tracker.drain().is_empty());
    }
}
