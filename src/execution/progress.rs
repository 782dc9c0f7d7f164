//! Progress tracking and cancellation for streamed runs.

use crate::core::region::Region;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A progress update event.
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    /// The run has started.
    Started {
        /// Divisions planned.
        total_divisions: usize,
    },
    /// A division has started processing.
    DivisionStarted {
        /// Division index.
        index: usize,
        /// Division bounds.
        region: Region,
    },
    /// A division has been written.
    DivisionCompleted {
        /// Division index.
        index: usize,
        /// Division bounds.
        region: Region,
        /// Time spent computing and writing it.
        duration_ms: u64,
    },
    /// Overall progress.
    Progress {
        /// Completed divisions over total, in `[0, 1]`.
        fraction: f64,
        /// Optional status text.
        status: Option<String>,
        /// Time since the run started.
        elapsed_ms: u64,
        /// Extrapolated time left, once a division has completed.
        estimated_remaining_ms: Option<u64>,
    },
    /// The run has completed.
    Completed {
        /// Wall time of the run.
        total_duration_ms: u64,
        /// Divisions written.
        divisions: usize,
    },
    /// The run was cancelled between divisions.
    Cancelled {
        /// Divisions written before cancellation.
        completed: usize,
        /// Divisions planned.
        total: usize,
    },
    /// A division failed.
    Error {
        /// Failing division, `None` outside the division loop.
        division: Option<usize>,
        /// Error text.
        message: String,
    },
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Cooperative cancellation flag, checked between divisions.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The current division still completes.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Tracks division progress and reports it to a callback.
pub struct ProgressTracker {
    /// Total number of divisions.
    total_divisions: usize,
    /// Number of divisions written.
    completed: AtomicU64,
    /// Cancellation flag.
    token: CancellationToken,
    /// Start time.
    start_time: Option<Instant>,
    /// Progress callback.
    callback: Option<ProgressCallback>,
    /// Division durations for estimation.
    division_times: parking_lot::Mutex<Vec<u64>>,
}

impl ProgressTracker {
    /// Create a new progress tracker.
    pub fn new(total_divisions: usize) -> Self {
        Self {
            total_divisions,
            completed: AtomicU64::new(0),
            token: CancellationToken::new(),
            start_time: None,
            callback: None,
            division_times: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Set a callback for progress updates.
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Share an existing cancellation token.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Start tracking.
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
        self.send_update(ProgressUpdate::Started {
            total_divisions: self.total_divisions,
        });
        self.send_progress_update(Some("started".to_string()));
    }

    /// Report that a division has started.
    pub fn division_started(&self, index: usize, region: Region) {
        self.send_update(ProgressUpdate::DivisionStarted { index, region });
    }

    /// Report that a division has been written.
    pub fn division_completed(&self, index: usize, region: Region, duration_ms: u64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.division_times.lock().push(duration_ms);

        self.send_update(ProgressUpdate::DivisionCompleted {
            index,
            region,
            duration_ms,
        });
        self.send_progress_update(Some(format!(
            "division {}/{} written",
            index + 1,
            self.total_divisions
        )));
    }

    /// Check if the run should stop.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Report that the run stopped on cancellation.
    pub fn report_cancelled(&self) {
        self.send_update(ProgressUpdate::Cancelled {
            completed: self.completed_divisions(),
            total: self.total_divisions,
        });
    }

    /// Report an error.
    pub fn report_error(&self, division: Option<usize>, message: String) {
        self.send_update(ProgressUpdate::Error { division, message });
    }

    /// Complete tracking.
    pub fn complete(&self) {
        self.send_update(ProgressUpdate::Completed {
            total_duration_ms: self.elapsed_ms(),
            divisions: self.completed_divisions(),
        });
    }

    /// Number of divisions written so far.
    pub fn completed_divisions(&self) -> usize {
        self.completed.load(Ordering::Relaxed) as usize
    }

    /// Fraction of divisions written, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total_divisions == 0 {
            return 1.0;
        }
        (self.completed_divisions() as f64 / self.total_divisions as f64).min(1.0)
    }

    /// Estimate remaining time in milliseconds.
    pub fn estimated_remaining_ms(&self) -> Option<u64> {
        let times = self.division_times.lock();
        if times.is_empty() {
            return None;
        }

        let avg_time: u64 = times.iter().sum::<u64>() / times.len() as u64;
        let remaining = self.total_divisions.saturating_sub(self.completed_divisions());

        Some(avg_time * remaining as u64)
    }

    fn elapsed_ms(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    fn send_update(&self, update: ProgressUpdate) {
        if let Some(ref callback) = self.callback {
            callback(update);
        }
    }

    fn send_progress_update(&self, status: Option<String>) {
        self.send_update(ProgressUpdate::Progress {
            fraction: self.fraction(),
            status,
            elapsed_ms: self.elapsed_ms(),
            estimated_remaining_ms: self.estimated_remaining_ms(),
        });
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_fraction_calculation() {
        let tracker = ProgressTracker::new(4);
        assert_eq!(tracker.fraction(), 0.0);

        tracker.completed.store(1, Ordering::Relaxed);
        assert_eq!(tracker.fraction(), 0.25);

        tracker.completed.store(4, Ordering::Relaxed);
        assert_eq!(tracker.fraction(), 1.0);

        assert_eq!(ProgressTracker::new(0).fraction(), 1.0);
    }

    #[test]
    fn test_shared_token_cancels_tracker() {
        let token = CancellationToken::new();
        let tracker = ProgressTracker::new(10).with_token(token.clone());
        assert!(!tracker.is_cancelled());

        token.cancel();
        assert!(tracker.is_cancelled());
    }

    #[test]
    fn test_progress_fractions_are_monotonic() {
        let fractions = Arc::new(Mutex::new(Vec::new()));
        let sink = fractions.clone();
        let events = Arc::new(AtomicUsize::new(0));
        let counter = events.clone();

        let mut tracker = ProgressTracker::new(3).with_callback(Box::new(move |update: ProgressUpdate| {
            counter.fetch_add(1, Ordering::Relaxed);
            if let ProgressUpdate::Progress { fraction, .. } = update {
                sink.lock().push(fraction);
            }
        }));

        tracker.start();
        for i in 0..3 {
            tracker.division_started(i, Region::new(0, i as i64, 4, 1));
            tracker.division_completed(i, Region::new(0, i as i64, 4, 1), 1);
        }
        tracker.complete();

        let fractions = fractions.lock();
        assert_eq!(fractions.first(), Some(&0.0));
        assert_eq!(fractions.last(), Some(&1.0));
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        // Started, Progress, 3 × (DivisionStarted, DivisionCompleted, Progress), Completed
        assert_eq!(events.load(Ordering::Relaxed), 12);
    }
}
