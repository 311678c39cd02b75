//! Counters for transcode activity.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::ffmpeg::ProcessOutcome;

/// Live counters shared by the stream manager and its supervisors.
#[derive(Debug, Default)]
pub struct StreamStats {
    started: AtomicU64,
    active: AtomicU64,
    start_failures: AtomicU64,
    completed: AtomicU64,
    runtime_failures: AtomicU64,
    terminations: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StreamStatsSnapshot {
    /// Encoders started successfully
    pub started: u64,
    /// Encoders currently running
    pub active: u64,
    /// Requests that failed before streaming began
    pub start_failures: u64,
    /// Encoders that ran to the end of the input
    pub completed: u64,
    /// Encoders that crashed while streaming
    pub runtime_failures: u64,
    /// Encoders stopped by disconnects or revocation
    pub terminations: u64,
}

impl StreamStats {
    pub(crate) fn record_start(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_start_failure(&self) {
        self.start_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exit(&self, outcome: &ProcessOutcome) {
        let counter = match outcome {
            ProcessOutcome::Completed => &self.completed,
            ProcessOutcome::Terminated => &self.terminations,
            ProcessOutcome::Failed(_) => &self.runtime_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        // Outcome first: once `active` reads zero every exit is counted.
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    /// Returns the current counter values.
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            start_failures: self.start_failures.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            runtime_failures: self.runtime_failures.load(Ordering::Relaxed),
            terminations: self.terminations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::FailureReport;

    #[test]
    fn test_exit_outcomes_are_counted_apart() {
        let stats = StreamStats::default();
        for _ in 0..3 {
            stats.record_start();
        }
        stats.record_start_failure();
        stats.record_exit(&ProcessOutcome::Terminated);
        stats.record_exit(&ProcessOutcome::Failed(FailureReport {
            command: "ffmpeg".to_string(),
            exit_code: Some(1),
            stderr: "error".to_string(),
        }));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.started, 3);
        assert_eq!(snapshot.active, 1);
        assert_eq!(snapshot.start_failures, 1);
        assert_eq!(snapshot.terminations, 1);
        assert_eq!(snapshot.runtime_failures, 1);
        assert_eq!(snapshot.completed, 0);
    }
}
