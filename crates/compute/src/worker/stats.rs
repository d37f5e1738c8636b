use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Pool counters, snapshotted by [`CalculationWorker::get_stats`].
///
/// Each attempt counts once in `total_tasks`, so a task that is retried
/// twice contributes three.
///
/// [`CalculationWorker::get_stats`]: super::CalculationWorker::get_stats
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerStats {
    /// Attempts admitted to the ingress queue, retries included.
    pub total_tasks: u64,
    pub completed_tasks: u64,
    /// Failed attempts, including those that were later retried.
    pub failed_tasks: u64,
    pub retried_tasks: u64,
    /// Tasks given up on: retries exhausted, resubmission refused, or a
    /// pending retry abandoned when the pool stopped.
    pub dropped_tasks: u64,
    /// Workers currently executing a task.
    pub active_workers: usize,
    /// Tasks waiting in the ingress queue.
    pub queue_length: usize,
    /// Mean duration of completed attempts.
    pub avg_duration: Duration,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl WorkerStats {
    pub(super) fn record_submitted(&mut self) {
        self.total_tasks += 1;
        self.last_activity = Some(Utc::now());
    }

    pub(super) fn record_success(&mut self, duration: Duration) {
        self.completed_tasks += 1;
        self.last_activity = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_duration = if self.completed_tasks == 1 {
            duration
        } else {
            let prev_nanos = self.avg_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / self.completed_tasks as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    pub(super) fn record_failure(&mut self) {
        self.failed_tasks += 1;
        self.last_activity = Some(Utc::now());
    }
}

/// Stats shared between the pool handle and its tasks.
#[derive(Debug, Clone, Default)]
pub(super) struct SharedStats(Arc<Mutex<WorkerStats>>);

impl SharedStats {
    /// Apply `f` under the lock. Counter updates cannot leave the struct
    /// half-written, so a poisoned lock is recovered.
    pub(super) fn update<R>(&self, f: impl FnOnce(&mut WorkerStats) -> R) -> R {
        let mut stats = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats)
    }

    pub(super) fn snapshot(&self) -> WorkerStats {
        self.update(|stats| stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_mean() {
        let mut stats = WorkerStats::default();
        stats.record_success(Duration::from_millis(100));
        assert_eq!(stats.avg_duration, Duration::from_millis(100));

        stats.record_success(Duration::from_millis(200));
        stats.record_success(Duration::from_millis(300));
        assert_eq!(stats.completed_tasks, 3);
        let avg_ms = stats.avg_duration.as_secs_f64() * 1000.0;
        assert!((avg_ms - 200.0).abs() < 0.01, "avg was {avg_ms}ms");
    }

    #[test]
    fn failures_do_not_move_the_mean() {
        let mut stats = WorkerStats::default();
        stats.record_success(Duration::from_millis(50));
        stats.record_failure();
        stats.record_failure();
        assert_eq!(stats.failed_tasks, 2);
        assert_eq!(stats.avg_duration, Duration::from_millis(50));
        assert!(stats.last_activity.is_some());
    }

    #[test]
    fn shared_snapshot_is_a_copy() {
        let shared = SharedStats::default();
        shared.update(WorkerStats::record_submitted);
        let snap = shared.snapshot();
        shared.update(WorkerStats::record_submitted);

        assert_eq!(snap.total_tasks, 1);
        assert_eq!(shared.snapshot().total_tasks, 2);
    }
}
