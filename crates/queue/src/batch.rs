//! Batch draining on top of [`PriorityQueue`].
//!
//! Collects up to `batch_size` tasks per call, highest priority first.
//! [`BatchPriorityQueue::pop_batch`] never waits; the timed variant polls
//! the queue until the batch fills or the batch window closes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use tabla_core::{QueueConfig, Task};

use crate::priority::PriorityQueue;

/// Default sleep between polls of an empty queue.
const DEFAULT_POLL_BACKOFF: Duration = Duration::from_millis(10);

/// Drains a shared [`PriorityQueue`] in batches.
#[derive(Debug, Clone)]
pub struct BatchPriorityQueue {
    queue: Arc<PriorityQueue>,
    batch_size: usize,
    batch_timeout: Duration,
    poll_backoff: Duration,
}

impl BatchPriorityQueue {
    /// Create a batcher over `queue`.
    ///
    /// - `batch_size`: most tasks returned per call (at least 1).
    /// - `batch_timeout`: how long `pop_batch_with_timeout` collects before
    ///   returning a partial batch.
    pub fn new(queue: Arc<PriorityQueue>, batch_size: usize, batch_timeout: Duration) -> Self {
        Self {
            queue,
            batch_size: batch_size.max(1),
            batch_timeout,
            poll_backoff: DEFAULT_POLL_BACKOFF,
        }
    }

    pub fn from_config(queue: Arc<PriorityQueue>, config: &QueueConfig) -> Self {
        Self::new(queue, config.batch_size, config.batch_timeout())
            .with_poll_backoff(config.poll_backoff())
    }

    pub fn with_poll_backoff(mut self, backoff: Duration) -> Self {
        self.poll_backoff = backoff;
        self
    }

    pub fn push(&self, task: Task) {
        self.queue.push(task);
    }

    /// The underlying queue.
    pub fn queue(&self) -> &Arc<PriorityQueue> {
        &self.queue
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take up to `batch_size` tasks right now. Returns fewer (possibly none)
    /// when the queue runs dry.
    pub fn pop_batch(&self) -> Vec<Task> {
        self.queue.pop_many(self.batch_size)
    }

    /// Collect a batch, waiting up to `batch_timeout` for it to fill.
    ///
    /// Returns as soon as `batch_size` tasks are collected, or when the
    /// window closes with at least one task collected.
    ///
    /// Known defect: if the window closes with nothing collected, it is
    /// re-armed and polling continues every `poll_backoff`. On a queue that
    /// stays empty this never returns; callers that need a bound must wrap
    /// the call in `tokio::time::timeout`.
    pub async fn pop_batch_with_timeout(&self) -> Vec<Task> {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut deadline = Instant::now() + self.batch_timeout;

        loop {
            if batch.len() >= self.batch_size {
                return batch;
            }

            if Instant::now() >= deadline {
                if !batch.is_empty() {
                    trace!(size = batch.len(), "batch window closed with partial batch");
                    return batch;
                }
                deadline = Instant::now() + self.batch_timeout;
            }

            match self.queue.pop() {
                Some(task) => batch.push(task),
                None => tokio::time::sleep(self.poll_backoff).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabla_core::Priority;

    fn make_tasks(queue: &PriorityQueue, count: usize, priority: Priority) {
        for i in 0..count {
            queue.push(Task::new("tbl", format!("r{i}"), ["fA"], priority, "test").unwrap());
        }
    }

    #[test]
    fn pop_batch_respects_size() {
        let queue = Arc::new(PriorityQueue::new());
        make_tasks(&queue, 5, Priority::Normal);
        let batcher = BatchPriorityQueue::new(queue.clone(), 3, Duration::from_secs(1));

        assert_eq!(batcher.pop_batch().len(), 3);
        assert_eq!(batcher.len(), 2);
    }

    #[test]
    fn pop_batch_stops_early_when_empty() {
        let queue = Arc::new(PriorityQueue::new());
        make_tasks(&queue, 2, Priority::Normal);
        let batcher = BatchPriorityQueue::new(queue, 10, Duration::from_secs(1));

        assert_eq!(batcher.pop_batch().len(), 2);
        assert!(batcher.pop_batch().is_empty());
        assert!(batcher.is_empty());
    }

    #[test]
    fn pop_batch_orders_by_priority() {
        let queue = Arc::new(PriorityQueue::new());
        make_tasks(&queue, 2, Priority::Low);
        make_tasks(&queue, 1, Priority::Urgent);
        let batcher = BatchPriorityQueue::new(queue, 2, Duration::from_secs(1));

        let batch = batcher.pop_batch();
        assert_eq!(batch[0].priority, Priority::Urgent);
        assert_eq!(batch[1].priority, Priority::Low);
    }

    #[test]
    fn zero_batch_size_is_raised_to_one() {
        let batcher = BatchPriorityQueue::new(Arc::new(PriorityQueue::new()), 0, Duration::ZERO);
        assert_eq!(batcher.batch_size(), 1);
    }

    #[test]
    fn from_config_uses_queue_settings() {
        let config = QueueConfig {
            batch_size: 4,
            batch_timeout_ms: 50,
            poll_backoff_ms: 2,
        };
        let batcher = BatchPriorityQueue::from_config(Arc::new(PriorityQueue::new()), &config);
        assert_eq!(batcher.batch_size(), 4);
        assert_eq!(batcher.batch_timeout, Duration::from_millis(50));
        assert_eq!(batcher.poll_backoff, Duration::from_millis(2));
    }

    #[tokio::test]
    async fn timed_batch_returns_full_batch_immediately() {
        let queue = Arc::new(PriorityQueue::new());
        make_tasks(&queue, 4, Priority::Normal);
        let batcher = BatchPriorityQueue::new(queue, 4, Duration::from_secs(30));

        let batch = tokio::time::timeout(Duration::from_secs(1), batcher.pop_batch_with_timeout())
            .await
            .expect("full batch should not wait for the window");
        assert_eq!(batch.len(), 4);
    }

    #[tokio::test]
    async fn timed_batch_returns_partial_after_window() {
        let queue = Arc::new(PriorityQueue::new());
        make_tasks(&queue, 2, Priority::Normal);
        let batcher = BatchPriorityQueue::new(queue, 10, Duration::from_millis(30))
            .with_poll_backoff(Duration::from_millis(1));

        let start = std::time::Instant::now();
        let batch = tokio::time::timeout(Duration::from_secs(2), batcher.pop_batch_with_timeout())
            .await
            .expect("partial batch should be returned once the window closes");
        assert_eq!(batch.len(), 2);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn timed_batch_picks_up_late_arrivals() {
        let queue = Arc::new(PriorityQueue::new());
        let batcher = BatchPriorityQueue::new(queue.clone(), 2, Duration::from_millis(20))
            .with_poll_backoff(Duration::from_millis(1));

        let producer = tokio::spawn(async move {
            // Several windows pass with nothing queued before the tasks land
            tokio::time::sleep(Duration::from_millis(80)).await;
            make_tasks(&queue, 2, Priority::High);
        });

        let batch = tokio::time::timeout(Duration::from_secs(2), batcher.pop_batch_with_timeout())
            .await
            .expect("batch should complete after producer pushes");
        producer.await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn timed_batch_on_empty_queue_keeps_waiting() {
        let batcher = BatchPriorityQueue::new(Arc::new(PriorityQueue::new()), 3, Duration::from_millis(10))
            .with_poll_backoff(Duration::from_millis(1));

        // The window is re-armed instead of returning an empty batch
        let result =
            tokio::time::timeout(Duration::from_millis(100), batcher.pop_batch_with_timeout()).await;
        assert!(result.is_err());
    }
}
