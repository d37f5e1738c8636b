//! Multi-band task scheduler.
//!
//! Keeps one [`PriorityQueue`] per [`Priority`] band and always serves the
//! highest non-empty band. Bands are created on first use. Inside a band all
//! tasks share one priority, so a band is FIFO by creation time.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::debug;

use tabla_core::{Priority, Task};

use crate::error::QueueError;
use crate::priority::{PriorityQueue, QueueStats};

/// Aggregated snapshot across all bands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Per-band counters, for bands that have been created.
    pub bands: HashMap<Priority, QueueStats>,
    /// Tasks queued across all bands.
    pub total_size: usize,
    /// Bands currently holding at least one task.
    pub active_bands: usize,
}

#[derive(Debug, Default)]
pub struct TaskScheduler {
    bands: RwLock<HashMap<Priority, Arc<PriorityQueue>>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or lazily create the queue for a band.
    fn band(&self, priority: Priority) -> Arc<PriorityQueue> {
        if let Some(queue) = self
            .bands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&priority)
        {
            return Arc::clone(queue);
        }

        let mut bands = self.bands.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(bands.entry(priority).or_insert_with(|| {
            debug!(band = %priority, "creating priority band");
            Arc::new(PriorityQueue::new())
        }))
    }

    /// Existing bands in precedence order (Urgent first).
    fn ordered_bands(&self) -> Vec<(Priority, Arc<PriorityQueue>)> {
        let bands = self.bands.read().unwrap_or_else(PoisonError::into_inner);
        Priority::bands()
            .into_iter()
            .filter_map(|p| bands.get(&p).map(|q| (p, Arc::clone(q))))
            .collect()
    }

    /// Route a task to the band matching its priority.
    pub fn push(&self, task: Task) {
        self.band(task.priority).push(task);
    }

    /// Pop from the highest non-empty band.
    pub fn pop(&self) -> Option<Task> {
        self.ordered_bands()
            .into_iter()
            .find_map(|(_, queue)| queue.pop())
    }

    pub fn try_pop(&self) -> Result<Task, QueueError> {
        self.pop().ok_or(QueueError::EmptyQueue)
    }

    /// The task the next `pop` would return.
    pub fn peek(&self) -> Option<Task> {
        self.ordered_bands()
            .into_iter()
            .find_map(|(_, queue)| queue.peek())
    }

    /// Tasks queued across all bands.
    pub fn len(&self) -> usize {
        self.ordered_bands().iter().map(|(_, q)| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_bands().iter().all(|(_, q)| q.is_empty())
    }

    /// Tasks queued in a single band (0 if the band was never used).
    pub fn band_len(&self, priority: Priority) -> usize {
        self.bands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&priority)
            .map_or(0, |q| q.len())
    }

    /// Empty every band. Bands themselves are kept.
    pub fn clear(&self) {
        for (_, queue) in self.ordered_bands() {
            queue.clear();
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        for (priority, queue) in self.ordered_bands() {
            let band = queue.stats();
            stats.total_size += band.size;
            if band.size > 0 {
                stats.active_bands += 1;
            }
            stats.bands.insert(priority, band);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(record: &str, priority: Priority) -> Task {
        Task::new("tbl", record, ["fA"], priority, "test").unwrap()
    }

    #[test]
    fn pops_highest_band_first() {
        let scheduler = TaskScheduler::new();
        scheduler.push(task("low", Priority::Low));
        scheduler.push(task("normal", Priority::Normal));
        scheduler.push(task("urgent", Priority::Urgent));
        scheduler.push(task("high", Priority::High));

        let order: Vec<String> = std::iter::from_fn(|| scheduler.pop())
            .map(|t| t.record_id)
            .collect();
        assert_eq!(order, vec!["urgent", "high", "normal", "low"]);
    }

    #[test]
    fn band_is_fifo() {
        let scheduler = TaskScheduler::new();
        let first = task("first", Priority::High);
        let second = task("second", Priority::High);
        scheduler.push(first.clone());
        scheduler.push(second.clone());

        assert_eq!(scheduler.pop().unwrap().id, first.id);
        assert_eq!(scheduler.pop().unwrap().id, second.id);
    }

    #[test]
    fn later_urgent_preempts_queued_low() {
        let scheduler = TaskScheduler::new();
        scheduler.push(task("low-1", Priority::Low));
        scheduler.push(task("low-2", Priority::Low));
        assert_eq!(scheduler.pop().unwrap().record_id, "low-1");

        scheduler.push(task("urgent", Priority::Urgent));
        assert_eq!(scheduler.pop().unwrap().record_id, "urgent");
        assert_eq!(scheduler.pop().unwrap().record_id, "low-2");
    }

    #[test]
    fn bands_created_lazily() {
        let scheduler = TaskScheduler::new();
        assert!(scheduler.stats().bands.is_empty());
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.try_pop().unwrap_err(), QueueError::EmptyQueue);

        scheduler.push(task("r1", Priority::Normal));
        let stats = scheduler.stats();
        assert_eq!(stats.bands.len(), 1);
        assert!(stats.bands.contains_key(&Priority::Normal));
    }

    #[test]
    fn peek_matches_pop() {
        let scheduler = TaskScheduler::new();
        scheduler.push(task("n", Priority::Normal));
        scheduler.push(task("h", Priority::High));

        let peeked = scheduler.peek().unwrap();
        assert_eq!(scheduler.len(), 2);
        assert_eq!(scheduler.pop().unwrap().id, peeked.id);
    }

    #[test]
    fn stats_aggregate_bands() {
        let scheduler = TaskScheduler::new();
        scheduler.push(task("u", Priority::Urgent));
        scheduler.push(task("l1", Priority::Low));
        scheduler.push(task("l2", Priority::Low));
        scheduler.pop();

        let stats = scheduler.stats();
        assert_eq!(stats.total_size, 2);
        assert_eq!(stats.active_bands, 1);
        assert_eq!(stats.bands[&Priority::Urgent].size, 0);
        assert_eq!(stats.bands[&Priority::Urgent].total_popped, 1);
        assert_eq!(stats.bands[&Priority::Low].size, 2);
        assert_eq!(scheduler.band_len(Priority::Low), 2);
        assert_eq!(scheduler.band_len(Priority::High), 0);
        assert_eq!(scheduler.stats(), stats);
    }

    #[test]
    fn clear_empties_all_bands() {
        let scheduler = TaskScheduler::new();
        scheduler.push(task("u", Priority::Urgent));
        scheduler.push(task("l", Priority::Low));
        scheduler.clear();

        assert!(scheduler.is_empty());
        assert_eq!(scheduler.len(), 0);
        assert_eq!(scheduler.stats().bands.len(), 2);
    }

    #[test]
    fn stats_serialize_band_keys() {
        let scheduler = TaskScheduler::new();
        scheduler.push(task("h", Priority::High));
        let json = serde_json::to_value(scheduler.stats()).unwrap();
        assert_eq!(json["bands"]["high"]["size"], 1);
        assert_eq!(json["total_size"], 1);
    }
}
