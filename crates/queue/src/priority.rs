//! Binary max-heap of calculation tasks.
//!
//! Ordering is priority first (higher wins), then creation time (older
//! wins). A per-queue push sequence breaks the remaining ties so tasks
//! created within the same clock tick still come out in push order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use tabla_core::{Priority, Task};

use crate::error::QueueError;

/// A heap entry. Owned by exactly one [`PriorityQueue`].
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub task: Task,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    seq: u64,
}

impl QueueItem {
    fn new(task: Task, seq: u64) -> Self {
        Self {
            priority: task.priority,
            created_at: task.created_at,
            task,
            seq,
        }
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueItem {}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            // Earlier timestamps and sequences rank higher in the max-heap
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Read-only snapshot of a queue's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Items currently queued.
    pub size: usize,
    pub total_pushed: u64,
    pub total_popped: u64,
    /// Largest size observed since creation (or the last `clear`).
    pub peak_size: usize,
}

#[derive(Debug, Default)]
struct Inner {
    heap: BinaryHeap<QueueItem>,
    next_seq: u64,
    total_pushed: u64,
    total_popped: u64,
    peak_size: usize,
}

impl Inner {
    fn pop(&mut self) -> Option<Task> {
        let item = self.heap.pop()?;
        self.total_popped += 1;
        Some(item.task)
    }
}

/// Thread-safe priority queue of [`Task`]s.
///
/// One `RwLock` guards the heap and its counters. `push`/`pop` are
/// O(log n); `peek`, `len` and `stats` take only the read lock.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    inner: RwLock<Inner>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                heap: BinaryHeap::with_capacity(capacity),
                ..Inner::default()
            }),
        }
    }

    // Every mutation is a single std call, so a poisoned heap is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, task: Task) {
        let mut inner = self.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(QueueItem::new(task, seq));
        inner.total_pushed += 1;
        inner.peak_size = inner.peak_size.max(inner.heap.len());
    }

    /// Remove and return the highest-ranked task.
    pub fn pop(&self) -> Option<Task> {
        self.write().pop()
    }

    /// Like [`pop`](Self::pop), but reports an empty queue as an error.
    pub fn try_pop(&self) -> Result<Task, QueueError> {
        self.pop().ok_or(QueueError::EmptyQueue)
    }

    /// Pop up to `max` tasks under a single lock acquisition.
    pub fn pop_many(&self, max: usize) -> Vec<Task> {
        let mut inner = self.write();
        let mut out = Vec::with_capacity(max.min(inner.heap.len()));
        while out.len() < max {
            match inner.pop() {
                Some(task) => out.push(task),
                None => break,
            }
        }
        out
    }

    /// The task `pop` would return, without removing it.
    pub fn peek(&self) -> Option<Task> {
        self.read().heap.peek().map(|item| item.task.clone())
    }

    pub fn len(&self) -> usize {
        self.read().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().heap.is_empty()
    }

    /// Drop every queued task and reset the peak size.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.heap.clear();
        inner.peak_size = 0;
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.read();
        QueueStats {
            size: inner.heap.len(),
            total_pushed: inner.total_pushed,
            total_popped: inner.total_popped,
            peak_size: inner.peak_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task(record: &str, priority: Priority) -> Task {
        Task::new("tbl", record, ["fA"], priority, "test").unwrap()
    }

    #[test]
    fn equal_priority_is_fifo() {
        let queue = PriorityQueue::new();
        let t1 = task("r1", Priority::Normal);
        let t2 = task("r2", Priority::Normal);
        queue.push(t1.clone());
        queue.push(t2.clone());

        assert_eq!(queue.pop().unwrap().id, t1.id);
        assert_eq!(queue.pop().unwrap().id, t2.id);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn identical_timestamps_keep_push_order() {
        let queue = PriorityQueue::new();
        let now = Utc::now();
        let ids: Vec<_> = (0..5)
            .map(|i| {
                let t = task(&format!("r{i}"), Priority::High).with_created_at(now);
                let id = t.id;
                queue.push(t);
                id
            })
            .collect();

        let popped: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|t| t.id).collect();
        assert_eq!(popped, ids);
    }

    #[test]
    fn older_task_wins_regardless_of_push_order() {
        let queue = PriorityQueue::new();
        let now = Utc::now();
        let newer = task("new", Priority::Normal).with_created_at(now);
        let older = task("old", Priority::Normal).with_created_at(now - Duration::seconds(5));
        queue.push(newer);
        queue.push(older.clone());

        assert_eq!(queue.pop().unwrap().id, older.id);
    }

    #[test]
    fn priorities_pop_highest_first() {
        let queue = PriorityQueue::new();
        for (i, value) in [5, 10, 1].into_iter().enumerate() {
            let priority = Priority::from_value(value).unwrap();
            queue.push(task(&format!("r{i}"), priority));
        }

        let order: Vec<i32> = std::iter::from_fn(|| queue.pop())
            .map(|t| t.priority.value())
            .collect();
        assert_eq!(order, vec![10, 5, 1]);
    }

    #[test]
    fn peek_does_not_remove() {
        let queue = PriorityQueue::new();
        let t = task("r1", Priority::Urgent);
        queue.push(t.clone());

        assert_eq!(queue.peek().unwrap().id, t.id);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().id, t.id);
        assert!(queue.is_empty());
        assert!(queue.peek().is_none());
    }

    #[test]
    fn try_pop_on_empty() {
        let queue = PriorityQueue::new();
        assert_eq!(queue.try_pop().unwrap_err(), QueueError::EmptyQueue);
    }

    #[test]
    fn pop_many_stops_when_empty() {
        let queue = PriorityQueue::with_capacity(4);
        queue.push(task("r1", Priority::Low));
        queue.push(task("r2", Priority::High));

        let batch = queue.pop_many(5);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].priority, Priority::High);
        assert!(queue.is_empty());
    }

    #[test]
    fn stats_track_counters() {
        let queue = PriorityQueue::new();
        queue.push(task("r1", Priority::Low));
        queue.push(task("r2", Priority::Low));
        queue.push(task("r3", Priority::Low));
        queue.pop();

        let stats = queue.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.total_pushed, 3);
        assert_eq!(stats.total_popped, 1);
        assert_eq!(stats.peak_size, 3);
        // No mutation in between: snapshots are equal
        assert_eq!(queue.stats(), stats);

        queue.clear();
        let stats = queue.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.peak_size, 0);
        assert_eq!(stats.total_pushed, 3);
    }

    #[test]
    fn concurrent_pushes_are_all_counted() {
        let queue = std::sync::Arc::new(PriorityQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        queue.push(task(&format!("r{n}-{i}"), Priority::Normal));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 100);
        assert_eq!(queue.stats().total_pushed, 100);
    }
}
