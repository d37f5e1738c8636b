//! In-memory priority scheduling primitives for calculation tasks.
//!
//! - [`PriorityQueue`]: a locked binary heap ordered by priority, then age.
//! - [`BatchPriorityQueue`]: drains a [`PriorityQueue`] in batches.
//! - [`TaskScheduler`]: one queue per priority band, served strictly
//!   Urgent → High → Normal → Low.

pub mod batch;
pub mod error;
pub mod priority;
pub mod scheduler;

pub use batch::BatchPriorityQueue;
pub use error::QueueError;
pub use priority::{PriorityQueue, QueueItem, QueueStats};
pub use scheduler::{SchedulerStats, TaskScheduler};
