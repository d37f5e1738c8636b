//! Calculation worker pool -- bounded ingress, dispatch, execution and retry.
//!
//! Split into focused submodules:
//! - `core`: CalculationWorker struct, lifecycle and submission
//! - `dispatch`: ingress-to-worker handoff and the stats refresher
//! - `execution`: per-worker loop, task execution and retry
//! - `stats`: pool counters

mod core;
mod dispatch;
mod execution;
mod stats;

pub use self::core::CalculationWorker;
pub use self::stats::WorkerStats;
