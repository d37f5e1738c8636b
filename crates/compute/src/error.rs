use std::time::Duration;

use tabla_core::TablaError;

/// Errors raised by dependency resolution and the calculation worker pool.
#[derive(Debug, thiserror::Error)]
pub enum CalcError {
    // ── Admission ──
    #[error("calculation queue is full")]
    QueueFull,
    #[error("calculation worker is stopped")]
    Stopped,
    #[error("calculation worker is already running")]
    AlreadyRunning,

    // ── Resolution ──
    #[error("failed to resolve dependencies for table {table_id}: {source}")]
    Resolve {
        table_id: String,
        #[source]
        source: TablaError,
    },

    // ── Execution ──
    #[error("store error: {0}")]
    Store(#[from] TablaError),
    #[error("record {record_id} not found in table {table_id}")]
    RecordNotFound { table_id: String, record_id: String },
    #[error("task timed out after {0:?}")]
    Timeout(Duration),
    #[error("task cancelled by shutdown")]
    Cancelled,
    #[error("calculation failed: {0}")]
    Calculation(String),
    #[error("event publish failed: {0}")]
    Publish(String),
}

impl CalcError {
    /// Admission errors are reported synchronously to the submitter and
    /// never reach a worker.
    pub fn is_admission(&self) -> bool {
        matches!(self, CalcError::QueueFull | CalcError::Stopped)
    }
}
