//! Calculation lifecycle events.
//!
//! Every task attempt emits `Requested` when a worker picks it up, then
//! exactly one of `Completed` or `Failed`. Retries repeat the sequence with
//! an incremented `retry_count`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use tabla_core::{FieldId, FieldValue, RecordId, TableId, Task};

use crate::error::CalcError;

/// Topic names events are published under.
pub mod topics {
    /// A worker started an attempt.
    pub const CALC_REQUESTED: &str = "tabla.calc.requested";

    /// An attempt produced values.
    pub const CALC_COMPLETED: &str = "tabla.calc.completed";

    /// An attempt failed. A retry may follow.
    pub const CALC_FAILED: &str = "tabla.calc.failed";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRequested {
    pub task_id: Uuid,
    pub table_id: TableId,
    pub record_id: RecordId,
    pub field_ids: Vec<FieldId>,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationCompleted {
    pub task_id: Uuid,
    pub table_id: TableId,
    pub record_id: RecordId,
    pub field_ids: Vec<FieldId>,
    /// Values written back to the record.
    pub values: HashMap<FieldId, FieldValue>,
    /// Wall-clock duration of the attempt in milliseconds.
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationFailed {
    pub task_id: Uuid,
    pub table_id: TableId,
    pub record_id: RecordId,
    pub field_ids: Vec<FieldId>,
    pub error: String,
    /// Retries already spent when this attempt failed.
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalculationEvent {
    Requested(CalculationRequested),
    Completed(CalculationCompleted),
    Failed(CalculationFailed),
}

impl CalculationEvent {
    pub fn requested(task: &Task) -> Self {
        CalculationEvent::Requested(CalculationRequested {
            task_id: task.id,
            table_id: task.table_id.clone(),
            record_id: task.record_id.clone(),
            field_ids: task.field_ids.clone(),
            retry_count: task.retry_count,
            timestamp: Utc::now(),
        })
    }

    pub fn completed(task: &Task, values: HashMap<FieldId, FieldValue>, duration_ms: u64) -> Self {
        CalculationEvent::Completed(CalculationCompleted {
            task_id: task.id,
            table_id: task.table_id.clone(),
            record_id: task.record_id.clone(),
            field_ids: task.field_ids.clone(),
            values,
            duration_ms,
            timestamp: Utc::now(),
        })
    }

    pub fn failed(task: &Task, error: &CalcError) -> Self {
        CalculationEvent::Failed(CalculationFailed {
            task_id: task.id,
            table_id: task.table_id.clone(),
            record_id: task.record_id.clone(),
            field_ids: task.field_ids.clone(),
            error: error.to_string(),
            retry_count: task.retry_count,
            timestamp: Utc::now(),
        })
    }

    pub fn topic(&self) -> &'static str {
        match self {
            CalculationEvent::Requested(_) => topics::CALC_REQUESTED,
            CalculationEvent::Completed(_) => topics::CALC_COMPLETED,
            CalculationEvent::Failed(_) => topics::CALC_FAILED,
        }
    }

    pub fn task_id(&self) -> Uuid {
        match self {
            CalculationEvent::Requested(e) => e.task_id,
            CalculationEvent::Completed(e) => e.task_id,
            CalculationEvent::Failed(e) => e.task_id,
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            CalculationEvent::Requested(e) => &e.record_id,
            CalculationEvent::Completed(e) => &e.record_id,
            CalculationEvent::Failed(e) => &e.record_id,
        }
    }
}

/// Destination for calculation events.
///
/// Publishing is best effort: the worker logs a failed publish and carries on.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: CalculationEvent) -> Result<(), CalcError>;
}

#[async_trait]
impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    async fn publish(&self, event: CalculationEvent) -> Result<(), CalcError> {
        (**self).publish(event).await
    }
}

/// Writes each event to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, event: CalculationEvent) -> Result<(), CalcError> {
        match &event {
            CalculationEvent::Requested(e) => info!(
                topic = event.topic(),
                task_id = %e.task_id,
                record_id = %e.record_id,
                retry_count = e.retry_count,
                "calculation requested"
            ),
            CalculationEvent::Completed(e) => info!(
                topic = event.topic(),
                task_id = %e.task_id,
                record_id = %e.record_id,
                duration_ms = e.duration_ms,
                "calculation completed"
            ),
            CalculationEvent::Failed(e) => warn!(
                topic = event.topic(),
                task_id = %e.task_id,
                record_id = %e.record_id,
                retry_count = e.retry_count,
                error = %e.error,
                "calculation failed"
            ),
        }
        Ok(())
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<CalculationEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver that drains it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CalculationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn publish(&self, event: CalculationEvent) -> Result<(), CalcError> {
        self.tx
            .send(event)
            .map_err(|_| CalcError::Publish("event receiver dropped".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new("tbl", "rec1", ["fA", "fB"], Default::default(), "test").unwrap()
    }

    #[test]
    fn topics_per_kind() {
        let task = task();
        assert_eq!(CalculationEvent::requested(&task).topic(), topics::CALC_REQUESTED);
        assert_eq!(
            CalculationEvent::completed(&task, HashMap::new(), 3).topic(),
            topics::CALC_COMPLETED
        );
        assert_eq!(
            CalculationEvent::failed(&task, &CalcError::Cancelled).topic(),
            topics::CALC_FAILED
        );
    }

    #[test]
    fn events_carry_task_identity() {
        let mut task = task();
        task.retry_count = 2;
        let event = CalculationEvent::failed(&task, &CalcError::Calculation("boom".into()));

        assert_eq!(event.task_id(), task.id);
        assert_eq!(event.record_id(), "rec1");
        let CalculationEvent::Failed(failed) = event else {
            panic!("expected failed event");
        };
        assert_eq!(failed.retry_count, 2);
        assert_eq!(failed.error, "calculation failed: boom");
        assert_eq!(failed.field_ids, vec!["fA".to_string(), "fB".to_string()]);
    }

    #[test]
    fn serializes_with_kind_tag() {
        let task = task();
        let values = HashMap::from([("fA".to_string(), FieldValue::Integer(42))]);
        let event = CalculationEvent::completed(&task, values, 12);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "completed");
        assert_eq!(json["values"]["fA"], 42);
        assert_eq!(json["duration_ms"], 12);

        let back: CalculationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelEventSink::new();
        let task = task();
        sink.publish(CalculationEvent::requested(&task)).await.unwrap();
        sink.publish(CalculationEvent::completed(&task, HashMap::new(), 1))
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(CalculationEvent::Requested(_))));
        assert!(matches!(rx.recv().await, Some(CalculationEvent::Completed(_))));
    }

    #[tokio::test]
    async fn channel_sink_errors_after_receiver_drop() {
        let (sink, rx) = ChannelEventSink::new();
        drop(rx);
        let err = sink.publish(CalculationEvent::requested(&task())).await.unwrap_err();
        assert!(matches!(err, CalcError::Publish(_)));
    }

    #[tokio::test]
    async fn log_sink_accepts_everything() {
        let sink = LogEventSink;
        assert!(sink.publish(CalculationEvent::requested(&task())).await.is_ok());
    }
}
