use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TablaError;
use crate::field::FieldId;
use crate::record::{RecordId, TableId};

/// Calculation priority. Higher numeric value = served first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background recalculation (bulk imports, schema backfills).
    Low = 1,
    /// Ordinary cell edits.
    #[default]
    Normal = 5,
    /// Edits the requesting user is waiting on.
    High = 10,
    /// Must run before anything else queued.
    Urgent = 20,
}

impl Priority {
    /// All bands in strict precedence order (Urgent first).
    pub const fn bands() -> [Priority; 4] {
        [Priority::Urgent, Priority::High, Priority::Normal, Priority::Low]
    }

    pub fn value(self) -> i32 {
        self as i32
    }

    /// Map a raw priority value onto its band. Values outside the four
    /// bands are rejected.
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            1 => Some(Priority::Low),
            5 => Some(Priority::Normal),
            10 => Some(Priority::High),
            20 => Some(Priority::Urgent),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// One unit of recomputation work: refresh `field_ids` on a single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub table_id: TableId,
    pub record_id: RecordId,
    /// Derived fields to recompute. Never empty, no duplicates.
    pub field_ids: Vec<FieldId>,
    pub priority: Priority,
    /// User or system component that triggered the recalculation.
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
    /// Number of times this task has been re-queued after a failure.
    pub retry_count: u32,
}

impl Task {
    /// Build a fresh task. Duplicate field ids are collapsed (first occurrence
    /// wins); an empty field set is rejected.
    pub fn new(
        table_id: impl Into<TableId>,
        record_id: impl Into<RecordId>,
        field_ids: impl IntoIterator<Item = impl Into<FieldId>>,
        priority: Priority,
        requested_by: impl Into<String>,
    ) -> Result<Self, TablaError> {
        let mut unique: Vec<FieldId> = Vec::new();
        for id in field_ids {
            let id = id.into();
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        if unique.is_empty() {
            return Err(TablaError::EmptyFieldSet);
        }

        Ok(Self {
            id: Uuid::new_v4(),
            table_id: table_id.into(),
            record_id: record_id.into(),
            field_ids: unique,
            priority,
            requested_by: requested_by.into(),
            created_at: Utc::now(),
            retry_count: 0,
        })
    }

    /// Override the creation time (used when replaying or ordering tasks explicitly).
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}
