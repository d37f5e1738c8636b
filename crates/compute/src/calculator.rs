use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tabla_core::{FieldId, FieldValue, Record, RecordId, Task};

use crate::error::CalcError;

/// Values computed for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculatedRecord {
    pub record_id: RecordId,
    pub values: HashMap<FieldId, FieldValue>,
}

/// Evaluates a task's fields against the fetched records.
///
/// Field ids arrive in `task.field_ids` in calculation order. Returned
/// records are merged into the stored records and saved; results for
/// records that were not passed in are ignored.
#[async_trait]
pub trait Calculator: Send + Sync {
    async fn calculate(
        &self,
        task: &Task,
        records: &[Record],
    ) -> Result<Vec<CalculatedRecord>, CalcError>;
}

#[async_trait]
impl<T: Calculator + ?Sized> Calculator for Arc<T> {
    async fn calculate(
        &self,
        task: &Task,
        records: &[Record],
    ) -> Result<Vec<CalculatedRecord>, CalcError> {
        (**self).calculate(task, records).await
    }
}

/// Echoes the current value of each requested field, `Null` when unset.
///
/// Stands in where formula evaluation is provided elsewhere; it exercises
/// the fetch, save and publish path without changing stored values.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCalculator;

#[async_trait]
impl Calculator for PassthroughCalculator {
    async fn calculate(
        &self,
        task: &Task,
        records: &[Record],
    ) -> Result<Vec<CalculatedRecord>, CalcError> {
        Ok(records
            .iter()
            .map(|record| CalculatedRecord {
                record_id: record.id.clone(),
                values: task
                    .field_ids
                    .iter()
                    .map(|field_id| {
                        let value = record.get(field_id).cloned().unwrap_or(FieldValue::Null);
                        (field_id.clone(), value)
                    })
                    .collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabla_core::Priority;

    #[tokio::test]
    async fn passthrough_echoes_or_nulls() {
        let task = Task::new("tbl", "rec1", ["fA", "fB"], Priority::Normal, "test").unwrap();
        let record = Record::new("tbl", "rec1").with_value("fA", FieldValue::Text("x".into()));

        let out = PassthroughCalculator.calculate(&task, &[record]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].record_id, "rec1");
        assert_eq!(out[0].values["fA"], FieldValue::Text("x".into()));
        assert_eq!(out[0].values["fB"], FieldValue::Null);
    }

    #[tokio::test]
    async fn passthrough_with_no_records() {
        let task = Task::new("tbl", "rec1", ["fA"], Priority::Normal, "test").unwrap();
        assert!(PassthroughCalculator.calculate(&task, &[]).await.unwrap().is_empty());
    }
}
