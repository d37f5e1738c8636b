//! In-memory store implementations for tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::TablaError;
use crate::field::Field;
use crate::record::{Record, RecordId, TableId};
use crate::store::{FieldStore, RecordStore};

/// Field definitions keyed by table, in insertion order.
#[derive(Debug, Default)]
pub struct MemoryFieldStore {
    tables: RwLock<HashMap<TableId, Vec<Field>>>,
}

impl MemoryFieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from a flat list of fields.
    pub fn from_fields(fields: impl IntoIterator<Item = Field>) -> Self {
        let mut tables: HashMap<TableId, Vec<Field>> = HashMap::new();
        for field in fields {
            tables.entry(field.table_id.clone()).or_default().push(field);
        }
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Add a field, replacing any existing field with the same id.
    pub async fn upsert(&self, field: Field) {
        let mut tables = self.tables.write().await;
        let fields = tables.entry(field.table_id.clone()).or_default();
        match fields.iter_mut().find(|f| f.id == field.id) {
            Some(existing) => *existing = field,
            None => fields.push(field),
        }
    }

    /// Table ids with at least one field, sorted.
    pub async fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.tables.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl FieldStore for MemoryFieldStore {
    async fn fields_for_table(&self, table_id: &str) -> Result<Vec<Field>, TablaError> {
        self.tables
            .read()
            .await
            .get(table_id)
            .cloned()
            .ok_or_else(|| TablaError::TableNotFound(table_id.to_string()))
    }
}

/// Records keyed by (table, record id).
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<(TableId, RecordId), Record>>,
    saves: AtomicU64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let records = records
            .into_iter()
            .map(|r| ((r.table_id.clone(), r.id.clone()), r))
            .collect();
        Self {
            records: RwLock::new(records),
            saves: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, table_id: &str, record_id: &str) -> Option<Record> {
        self.records
            .read()
            .await
            .get(&(table_id.to_string(), record_id.to_string()))
            .cloned()
    }

    /// Ids of every record in a table, sorted.
    pub async fn record_ids(&self, table_id: &str) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self
            .records
            .read()
            .await
            .keys()
            .filter(|(t, _)| t == table_id)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of successful `save_record` calls.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn records_by_ids(
        &self,
        table_id: &str,
        ids: &[RecordId],
    ) -> Result<Vec<Record>, TablaError> {
        let records = self.records.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| records.get(&(table_id.to_string(), id.clone())).cloned())
            .collect())
    }

    async fn save_record(&self, record: &Record) -> Result<(), TablaError> {
        self.records
            .write()
            .await
            .insert((record.table_id.clone(), record.id.clone()), record.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldKind;
    use crate::record::FieldValue;

    #[tokio::test]
    async fn field_store_groups_by_table() {
        let store = MemoryFieldStore::from_fields([
            Field::new("t1", "a", "A", FieldKind::Number),
            Field::new("t1", "b", "B", FieldKind::Text),
            Field::new("t2", "c", "C", FieldKind::Text),
        ]);
        let fields = store.fields_for_table("t1").await.unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].id, "a");
        assert_eq!(store.table_ids().await, vec!["t1".to_string(), "t2".to_string()]);
    }

    #[tokio::test]
    async fn unknown_table_is_an_error() {
        let store = MemoryFieldStore::new();
        let err = store.fields_for_table("missing").await.unwrap_err();
        assert!(matches!(err, TablaError::TableNotFound(t) if t == "missing"));
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = MemoryFieldStore::new();
        store.upsert(Field::new("t", "a", "A", FieldKind::Number)).await;
        store.upsert(Field::new("t", "a", "A2", FieldKind::Text)).await;
        let fields = store.fields_for_table("t").await.unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "A2");
    }

    #[tokio::test]
    async fn record_store_fetch_and_save() {
        let store = MemoryRecordStore::from_records([
            Record::new("t", "r1").with_value("a", FieldValue::Integer(1)),
            Record::new("t", "r2"),
        ]);

        let found = store
            .records_by_ids("t", &["r1".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "r1");

        let mut record = found[0].clone();
        record.set("a", FieldValue::Integer(2));
        store.save_record(&record).await.unwrap();

        assert_eq!(store.save_count(), 1);
        let saved = store.get("t", "r1").await.unwrap();
        assert_eq!(saved.get("a"), Some(&FieldValue::Integer(2)));
        assert_eq!(store.record_ids("t").await, vec!["r1".to_string(), "r2".to_string()]);
    }
}
