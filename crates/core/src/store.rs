//! Persistence seams consumed by the calculation engine.
//!
//! The engine only reads field definitions and reads/writes records; the
//! concrete backends live with the rest of the platform.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TablaError;
use crate::field::Field;
use crate::record::{Record, RecordId};

/// Read access to table schemas.
#[async_trait]
pub trait FieldStore: Send + Sync {
    /// All fields defined on a table.
    async fn fields_for_table(&self, table_id: &str) -> Result<Vec<Field>, TablaError>;
}

/// Record persistence.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the records of a table with the given ids. Unknown ids are
    /// omitted from the result rather than reported as errors.
    async fn records_by_ids(
        &self,
        table_id: &str,
        ids: &[RecordId],
    ) -> Result<Vec<Record>, TablaError>;

    /// Insert or replace a record.
    async fn save_record(&self, record: &Record) -> Result<(), TablaError>;
}

#[async_trait]
impl<T: FieldStore + ?Sized> FieldStore for Arc<T> {
    async fn fields_for_table(&self, table_id: &str) -> Result<Vec<Field>, TablaError> {
        (**self).fields_for_table(table_id).await
    }
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn records_by_ids(
        &self,
        table_id: &str,
        ids: &[RecordId],
    ) -> Result<Vec<Record>, TablaError> {
        (**self).records_by_ids(table_id, ids).await
    }

    async fn save_record(&self, record: &Record) -> Result<(), TablaError> {
        (**self).save_record(record).await
    }
}
