use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::field::FieldId;

/// Table identifier (e.g. "tbl_orders").
pub type TableId = String;

/// Record identifier, unique within a table.
pub type RecordId = String;

/// A record is a flat map of field id to value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub table_id: TableId,
    #[serde(default)]
    pub fields: HashMap<FieldId, FieldValue>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(table_id: impl Into<TableId>, id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            table_id: table_id.into(),
            fields: HashMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Builder-style setter used when seeding records.
    pub fn with_value(mut self, field_id: impl Into<FieldId>, value: FieldValue) -> Self {
        self.fields.insert(field_id.into(), value);
        self
    }

    pub fn get(&self, field_id: &str) -> Option<&FieldValue> {
        self.fields.get(field_id)
    }

    /// Write a value and bump `updated_at`.
    pub fn set(&mut self, field_id: impl Into<FieldId>, value: FieldValue) {
        self.fields.insert(field_id.into(), value);
        self.updated_at = Utc::now();
    }
}

/// Typed cell values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Null,
}

impl FieldValue {
    /// Extract as string, returning None for non-text values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}
