//! Rows going in and records coming out.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::FieldValue;

/// Field name to value.
pub type Fields = BTreeMap<String, FieldValue>;

/// A row to insert: its primary key and the caller-supplied field values.
///
/// ```
/// use quiver::collection::Row;
///
/// let row = Row::new("a").with("content", "hello").with("date", 20240101i64);
/// assert_eq!(row.fields.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    #[serde(default)]
    pub fields: Fields,
}

impl Row {
    pub fn new(id: impl Into<String>) -> Self {
        Row {
            id: id.into(),
            fields: Fields::new(),
        }
    }

    /// Add or replace a field value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// A stored record: scalar fields as supplied plus the vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub primary_key: String,
    pub fields: Fields,
    pub vector: Vec<f32>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    /// Distance for COSINE and L2, inner product for IP.
    pub distance: f32,
    pub record: Record,
}
