//! In-memory row store.
//!
//! Durability is handled by the owning collection, which logs row and vector
//! changes together, so the store itself is a plain map.

use std::sync::Arc;

use ahash::AHashMap;

use crate::collection::record::{Fields, Record};

#[derive(Debug, Clone)]
struct StoredRow {
    fields: Fields,
    /// Shared with the vector index.
    vector: Arc<[f32]>,
}

/// Primary key to scalar fields.
#[derive(Debug, Default)]
pub struct RowStore {
    rows: AHashMap<String, StoredRow>,
}

impl RowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the row for `id`.
    pub fn put(&mut self, id: impl Into<String>, fields: Fields, vector: Arc<[f32]>) {
        self.rows.insert(id.into(), StoredRow { fields, vector });
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.rows.get(id).map(|row| Record {
            primary_key: id.to_string(),
            fields: row.fields.clone(),
            vector: row.vector.to_vec(),
        })
    }

    /// Remove the row for `id`. Returns whether it existed.
    pub fn delete(&mut self, id: &str) -> bool {
        self.rows.remove(id).is_some()
    }

    /// Look up several ids at once; the result lines up with `ids`.
    pub fn get_many<S: AsRef<str>>(&self, ids: &[S]) -> Vec<Option<Record>> {
        ids.iter().map(|id| self.get(id.as_ref())).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldValue;

    fn fields(title: &str) -> Fields {
        Fields::from([("title".to_string(), FieldValue::from(title))])
    }

    #[test]
    fn test_put_get_overwrite() {
        let mut store = RowStore::new();
        store.put("a", fields("first"), Arc::from(vec![1.0f32]));
        store.put("a", fields("second"), Arc::from(vec![2.0f32]));

        assert_eq!(store.len(), 1);
        let record = store.get("a").unwrap();
        assert_eq!(record.get("title"), Some(&FieldValue::from("second")));
        assert_eq!(record.vector, vec![2.0]);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut store = RowStore::new();
        store.put("a", fields("x"), Arc::from(vec![0.0f32]));
        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_get_many_preserves_order() {
        let mut store = RowStore::new();
        store.put("a", fields("x"), Arc::from(vec![0.0f32]));
        store.put("b", fields("y"), Arc::from(vec![0.0f32]));

        let records = store.get_many(&["b", "missing", "a"]);
        let keys: Vec<Option<&str>> = records
            .iter()
            .map(|r| r.as_ref().map(|r| r.primary_key.as_str()))
            .collect();
        assert_eq!(keys, vec![Some("b"), None, Some("a")]);
    }
}
