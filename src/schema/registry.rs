//! Validated collection definitions, keyed by collection name.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::SchemaLimits;
use crate::error::{QuiverError, Result, SchemaError, StateError};
use crate::schema::field::FieldSchema;
use crate::schema::index_params::{IndexParams, IndexParamsBuilder};
use crate::schema::index_params::IndexType;
use crate::schema::schema::{CollectionSchema, validate_name};
use crate::vector::HnswConfig;

/// A schema that passed validation together with its single vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDefinition {
    pub name: String,
    pub schema: CollectionSchema,
    pub index: IndexParams,
}

impl CollectionDefinition {
    pub fn primary_field(&self) -> &FieldSchema {
        // validated: exactly one primary key
        &self.schema.fields[self.position(|f| f.is_primary)]
    }

    pub fn vector_field(&self) -> &FieldSchema {
        &self.schema.fields[self.position(FieldSchema::is_vector)]
    }

    /// Declared dimension of the vector field.
    pub fn dim(&self) -> usize {
        self.vector_field().dim.unwrap_or_default()
    }

    fn position(&self, predicate: impl Fn(&FieldSchema) -> bool) -> usize {
        self.schema
            .fields
            .iter()
            .position(predicate)
            .unwrap_or_default()
    }
}

/// Validates schemas and remembers the definitions of live collections.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    limits: SchemaLimits,
    /// Engine graph defaults that per-index params are overlaid on.
    hnsw: HnswConfig,
    definitions: RwLock<HashMap<String, Arc<CollectionDefinition>>>,
}

impl SchemaRegistry {
    pub fn new(limits: SchemaLimits) -> Self {
        SchemaRegistry {
            limits,
            hnsw: HnswConfig::default(),
            definitions: RwLock::new(HashMap::new()),
        }
    }

    /// Check graph params against `hnsw` instead of the built-in defaults.
    pub fn with_hnsw(mut self, hnsw: HnswConfig) -> Self {
        self.hnsw = hnsw;
        self
    }

    pub fn limits(&self) -> &SchemaLimits {
        &self.limits
    }

    /// Validate a definition without registering it.
    pub fn validate(
        &self,
        name: &str,
        schema: &CollectionSchema,
        index_params: &IndexParamsBuilder,
        provider_dim: Option<usize>,
    ) -> std::result::Result<CollectionDefinition, SchemaError> {
        validate_name(name)?;
        schema.validate(&self.limits, provider_dim)?;

        let index = match index_params.indexes() {
            [index] => index,
            [] => {
                return Err(SchemaError::invalid_field(
                    name,
                    "exactly one index must be declared",
                ));
            }
            [_, second, ..] => {
                return Err(SchemaError::invalid_field(
                    &second.field_name,
                    "only one index per collection is supported",
                ));
            }
        };
        match schema.field(&index.field_name) {
            Some(field) if field.is_vector() => {}
            Some(_) => {
                return Err(SchemaError::invalid_field(
                    &index.field_name,
                    "indexes can only be built on the FLOAT_VECTOR field",
                ));
            }
            None => {
                return Err(SchemaError::invalid_field(
                    &index.field_name,
                    "index targets a field that does not exist",
                ));
            }
        }
        if index.index_type != IndexType::Flat
            && let Some(problem) = index.params.resolve(&self.hnsw).violation()
        {
            return Err(SchemaError::invalid_field(
                &index.field_name,
                format!("index params: {problem}"),
            ));
        }

        Ok(CollectionDefinition {
            name: name.to_string(),
            schema: schema.clone(),
            index: index.clone(),
        })
    }

    /// Validate and register a new definition. Nothing is registered if any
    /// check fails.
    pub fn define(
        &self,
        name: &str,
        schema: &CollectionSchema,
        index_params: &IndexParamsBuilder,
        provider_dim: Option<usize>,
    ) -> Result<Arc<CollectionDefinition>> {
        let definition = Arc::new(self.validate(name, schema, index_params, provider_dim)?);

        let mut definitions = self.definitions.write();
        if definitions.contains_key(name) {
            return Err(StateError::CollectionExists(name.to_string()).into());
        }
        definitions.insert(name.to_string(), Arc::clone(&definition));
        Ok(definition)
    }

    /// Register a definition read back from storage.
    pub fn restore(&self, definition: CollectionDefinition) -> Result<Arc<CollectionDefinition>> {
        let definition = Arc::new(definition);
        let mut definitions = self.definitions.write();
        if definitions.contains_key(&definition.name) {
            return Err(QuiverError::internal(format!(
                "collection '{}' restored twice",
                definition.name
            )));
        }
        definitions.insert(definition.name.clone(), Arc::clone(&definition));
        Ok(definition)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CollectionDefinition>> {
        self.definitions.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<CollectionDefinition>> {
        self.definitions.write().remove(name)
    }

    /// Registered collection names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, FieldOptions, IndexBuildParams, MetricType};

    fn schema() -> CollectionSchema {
        let mut schema = CollectionSchema::new();
        schema
            .add_field("id", DataType::Int64, FieldOptions::new().primary())
            .add_field("title", DataType::VarChar, FieldOptions::new().max_length(64))
            .add_field("embedding", DataType::FloatVector, FieldOptions::new().dim(4));
        schema
    }

    fn index_on(field: &str) -> IndexParamsBuilder {
        let mut params = IndexParamsBuilder::new();
        params.add_index(field, IndexType::Flat, MetricType::L2);
        params
    }

    #[test]
    fn test_define_and_lookup() {
        let registry = SchemaRegistry::default();
        let definition = registry
            .define("docs", &schema(), &index_on("embedding"), None)
            .unwrap();
        assert_eq!(definition.primary_field().name, "id");
        assert_eq!(definition.dim(), 4);
        assert!(registry.contains("docs"));
        assert_eq!(registry.names(), vec!["docs".to_string()]);
    }

    #[test]
    fn test_duplicate_collection() {
        let registry = SchemaRegistry::default();
        registry
            .define("docs", &schema(), &index_on("embedding"), None)
            .unwrap();
        let err = registry
            .define("docs", &schema(), &index_on("embedding"), None)
            .unwrap_err();
        assert!(matches!(
            err,
            QuiverError::State(StateError::CollectionExists(_))
        ));
    }

    #[test]
    fn test_index_must_target_vector_field() {
        let registry = SchemaRegistry::default();
        assert!(registry
            .define("docs", &schema(), &index_on("title"), None)
            .is_err());
        assert!(registry
            .define("docs", &schema(), &index_on("missing"), None)
            .is_err());
        assert!(registry
            .define("docs", &schema(), &IndexParamsBuilder::new(), None)
            .is_err());

        let mut two = index_on("embedding");
        two.add_index("embedding", IndexType::Hnsw, MetricType::Ip);
        assert!(registry.define("docs", &schema(), &two, None).is_err());

        // failed definitions leave nothing behind
        assert!(!registry.contains("docs"));
    }

    #[test]
    fn test_graph_params_are_checked() {
        let registry = SchemaRegistry::default();
        let bad = [
            IndexBuildParams { m: Some(0), ef_construction: Some(0), ef_search: None },
            IndexBuildParams { m: Some(1), ..Default::default() },
            IndexBuildParams { m: Some(32), ef_construction: Some(16), ef_search: None },
            IndexBuildParams { ef_search: Some(0), ..Default::default() },
        ];
        for params in bad {
            for index_type in [IndexType::Hnsw, IndexType::AutoIndex] {
                let mut index = IndexParamsBuilder::new();
                index.add_index_with_params("embedding", index_type, MetricType::L2, params);
                let err = registry.define("docs", &schema(), &index, None).unwrap_err();
                assert!(
                    matches!(
                        &err,
                        QuiverError::Schema(SchemaError::InvalidField { field, .. }) if field == "embedding"
                    ),
                    "{params:?}: {err}"
                );
            }
        }
        assert!(!registry.contains("docs"));

        let mut good = IndexParamsBuilder::new();
        good.add_index_with_params(
            "embedding",
            IndexType::Hnsw,
            MetricType::L2,
            IndexBuildParams { m: Some(8), ef_construction: Some(64), ef_search: Some(16) },
        );
        assert!(registry.define("docs", &schema(), &good, None).is_ok());
    }

    #[test]
    fn test_invalid_collection_name() {
        let registry = SchemaRegistry::default();
        assert!(matches!(
            registry.define("bad name", &schema(), &index_on("embedding"), None),
            Err(QuiverError::Schema(SchemaError::InvalidField { .. }))
        ));
    }
}
