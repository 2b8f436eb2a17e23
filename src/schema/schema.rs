//! Collection schema: ordered fields plus an optional embedding function.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::SchemaLimits;
use crate::error::SchemaError;
use crate::schema::field::{DataType, FieldOptions, FieldSchema};
use crate::schema::function::EmbeddingFunction;

/// Longest accepted field, function or collection name.
pub const MAX_NAME_LENGTH: usize = 255;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("name pattern is a valid regex")
});

/// Check a field, function or collection name.
pub fn validate_name(name: &str) -> Result<(), SchemaError> {
    if name.is_empty() {
        return Err(SchemaError::invalid_field(name, "name is empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(SchemaError::invalid_field(
            name,
            format!("name is longer than {MAX_NAME_LENGTH} characters"),
        ));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(SchemaError::invalid_field(
            name,
            "name must start with a letter or underscore and contain only letters, digits and underscores",
        ));
    }
    Ok(())
}

/// Describes the shape of a collection's records.
///
/// Fields are accumulated without checks; everything is validated at once by
/// [`validate`](Self::validate) when the collection is created.
///
/// ```
/// use quiver::schema::{CollectionSchema, DataType, EmbeddingFunction, FieldOptions};
///
/// let mut schema = CollectionSchema::new();
/// schema
///     .add_field("id", DataType::VarChar, FieldOptions::new().primary().max_length(100))
///     .add_field("content", DataType::VarChar, FieldOptions::new().max_length(9000))
///     .add_field("content_dense", DataType::FloatVector, FieldOptions::new().dim(8))
///     .add_function(EmbeddingFunction::text_embedding(
///         "embed", "content", "content_dense", "openai", "text-embedding-3-small",
///     ));
/// assert_eq!(schema.primary_field().unwrap().name, "id");
/// assert_eq!(schema.vector_field().unwrap().dim, Some(8));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<EmbeddingFunction>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl CollectionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn add_field(
        &mut self,
        name: impl Into<String>,
        data_type: DataType,
        options: FieldOptions,
    ) -> &mut Self {
        self.fields.push(FieldSchema::new(name, data_type, options));
        self
    }

    pub fn add_function(&mut self, function: EmbeddingFunction) -> &mut Self {
        self.functions.push(function);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_field(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_primary)
    }

    pub fn vector_field(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_vector())
    }

    pub fn embedding_function(&self) -> Option<&EmbeddingFunction> {
        self.functions.first()
    }

    /// Whether `name` is filled in by the embedding function.
    pub fn is_function_output(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.output_field == name)
    }

    /// Validate the whole schema.
    ///
    /// `provider_dim` is the dimension the resolved embedding provider
    /// produces, when a function is bound.
    pub fn validate(
        &self,
        limits: &SchemaLimits,
        provider_dim: Option<usize>,
    ) -> Result<(), SchemaError> {
        if self.fields.is_empty() {
            return Err(SchemaError::MissingPrimaryKey);
        }
        if self.fields.len() > limits.max_fields {
            return Err(SchemaError::invalid_field(
                "<schema>",
                format!("more than {} fields", limits.max_fields),
            ));
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            validate_name(&field.name)?;
            if !names.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            self.validate_field(field, limits)?;
        }

        let primaries: Vec<&FieldSchema> = self.fields.iter().filter(|f| f.is_primary).collect();
        match primaries.as_slice() {
            [] => return Err(SchemaError::MissingPrimaryKey),
            [primary] if !primary.data_type.can_be_primary() => {
                return Err(SchemaError::invalid_field(
                    &primary.name,
                    format!("primary key cannot be {}", primary.data_type),
                ));
            }
            [_] => {}
            [_, second, ..] => {
                return Err(SchemaError::invalid_field(
                    &second.name,
                    "schema declares more than one primary key",
                ));
            }
        }

        let vectors: Vec<&FieldSchema> = self.fields.iter().filter(|f| f.is_vector()).collect();
        match vectors.as_slice() {
            [] => {
                return Err(SchemaError::invalid_field(
                    "<schema>",
                    "schema needs exactly one FLOAT_VECTOR field",
                ));
            }
            [_] => {}
            [_, second, ..] => {
                return Err(SchemaError::invalid_field(
                    &second.name,
                    "only one FLOAT_VECTOR field is supported",
                ));
            }
        }

        self.validate_functions(&names, provider_dim)
    }

    fn validate_field(&self, field: &FieldSchema, limits: &SchemaLimits) -> Result<(), SchemaError> {
        match (field.data_type, field.max_length) {
            (DataType::VarChar, None) => {
                return Err(SchemaError::invalid_field(
                    &field.name,
                    "VARCHAR fields need max_length",
                ));
            }
            (DataType::VarChar, Some(len)) if len == 0 || len > limits.max_varchar_length => {
                return Err(SchemaError::invalid_field(
                    &field.name,
                    format!("max_length must be in 1..={}", limits.max_varchar_length),
                ));
            }
            (DataType::VarChar, Some(_)) | (_, None) => {}
            (other, Some(_)) => {
                return Err(SchemaError::invalid_field(
                    &field.name,
                    format!("max_length is not allowed on {other}"),
                ));
            }
        }

        match (field.data_type, field.dim) {
            (DataType::FloatVector, None) => Err(SchemaError::invalid_field(
                &field.name,
                "FLOAT_VECTOR fields need dim",
            )),
            (DataType::FloatVector, Some(dim)) if dim == 0 || dim > limits.max_vector_dim => {
                Err(SchemaError::invalid_field(
                    &field.name,
                    format!("dim must be in 1..={}", limits.max_vector_dim),
                ))
            }
            (DataType::FloatVector, Some(_)) | (_, None) => Ok(()),
            (other, Some(_)) => Err(SchemaError::invalid_field(
                &field.name,
                format!("dim is not allowed on {other}"),
            )),
        }
    }

    fn validate_functions(
        &self,
        field_names: &HashSet<&str>,
        provider_dim: Option<usize>,
    ) -> Result<(), SchemaError> {
        let function = match self.functions.as_slice() {
            [] => return Ok(()),
            [function] => function,
            [_, second, ..] => {
                return Err(SchemaError::invalid_field(
                    &second.name,
                    "only one embedding function is supported",
                ));
            }
        };

        validate_name(&function.name)?;
        if field_names.contains(function.name.as_str()) {
            return Err(SchemaError::DuplicateField(function.name.clone()));
        }

        let input = self.field(&function.input_field).ok_or_else(|| {
            SchemaError::invalid_field(&function.input_field, "function input field does not exist")
        })?;
        if input.data_type != DataType::VarChar {
            return Err(SchemaError::invalid_field(
                &input.name,
                "function input must be VARCHAR",
            ));
        }
        if input.is_primary {
            return Err(SchemaError::invalid_field(
                &input.name,
                "function input cannot be the primary key",
            ));
        }

        let output = self.field(&function.output_field).ok_or_else(|| {
            SchemaError::invalid_field(&function.output_field, "function output field does not exist")
        })?;
        if !output.is_vector() {
            return Err(SchemaError::invalid_field(
                &output.name,
                "function output must be FLOAT_VECTOR",
            ));
        }

        let expected = output.dim.unwrap_or_default();
        for actual in [function.params.dim, provider_dim].into_iter().flatten() {
            if actual != expected {
                return Err(SchemaError::DimensionMismatch {
                    field: output.name.clone(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article_schema() -> CollectionSchema {
        let mut schema = CollectionSchema::new();
        schema
            .add_field("id", DataType::VarChar, FieldOptions::new().primary().max_length(1000))
            .add_field("content", DataType::VarChar, FieldOptions::new().max_length(9000))
            .add_field("date", DataType::Int64, FieldOptions::new())
            .add_field("content_dense", DataType::FloatVector, FieldOptions::new().dim(1536))
            .add_function(
                EmbeddingFunction::text_embedding(
                    "openai_embedding",
                    "content",
                    "content_dense",
                    "openai",
                    "text-embedding-3-small",
                )
                .with_dim(1536),
            );
        schema
    }

    fn limits() -> SchemaLimits {
        SchemaLimits::default()
    }

    #[test]
    fn test_valid_schema() {
        article_schema().validate(&limits(), Some(1536)).unwrap();
    }

    #[test]
    fn test_names() {
        assert!(validate_name("feed_title").is_ok());
        assert!(validate_name("_x9").is_ok());
        assert!(validate_name("9x").is_err());
        assert!(validate_name("has-dash").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_duplicate_field() {
        let mut schema = article_schema();
        schema.add_field("date", DataType::Int64, FieldOptions::new());
        assert_eq!(
            schema.validate(&limits(), None),
            Err(SchemaError::DuplicateField("date".into()))
        );
    }

    #[test]
    fn test_function_name_collides_with_field() {
        let mut schema = article_schema();
        schema.functions[0].name = "content".into();
        assert_eq!(
            schema.validate(&limits(), None),
            Err(SchemaError::DuplicateField("content".into()))
        );
    }

    #[test]
    fn test_primary_key_rules() {
        let mut schema = article_schema();
        schema.fields[0].is_primary = false;
        assert_eq!(
            schema.validate(&limits(), None),
            Err(SchemaError::MissingPrimaryKey)
        );

        let mut schema = article_schema();
        schema.fields[2].is_primary = true;
        assert!(matches!(
            schema.validate(&limits(), None),
            Err(SchemaError::InvalidField { field, .. }) if field == "date"
        ));

        let mut schema = CollectionSchema::new();
        schema
            .add_field("pk", DataType::Double, FieldOptions::new().primary())
            .add_field("v", DataType::FloatVector, FieldOptions::new().dim(2));
        assert!(matches!(
            schema.validate(&limits(), None),
            Err(SchemaError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_length_and_dim_limits() {
        let mut schema = article_schema();
        schema.fields[1].max_length = Some(70_000);
        assert!(schema.validate(&limits(), None).is_err());

        let mut schema = article_schema();
        schema.fields[1].max_length = None;
        assert!(schema.validate(&limits(), None).is_err());

        let mut schema = article_schema();
        schema.fields[2].dim = Some(4);
        assert!(schema.validate(&limits(), None).is_err());

        let mut schema = article_schema();
        schema.fields[3].dim = Some(0);
        assert!(schema.validate(&limits(), None).is_err());
    }

    #[test]
    fn test_vector_field_count() {
        let mut schema = article_schema();
        schema.add_field("other", DataType::FloatVector, FieldOptions::new().dim(4));
        assert!(schema.validate(&limits(), None).is_err());

        let mut schema = CollectionSchema::new();
        schema.add_field("id", DataType::Int64, FieldOptions::new().primary());
        assert!(schema.validate(&limits(), None).is_err());
    }

    #[test]
    fn test_function_binding_types() {
        let mut schema = article_schema();
        schema.functions[0].input_field = "date".into();
        assert!(matches!(
            schema.validate(&limits(), None),
            Err(SchemaError::InvalidField { field, .. }) if field == "date"
        ));

        let mut schema = article_schema();
        schema.functions[0].output_field = "content".into();
        assert!(schema.validate(&limits(), None).is_err());

        let mut schema = article_schema();
        schema.functions[0].input_field = "missing".into();
        assert!(schema.validate(&limits(), None).is_err());

        let mut schema = article_schema();
        schema.add_function(schema.functions[0].clone());
        assert!(schema.validate(&limits(), None).is_err());
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut schema = article_schema();
        schema.functions[0].params.dim = Some(768);
        assert_eq!(
            schema.validate(&limits(), None),
            Err(SchemaError::DimensionMismatch {
                field: "content_dense".into(),
                expected: 1536,
                actual: 768
            })
        );

        let schema = article_schema();
        assert!(matches!(
            schema.validate(&limits(), Some(3072)),
            Err(SchemaError::DimensionMismatch { actual: 3072, .. })
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let schema = article_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let back: CollectionSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }
}
