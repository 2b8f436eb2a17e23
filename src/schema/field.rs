//! Field definitions and field values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Data type of a collection field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "BOOL")]
    Bool,
    #[serde(rename = "INT64")]
    Int64,
    #[serde(rename = "DOUBLE")]
    Double,
    #[serde(rename = "VARCHAR")]
    VarChar,
    #[serde(rename = "FLOAT_VECTOR")]
    FloatVector,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "BOOL",
            DataType::Int64 => "INT64",
            DataType::Double => "DOUBLE",
            DataType::VarChar => "VARCHAR",
            DataType::FloatVector => "FLOAT_VECTOR",
        }
    }

    /// Whether values of this type can serve as a primary key.
    pub fn can_be_primary(&self) -> bool {
        matches!(self, DataType::VarChar | DataType::Int64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BOOL" => Ok(DataType::Bool),
            "INT64" => Ok(DataType::Int64),
            "DOUBLE" => Ok(DataType::Double),
            "VARCHAR" => Ok(DataType::VarChar),
            "FLOAT_VECTOR" => Ok(DataType::FloatVector),
            other => Err(SchemaError::invalid_field(
                other,
                "unknown data type",
            )),
        }
    }
}

/// Optional attributes passed to [`CollectionSchema::add_field`](crate::schema::CollectionSchema::add_field).
///
/// ```
/// use quiver::schema::FieldOptions;
///
/// let pk = FieldOptions::new().primary().max_length(1000);
/// assert!(pk.is_primary);
/// assert_eq!(pk.max_length, Some(1000));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldOptions {
    pub max_length: Option<usize>,
    pub dim: Option<usize>,
    pub is_primary: bool,
    pub description: String,
}

impl FieldOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the field as the collection's primary key.
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    /// Maximum length in bytes for a VARCHAR field.
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Dimension of a FLOAT_VECTOR field.
    pub fn dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }

    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }
}

/// A single field in a collection schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<usize>,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl FieldSchema {
    pub fn new<S: Into<String>>(name: S, data_type: DataType, options: FieldOptions) -> Self {
        FieldSchema {
            name: name.into(),
            data_type,
            max_length: options.max_length,
            dim: options.dim,
            is_primary: options.is_primary,
            description: options.description,
        }
    }

    pub fn is_vector(&self) -> bool {
        self.data_type == DataType::FloatVector
    }

    /// Check that `value` can be stored in this field.
    ///
    /// An INT64 value supplied for a DOUBLE field is widened.
    pub fn check_value(&self, value: FieldValue) -> Result<FieldValue, SchemaError> {
        let value = match (self.data_type, value) {
            (DataType::Double, FieldValue::Int64(v)) => FieldValue::Double(v as f64),
            (_, value) => value,
        };

        if value.data_type() != self.data_type {
            return Err(SchemaError::invalid_field(
                &self.name,
                format!("expected {}, got {}", self.data_type, value.data_type()),
            ));
        }

        match &value {
            FieldValue::VarChar(s) => {
                if let Some(max) = self.max_length
                    && s.len() > max
                {
                    return Err(SchemaError::invalid_field(
                        &self.name,
                        format!("value is {} bytes, max_length is {max}", s.len()),
                    ));
                }
            }
            FieldValue::FloatVector(v) => {
                if let Some(dim) = self.dim
                    && v.len() != dim
                {
                    return Err(SchemaError::DimensionMismatch {
                        field: self.name.clone(),
                        expected: dim,
                        actual: v.len(),
                    });
                }
            }
            FieldValue::Double(d) if !d.is_finite() => {
                return Err(SchemaError::invalid_field(&self.name, "value is not finite"));
            }
            _ => {}
        }

        Ok(value)
    }
}

/// A value stored in a field.
///
/// Serialized untagged, so rows read naturally as JSON objects:
///
/// ```
/// use quiver::schema::FieldValue;
///
/// let v: FieldValue = serde_json::from_str("42").unwrap();
/// assert_eq!(v, FieldValue::Int64(42));
/// let v: FieldValue = serde_json::from_str("\"hi\"").unwrap();
/// assert_eq!(v.as_str(), Some("hi"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int64(i64),
    Double(f64),
    VarChar(String),
    FloatVector(Vec<f32>),
}

impl FieldValue {
    pub fn data_type(&self) -> DataType {
        match self {
            FieldValue::Bool(_) => DataType::Bool,
            FieldValue::Int64(_) => DataType::Int64,
            FieldValue::Double(_) => DataType::Double,
            FieldValue::VarChar(_) => DataType::VarChar,
            FieldValue::FloatVector(_) => DataType::FloatVector,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::VarChar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            FieldValue::FloatVector(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_vector(self) -> Option<Vec<f32>> {
        match self {
            FieldValue::FloatVector(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::VarChar(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::VarChar(v)
    }
}

impl From<Vec<f32>> for FieldValue {
    fn from(v: Vec<f32>) -> Self {
        FieldValue::FloatVector(v)
    }
}
