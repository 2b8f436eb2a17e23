//! Schema registry: field definitions, embedding function bindings and
//! index declarations, validated as a unit before a collection exists.

pub mod field;
pub mod function;
pub mod index_params;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod schema;

pub use field::{DataType, FieldOptions, FieldSchema, FieldValue};
pub use function::{EmbeddingFunction, EmbeddingParams, FunctionType};
pub use index_params::{IndexBuildParams, IndexParams, IndexParamsBuilder, IndexType, MetricType};
pub use registry::{CollectionDefinition, SchemaRegistry};
pub use schema::{CollectionSchema, MAX_NAME_LENGTH, validate_name};
