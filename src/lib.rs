//! # Quiver
//!
//! A single-node vector collection engine.
//!
//! ## Features
//!
//! - Typed collection schemas with validation up front
//! - Text embedding functions backed by pluggable providers
//! - Exact (flat) or approximate (HNSW) nearest-neighbor search
//! - Write-ahead logged row and vector storage that survives restarts
//! - A `CREATED -> LOADED <-> UNLOADED -> DROPPED` collection lifecycle

pub mod cli;
pub mod client;
pub mod collection;
pub mod config;
pub mod embedding;
pub mod error;
pub mod schema;
pub mod storage;
pub mod vector;

pub mod prelude {
    pub use crate::client::CollectionManager;
    pub use crate::collection::{CollectionState, Record, Row, SearchHit};
    pub use crate::config::QuiverConfig;
    pub use crate::embedding::{EmbedderRegistry, HashingEmbedder, TextEmbedder};
    pub use crate::error::{QuiverError, Result};
    pub use crate::schema::{
        CollectionSchema, DataType, EmbeddingFunction, FieldOptions, FieldValue, IndexType,
        MetricType,
    };
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
