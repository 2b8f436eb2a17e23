//! Vector search: distance metrics, the HNSW graph and the index that
//! combines durable vectors with a loadable search structure.

pub mod distance;
pub mod hnsw;
pub mod index;

pub use hnsw::{HnswConfig, HnswGraph};
pub use index::{IndexKind, LoadPlan, LoadedIndex, ScoredId, VectorIndex};
