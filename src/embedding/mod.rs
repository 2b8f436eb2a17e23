//! Embedding gateway: the provider capability trait, a registry of
//! providers, and the retrying gateway the collections call through.

pub mod gateway;
pub mod hashing;
pub mod registry;
pub mod text_embedder;

pub use gateway::EmbeddingGateway;
pub use hashing::HashingEmbedder;
pub use registry::EmbedderRegistry;
pub use text_embedder::TextEmbedder;
