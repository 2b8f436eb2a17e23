//! Lookup of text embedders by provider and model name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::embedding::text_embedder::TextEmbedder;
use crate::error::SchemaError;
use crate::schema::EmbeddingFunction;

type Fallback = dyn Fn(usize) -> Arc<dyn TextEmbedder> + Send + Sync;

/// Provider registry shared by all collections of a manager.
///
/// Providers are keyed by `(provider, model_name)`; provider names are
/// matched case-insensitively. An optional fallback builds an embedder for any
/// pair nobody registered, given the dimension the schema asks for.
#[derive(Clone, Default)]
pub struct EmbedderRegistry {
    embedders: Arc<RwLock<HashMap<(String, String), Arc<dyn TextEmbedder>>>>,
    fallback: Arc<RwLock<Option<Arc<Fallback>>>>,
}

impl fmt::Debug for EmbedderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .embedders
            .read()
            .keys()
            .map(|(provider, model)| format!("{provider}/{model}"))
            .collect();
        keys.sort();
        f.debug_struct("EmbedderRegistry")
            .field("embedders", &keys)
            .field("fallback", &self.fallback.read().is_some())
            .finish()
    }
}

fn key(provider: &str, model: &str) -> (String, String) {
    (provider.to_ascii_lowercase(), model.to_string())
}

impl EmbedderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an embedder, replacing any previous one for the same pair.
    pub fn register(
        &self,
        provider: impl AsRef<str>,
        model: impl AsRef<str>,
        embedder: Arc<dyn TextEmbedder>,
    ) {
        let key = key(provider.as_ref(), model.as_ref());
        debug!(
            "registered embedder '{}' for {}/{}",
            embedder.name(),
            key.0,
            key.1
        );
        self.embedders.write().insert(key, embedder);
    }

    /// Use `factory` for provider/model pairs that have no registration.
    pub fn register_fallback<F>(&self, factory: F)
    where
        F: Fn(usize) -> Arc<dyn TextEmbedder> + Send + Sync + 'static,
    {
        *self.fallback.write() = Some(Arc::new(factory));
    }

    /// Find the embedder for a pair, consulting the fallback with `dim`.
    pub fn resolve(&self, provider: &str, model: &str, dim: usize) -> Option<Arc<dyn TextEmbedder>> {
        if let Some(embedder) = self.embedders.read().get(&key(provider, model)) {
            return Some(Arc::clone(embedder));
        }
        self.fallback.read().as_ref().map(|factory| factory(dim))
    }

    /// Resolve the embedder for a function binding whose output field has
    /// dimension `dim`.
    pub fn resolve_function(
        &self,
        function: &EmbeddingFunction,
        dim: usize,
    ) -> Result<Arc<dyn TextEmbedder>, SchemaError> {
        let params = &function.params;
        self.resolve(&params.provider, &params.model_name, dim)
            .ok_or_else(|| SchemaError::UnsupportedProvider {
                provider: params.provider.clone(),
                model: params.model_name.clone(),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.embedders.read().is_empty() && self.fallback.read().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hashing::HashingEmbedder;

    #[test]
    fn test_register_and_resolve() {
        let registry = EmbedderRegistry::new();
        assert!(registry.is_empty());
        registry.register("OpenAI", "small", Arc::new(HashingEmbedder::new(4)));

        let embedder = registry.resolve("openai", "small", 4).unwrap();
        assert_eq!(embedder.dimension(), 4);
        assert!(registry.resolve("openai", "large", 4).is_none());
    }

    #[test]
    fn test_fallback_uses_requested_dimension() {
        let registry = EmbedderRegistry::new();
        registry.register_fallback(|dim| Arc::new(HashingEmbedder::new(dim)));

        let function = EmbeddingFunction::text_embedding("f", "in", "out", "anything", "m");
        let embedder = registry.resolve_function(&function, 12).unwrap();
        assert_eq!(embedder.dimension(), 12);
    }

    #[test]
    fn test_unsupported_provider() {
        let registry = EmbedderRegistry::new();
        let function = EmbeddingFunction::text_embedding("f", "in", "out", "openai", "m");
        assert_eq!(
            registry.resolve_function(&function, 4).unwrap_err(),
            SchemaError::UnsupportedProvider {
                provider: "openai".into(),
                model: "m".into()
            }
        );
    }
}
