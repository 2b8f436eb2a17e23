//! Text embedding trait.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Converts text into a fixed-dimension vector.
///
/// Providers are plugged in through [`EmbedderRegistry`](crate::embedding::EmbedderRegistry);
/// the engine never talks to a concrete service itself.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use quiver::embedding::TextEmbedder;
/// use quiver::error::EmbeddingError;
///
/// #[derive(Debug)]
/// struct Constant {
///     dimension: usize,
/// }
///
/// #[async_trait]
/// impl TextEmbedder for Constant {
///     async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
///         Ok(vec![1.0; self.dimension])
///     }
///
///     fn dimension(&self) -> usize {
///         self.dimension
///     }
/// }
/// ```
#[async_trait]
pub trait TextEmbedder: Send + Sync + Debug {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed several texts; the result has one vector per input, in order.
    ///
    /// The default implementation calls [`embed`](Self::embed) sequentially.
    /// Providers with a native batch endpoint should override it.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Dimension of the vectors this embedder produces.
    fn dimension(&self) -> usize;

    /// Name used in log messages.
    fn name(&self) -> &str {
        "text_embedder"
    }
}
