//! Deterministic feature-hashing embedder.
//!
//! Needs no model or network, so it backs tests and the command-line tool.
//! Identical text always yields an identical vector.

use async_trait::async_trait;
use unicode_segmentation::UnicodeSegmentation;

use crate::embedding::text_embedder::TextEmbedder;
use crate::error::EmbeddingError;

/// Hashes lowercase words into `dimension` signed buckets and L2-normalizes.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        HashingEmbedder { dimension }
    }

    /// Synchronous embedding, used by the async impl.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        for word in text.unicode_words() {
            let word = word.to_lowercase();
            let hash = crc32fast::hash(word.as_bytes());
            let bucket = hash as usize % self.dimension;
            let sign = if hash & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl TextEmbedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing"
    }
}
