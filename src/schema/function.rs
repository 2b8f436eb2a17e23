//! Embedding function bindings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of function attached to a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionType {
    /// Fill a FLOAT_VECTOR field from a VARCHAR field using a text embedder.
    #[serde(rename = "TEXTEMBEDDING")]
    TextEmbedding,
}

/// Provider settings for a text-embedding function.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingParams {
    pub provider: String,
    pub model_name: String,
    /// Output dimension override requested from the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl fmt::Debug for EmbeddingParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingParams")
            .field("provider", &self.provider)
            .field("model_name", &self.model_name)
            .field("dim", &self.dim)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("user", &self.user)
            .finish()
    }
}

/// Binds an input VARCHAR field to an output FLOAT_VECTOR field.
///
/// ```
/// use quiver::schema::EmbeddingFunction;
///
/// let function = EmbeddingFunction::text_embedding(
///     "openai_embedding",
///     "content",
///     "content_dense",
///     "openai",
///     "text-embedding-3-small",
/// )
/// .with_dim(1536);
/// assert_eq!(function.params.dim, Some(1536));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingFunction {
    pub name: String,
    pub function_type: FunctionType,
    pub input_field: String,
    pub output_field: String,
    pub params: EmbeddingParams,
}

impl EmbeddingFunction {
    pub fn text_embedding(
        name: impl Into<String>,
        input_field: impl Into<String>,
        output_field: impl Into<String>,
        provider: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        EmbeddingFunction {
            name: name.into(),
            function_type: FunctionType::TextEmbedding,
            input_field: input_field.into(),
            output_field: output_field.into(),
            params: EmbeddingParams {
                provider: provider.into(),
                model_name: model_name.into(),
                dim: None,
                credential: None,
                user: None,
            },
        }
    }

    pub fn with_dim(mut self, dim: usize) -> Self {
        self.params.dim = Some(dim);
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.params.credential = Some(credential.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.params.user = Some(user.into());
        self
    }
}
