//! Retrying front end for a text embedder.

use std::future::Future;
use std::sync::Arc;

use log::{debug, warn};

use crate::config::RetryPolicy;
use crate::embedding::text_embedder::TextEmbedder;
use crate::error::EmbeddingError;

/// Wraps an embedder with input checks, per-attempt timeouts and retries.
///
/// Transient failures ([`EmbeddingError::is_transient`]) are retried with
/// exponential backoff; the last error is returned once attempts run out.
/// Every call is an ordinary future, so dropping it cancels the request.
#[derive(Debug, Clone)]
pub struct EmbeddingGateway {
    embedder: Arc<dyn TextEmbedder>,
    policy: RetryPolicy,
}

impl EmbeddingGateway {
    pub fn new(embedder: Arc<dyn TextEmbedder>, policy: RetryPolicy) -> Self {
        EmbeddingGateway { embedder, policy }
    }

    pub fn embedder(&self) -> &Arc<dyn TextEmbedder> {
        &self.embedder
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("text is empty".into()));
        }
        self.with_retry(|| self.embedder.embed(text)).await
    }

    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(position) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(format!(
                "text at position {position} is empty"
            )));
        }

        let vectors = self.with_retry(|| self.embedder.embed_batch(texts)).await?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::ProviderUnavailable(format!(
                "'{}' returned {} vectors for {} inputs",
                self.embedder.name(),
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T, EmbeddingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EmbeddingError>>,
    {
        let mut attempt = 1;
        loop {
            let outcome = match self.policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, call()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(EmbeddingError::ProviderUnavailable(format!(
                        "'{}' did not answer within {limit:?}",
                        self.embedder.name()
                    ))),
                },
                None => call().await,
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            "embedding via '{}' succeeded on attempt {attempt}",
                            self.embedder.name()
                        );
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "embedding attempt {attempt}/{} failed: {err}; retrying in {delay:?}",
                        self.policy.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::embedding::hashing::HashingEmbedder;

    /// Fails with the given error for the first `failures` calls.
    #[derive(Debug)]
    struct Flaky {
        failures: u32,
        error: EmbeddingError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TextEmbedder for Flaky {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(vec![1.0, 0.0])
            }
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    #[derive(Debug)]
    struct Stalled;

    #[async_trait]
    impl TextEmbedder for Stalled {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![0.0])
        }

        fn dimension(&self) -> usize {
            1
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
            attempt_timeout: Some(Duration::from_millis(50)),
        }
    }

    fn flaky(failures: u32, error: EmbeddingError) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            error,
            calls: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let embedder = flaky(2, EmbeddingError::RateLimited("429".into()));
        let gateway = EmbeddingGateway::new(embedder.clone(), fast_policy(3));

        assert_eq!(gateway.embed("text").await.unwrap(), vec![1.0, 0.0]);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let embedder = flaky(10, EmbeddingError::ProviderUnavailable("down".into()));
        let gateway = EmbeddingGateway::new(embedder.clone(), fast_policy(3));

        let err = gateway.embed("text").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::ProviderUnavailable(_)));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let embedder = flaky(10, EmbeddingError::InvalidInput("bad".into()));
        let gateway = EmbeddingGateway::new(embedder.clone(), fast_policy(5));

        assert!(gateway.embed("text").await.is_err());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_text_never_reaches_provider() {
        let embedder = flaky(0, EmbeddingError::InvalidInput(String::new()));
        let gateway = EmbeddingGateway::new(embedder.clone(), fast_policy(3));

        assert!(matches!(
            gateway.embed("   ").await,
            Err(EmbeddingError::InvalidInput(_))
        ));
        assert!(matches!(
            gateway.embed_batch(&["ok", ""]).await,
            Err(EmbeddingError::InvalidInput(_))
        ));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_transient() {
        let gateway = EmbeddingGateway::new(Arc::new(Stalled), fast_policy(2));
        let err = gateway.embed("text").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_batch() {
        let gateway = EmbeddingGateway::new(Arc::new(HashingEmbedder::new(4)), RetryPolicy::no_retry());
        let vectors = gateway.embed_batch(&["a b", "c"]).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(gateway.embed_batch(&[]).await.unwrap().is_empty());
    }
}
