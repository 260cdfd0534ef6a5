//! Embedding providers
//!
//! [`EmbeddingProvider`] is the narrow seam between the index and whatever
//! turns text into vectors. Two backends ship with the crate:
//! - [`LocalEmbedder`] runs fastembed (ONNX) on this machine; models are
//!   downloaded once and cached in ~/.cache/huggingface/
//! - [`OpenAiEmbedder`] calls an OpenAI-compatible `/embeddings` endpoint
//!
//! Providers may rate-limit or fail; [`embed_with_retry`] wraps any of them
//! with a small bounded retry.

use crate::config::{Config, EmbeddingModel, ProviderKind, RemoteConfig};
use crate::error::{Result, SiftError};
use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable holding the remote API key
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Turns text into fixed-dimension vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, recorded in index snapshots
    fn model_name(&self) -> &str;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the provider selected in `config`.
///
/// Returns `Ok(None)` when the remote provider is selected but no API key
/// is available: indexing and search are then simply off.
pub fn create_provider(config: &Config) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match config.provider {
        ProviderKind::Local => Ok(Some(Arc::new(LocalEmbedder::new(&config.model)?))),
        ProviderKind::OpenAi => match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(Some(Arc::new(OpenAiEmbedder::new(
                config.remote.clone(),
                key,
            )?))),
            _ => {
                info!("{} not set, embeddings disabled", API_KEY_ENV);
                Ok(None)
            }
        },
    }
}

/// Call `provider.embed`, retrying failed calls up to `retries` extra times
/// with exponential backoff starting at `base_delay`.
///
/// The result is checked for count and dimension before it is returned.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    retries: u32,
    base_delay: Duration,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(vec![]);
    }

    let mut last_err = None;

    for attempt in 0..=retries {
        if attempt > 0 {
            let delay = base_delay * (1u32 << (attempt - 1).min(5));
            debug!("Retrying embedding call in {:?} (attempt {})", delay, attempt + 1);
            tokio::time::sleep(delay).await;
        }

        match provider.embed(texts).await {
            Ok(vectors) => return check_vectors(provider, texts.len(), vectors),
            Err(e) => {
                warn!("Embedding call failed: {}", e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| SiftError::Embedding("embedding failed after retries".into())))
}

fn check_vectors(
    provider: &dyn EmbeddingProvider,
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(SiftError::Embedding(format!(
            "expected {} vectors, provider returned {}",
            expected,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != provider.dimension()) {
        return Err(SiftError::Embedding(format!(
            "expected dimension {}, provider returned {}",
            provider.dimension(),
            bad.len()
        )));
    }
    Ok(vectors)
}

/// Local embedder using fastembed with ONNX runtime
pub struct LocalEmbedder {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl LocalEmbedder {
    /// Create a new embedder with the specified model
    ///
    /// On first use, downloads the model from HuggingFace (~30-470MB).
    /// Subsequent uses load from cache instantly.
    pub fn new(model_config: &EmbeddingModel) -> Result<Self> {
        info!("Loading embedding model: {:?}", model_config);

        let fastembed_model = match model_config {
            EmbeddingModel::AllMiniLmL6V2 => FastEmbedModel::AllMiniLML6V2,
            EmbeddingModel::BgeSmallEnV15 => FastEmbedModel::BGESmallENV15,
            EmbeddingModel::NomicEmbedTextV15 => FastEmbedModel::NomicEmbedTextV15,
            EmbeddingModel::MultilingualE5Small => FastEmbedModel::MultilingualE5Small,
        };

        let model = TextEmbedding::try_new(
            InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| SiftError::Embedding(e.to_string()))?;

        let dimension = model_config.dimension();

        info!("Model loaded successfully (dimension: {})", dimension);

        Ok(Self {
            model: Arc::new(model),
            model_name: model_config.model_name().to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();

        // ONNX inference is CPU-bound
        tokio::task::spawn_blocking(move || {
            model
                .embed(texts, Some(32))
                .map_err(|e| SiftError::Embedding(e.to_string()))
        })
        .await?
    }
}

/// Embedder backed by an OpenAI-compatible HTTP API
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    config: RemoteConfig,
    api_key: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Create a client; no request is made until the first embed call
    pub fn new(config: RemoteConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.config.embedding_model,
            "input": texts,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(SiftError::Embedding(format!(
                "embedding API error {}: {}",
                status, body_text
            )));
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        // Sort by index to ensure order matches input
        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

/// Normalize embedding vector to unit length (for cosine similarity)
pub fn normalize(embedding: &mut [f32]) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in embedding.iter_mut() {
            *x /= norm;
        }
    }
}

/// Compute cosine similarity between two normalized vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}


#[cfg(test)]
mod tests {
    use super::testing::KeywordEmbedder;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let c = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
    }

    /// Fails a fixed number of times before answering
    struct FlakyEmbedder {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        fn model_name(&self) -> &str {
            "flaky"
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(SiftError::Embedding("rate limited".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let provider = FlakyEmbedder {
            failures_left: AtomicUsize::new(2),
            calls: AtomicUsize::new(0),
        };
        let texts = vec!["a".to_string(), "b".to_string()];

        let vectors = embed_with_retry(&provider, &texts, 3, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let provider = FlakyEmbedder {
            failures_left: AtomicUsize::new(10),
            calls: AtomicUsize::new(0),
        };
        let texts = vec!["a".to_string()];

        let result = embed_with_retry(&provider, &texts, 2, Duration::ZERO).await;
        assert!(matches!(result, Err(SiftError::Embedding(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_call() {
        let provider = KeywordEmbedder::default();
        let vectors = embed_with_retry(&provider, &[], 3, Duration::ZERO).await.unwrap();
        assert!(vectors.is_empty());
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn test_keyword_vectors() {
        let v = KeywordEmbedder::vector("function parseJson(input)");
        assert_eq!(v[0], 1.0);
        assert_eq!(v[1], 1.0);
        assert_eq!(v[2], 0.0);
    }
}
