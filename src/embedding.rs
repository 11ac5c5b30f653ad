//! Text embeddings for near-duplicate detection.
//!
//! # Architecture
//!
//! - [`Embedder`]: Core trait turning a batch of texts into vectors
//! - [`HttpEmbedder`]: OpenAI-compatible `/v1/embeddings` endpoint (OpenAI,
//!   Ollama, vLLM, ...)
//! - `LocalEmbedder`: in-process fastembed model (`local-embeddings` feature)
//! - [`RetryEmbed`]: Decorator adding exponential backoff to any [`Embedder`]
//! - [`EmbeddingBackend`]: The configured provider, built by [`create_embedder`]
//!
//! # Retry Strategy
//!
//! Only [`EmbedError::is_retryable`] failures (transport errors, 429, 5xx)
//! are retried. The delay between retries is
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use crate::config::EmbeddingSettings;
use crate::error::EmbedError;
use rand::{Rng, rng};
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Anything that can embed a batch of texts, one vector per text, in order.
pub trait Embedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Wrapper that adds exponential backoff retry logic to any [`Embedder`].
pub struct RetryEmbed<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T: Embedder> RetryEmbed<T> {
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryEmbed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryEmbed")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T: Embedder> Embedder for RetryEmbed<T> {
    #[instrument(level = "debug", skip_all, fields(texts = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();

                    if !e.is_retryable() || attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "embed() failed"
                        );
                        return Err(e);
                    }

                    let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1).min(16));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + Duration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "embed() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible embeddings endpoint.
#[derive(Debug)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self, EmbedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        let api_key = settings
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());
        Ok(Self {
            client,
            url: settings.url.clone(),
            model: settings.model.clone(),
            api_key,
        })
    }
}

impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = resp.text().await?;
        parse_embedding_response(&text, texts.len())
    }
}

/// Vectors from an embeddings response, restored to input order.
fn parse_embedding_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>, EmbedError> {
    let mut parsed: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| EmbedError::Parse(e.to_string()))?;
    if parsed.data.len() != expected {
        return Err(EmbedError::CountMismatch {
            expected,
            got: parsed.data.len(),
        });
    }
    if parsed.data.iter().all(|d| d.index.is_some()) {
        parsed.data.sort_by_key(|d| d.index);
    }
    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::Embedder;
    use crate::error::EmbedError;
    use std::sync::{Arc, Mutex};

    /// In-process fastembed model, initialized on first use.
    pub struct LocalEmbedder {
        model: fastembed::EmbeddingModel,
        batch_size: usize,
        loaded: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl std::fmt::Debug for LocalEmbedder {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("LocalEmbedder")
                .field("model", &self.model)
                .field("batch_size", &self.batch_size)
                .finish()
        }
    }

    impl LocalEmbedder {
        pub fn new(model: &str, batch_size: usize) -> Result<Self, EmbedError> {
            let model = match model {
                "all-minilm-l6-v2" => fastembed::EmbeddingModel::AllMiniLML6V2,
                "multilingual-e5-small" => fastembed::EmbeddingModel::MultilingualE5Small,
                "multilingual-e5-base" => fastembed::EmbeddingModel::MultilingualE5Base,
                "multilingual-e5-large" => fastembed::EmbeddingModel::MultilingualE5Large,
                "paraphrase-multilingual-mpnet-base-v2" => {
                    fastembed::EmbeddingModel::ParaphraseMLMpnetBaseV2
                }
                other => {
                    return Err(EmbedError::Unsupported(format!(
                        "unknown local embedding model '{other}'"
                    )));
                }
            };
            Ok(Self {
                model,
                batch_size,
                loaded: Arc::new(Mutex::new(None)),
            })
        }
    }

    impl Embedder for LocalEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            let texts = texts.to_vec();
            let model = self.model.clone();
            let batch_size = self.batch_size;
            let loaded = Arc::clone(&self.loaded);

            tokio::task::spawn_blocking(move || {
                let mut guard = loaded
                    .lock()
                    .map_err(|_| EmbedError::Local("model lock poisoned".into()))?;
                if guard.is_none() {
                    let init = fastembed::InitOptions::new(model).with_show_download_progress(true);
                    let embedding = fastembed::TextEmbedding::try_new(init)
                        .map_err(|e| EmbedError::Local(format!("failed to initialize model: {e}")))?;
                    *guard = Some(embedding);
                }
                let Some(embedding) = guard.as_mut() else {
                    return Err(EmbedError::Local("model not loaded".into()));
                };
                embedding
                    .embed(texts, Some(batch_size))
                    .map_err(|e| EmbedError::Local(e.to_string()))
            })
            .await
            .map_err(|e| EmbedError::Local(e.to_string()))?
        }
    }
}

/// The embedding provider selected by configuration.
#[derive(Debug)]
pub enum EmbeddingBackend {
    Disabled,
    Http(RetryEmbed<HttpEmbedder>),
    #[cfg(feature = "local-embeddings")]
    Local(LocalEmbedder),
}

impl Embedder for EmbeddingBackend {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        match self {
            EmbeddingBackend::Disabled => Err(EmbedError::Disabled),
            EmbeddingBackend::Http(inner) => inner.embed(texts).await,
            #[cfg(feature = "local-embeddings")]
            EmbeddingBackend::Local(inner) => inner.embed(texts).await,
        }
    }
}

/// Build the configured provider.
///
/// | `provider` | Backend |
/// |------------|---------|
/// | `disabled` | [`EmbeddingBackend::Disabled`] |
/// | `http` | [`HttpEmbedder`] wrapped in [`RetryEmbed`] |
/// | `local` | fastembed (requires the `local-embeddings` feature) |
pub fn create_embedder(settings: &EmbeddingSettings) -> Result<EmbeddingBackend, EmbedError> {
    match settings.provider.as_str() {
        "disabled" => Ok(EmbeddingBackend::Disabled),
        "http" => Ok(EmbeddingBackend::Http(RetryEmbed::new(
            HttpEmbedder::new(settings)?,
            settings.max_retries,
            Duration::from_secs(1),
        ))),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(EmbeddingBackend::Local(LocalEmbedder::new(
            &settings.model,
            settings.batch_size,
        )?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(EmbedError::Unsupported(
            "local provider requires building with --features local-embeddings".into(),
        )),
        other => Err(EmbedError::Unsupported(format!("unknown embedding provider '{other}'"))),
    }
}

/// Embed `texts` in chunks of `batch_size`, preserving order.
///
/// Any failing chunk fails the whole call; partial results are discarded.
pub async fn embed_batched<E: Embedder>(
    embedder: &E,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let mut vectors = Vec::with_capacity(texts.len());
    for (i, chunk) in texts.chunks(batch_size.max(1)).enumerate() {
        let batch = embedder.embed(chunk).await?;
        if batch.len() != chunk.len() {
            return Err(EmbedError::CountMismatch {
                expected: chunk.len(),
                got: batch.len(),
            });
        }
        debug!(batch = i, size = chunk.len(), "Embedded batch");
        vectors.extend(batch);
    }
    Ok(vectors)
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, mismatched or
/// zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
