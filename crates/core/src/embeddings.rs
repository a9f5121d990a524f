use crate::config::{EmbeddingBackend, EmbeddingConfig, LlmConfig};
use crate::error::EmbeddingError;
use crate::llm::build_http_client;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Gemini rejects batch requests above this size.
const GEMINI_MAX_BATCH: usize = 100;

/// Maps text into a fixed-dimension vector space.
///
/// `model_id` is recorded next to every index so a query is never embedded
/// with a different model than the passages it is compared against.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> String;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                got: vectors.len(),
            });
        }
        Ok(vectors.remove(0))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> String {
        format!("char-trigram-{}", self.dimensions.max(1))
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

/// Gemini `batchEmbedContents` client.
pub struct GeminiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl GeminiEmbedder {
    pub fn new(llm: &LlmConfig, embedding: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = llm
            .resolve_api_key()
            .ok_or_else(|| EmbeddingError::MissingApiKey(llm.api_key_env.clone()))?;

        Ok(Self {
            client: build_http_client(llm)?,
            base_url: llm.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: embedding.model.clone(),
            dimensions: embedding.dimensions,
        })
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model_path = format!("models/{}", self.model);
        let requests = texts
            .iter()
            .map(|text| {
                json!({
                    "model": model_path,
                    "content": { "parts": [{ "text": text }] },
                    "outputDimensionality": self.dimensions,
                })
            })
            .collect::<Vec<_>>();

        let response = self
            .client
            .post(format!(
                "{}/{}:batchEmbedContents",
                self.base_url, model_path
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "requests": requests }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::BackendResponse {
                backend: "gemini".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let parsed: Value = response.json().await?;
        let vectors = parse_embeddings(&parsed)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_id(&self) -> String {
        format!("gemini/{}", self.model)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(GEMINI_MAX_BATCH) {
            debug!(model = %self.model, count = chunk.len(), "embedding batch");
            vectors.extend(self.embed_chunk(chunk).await?);
        }
        Ok(vectors)
    }
}

fn parse_embeddings(body: &Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let embeddings = body
        .pointer("/embeddings")
        .and_then(Value::as_array)
        .ok_or_else(|| EmbeddingError::BackendResponse {
            backend: "gemini".to_string(),
            details: "missing 'embeddings' array".to_string(),
        })?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .pointer("/values")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_f64)
                        .map(|value| value as f32)
                        .collect::<Vec<_>>()
                })
                .ok_or_else(|| EmbeddingError::BackendResponse {
                    backend: "gemini".to_string(),
                    details: "embedding without 'values'".to_string(),
                })
        })
        .collect()
}

/// Builds the embedder selected by `embedding.backend`.
pub fn embedder_from_config(
    llm: &LlmConfig,
    embedding: &EmbeddingConfig,
) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    match embedding.backend {
        EmbeddingBackend::Ngram => Ok(Arc::new(CharacterNgramEmbedder {
            dimensions: embedding.dimensions,
        })),
        EmbeddingBackend::Gemini => Ok(Arc::new(GeminiEmbedder::new(llm, embedding)?)),
    }
}
