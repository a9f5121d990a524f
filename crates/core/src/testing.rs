//! Deterministic fakes shared by unit tests.

use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::error::{EmbeddingError, LlmError};
use crate::llm::TextGenerator;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Trigram embedder that counts calls and can fail from the n-th call on.
pub struct ScriptedEmbedder {
    inner: CharacterNgramEmbedder,
    calls: AtomicUsize,
    fail_from_call: Option<usize>,
    delay: Duration,
}

impl ScriptedEmbedder {
    pub fn new(fail_from_call: Option<usize>) -> Self {
        Self {
            inner: CharacterNgramEmbedder::default(),
            calls: AtomicUsize::new(0),
            fail_from_call,
            delay: Duration::ZERO,
        }
    }

    /// Sleeps `delay` before answering each batch.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(None)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    fn model_id(&self) -> String {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        Embedder::dimensions(&self.inner)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_from_call.is_some_and(|limit| call >= limit) {
            return Err(EmbeddingError::BackendResponse {
                backend: "scripted".to_string(),
                details: "quota exhausted".to_string(),
            });
        }
        self.inner.embed_batch(texts).await
    }
}

/// Replays canned responses and records every prompt it receives.
pub struct ScriptedGenerator {
    responses: Mutex<Vec<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|prompts| prompts.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| LlmError::ResponseParse("poisoned".to_string()))?;
        if responses.is_empty() {
            return Err(LlmError::ResponseParse("no scripted response left".to_string()));
        }
        responses.remove(0)
    }
}
