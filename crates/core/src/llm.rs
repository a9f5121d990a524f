//! Language-model access.
//!
//! Routing and synthesis only ever need `prompt -> text`, so the whole
//! provider surface is the single [`TextGenerator::generate`] call.

use crate::config::LlmConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Builds a `reqwest::Client` whose every request carries finite timeouts.
pub fn build_http_client(config: &LlmConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(config.request_timeout())
        .connect_timeout(config.connect_timeout())
        .build()
}

/// Google Gemini `generateContent` client.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    timeout_secs: u64,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| LlmError::MissingApiKey(config.api_key_env.clone()))?;

        Ok(Self {
            client: build_http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_secs: config.request_timeout_secs,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });
        if let Some(temperature) = self.temperature {
            body["generationConfig"] = json!({ "temperature": temperature });
        }
        body
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, prompt_chars = prompt.len(), "sending gemini request");

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    LlmError::Timeout(self.timeout_secs)
                } else {
                    LlmError::Http(error)
                }
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Status {
                provider: "gemini".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|error| LlmError::ResponseParse(format!("invalid json: {error}")))?;
        parse_generate_response(&parsed)
    }
}

fn parse_generate_response(body: &Value) -> Result<String, LlmError> {
    let candidate = body
        .pointer("/candidates/0")
        .ok_or_else(|| LlmError::ResponseParse("missing 'candidates'".to_string()))?;

    let parts = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            let reason = candidate
                .pointer("/finishReason")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            LlmError::ResponseParse(format!("candidate has no parts (finishReason={reason})"))
        })?;

    Ok(parts
        .iter()
        .filter_map(|part| part.pointer("/text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(""))
}
