//! The model seam every program run, judge call and sample generation
//! goes through, plus the Anthropic backend behind the `anthropic` feature.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The request never produced an HTTP response, or no key was configured.
    #[error("model unreachable: {0}")]
    Network(String),
    #[error("model API rejected the request ({status}): {message}")]
    Api { status: u16, message: String },
    /// The response body had no usable text.
    #[error("unreadable model response: {0}")]
    Parse(String),
}

/// One chat turn. `role` is `system`, `user` or `assistant`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A chat model that turns a conversation into one text reply.
///
/// Backends only move text. Schemas, demos and JSON reply validation are
/// handled by [`crate::structured::StructuredCall`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: Vec<Message>, model: &str) -> Result<String, LlmError>;
}

/// Per-model request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub max_tokens: u32,
    pub temperature: Option<f64>,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: None,
        }
    }
}

/// Parameters for every configured model, with a fallback for the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTable {
    #[serde(flatten)]
    pub models: BTreeMap<String, ModelParams>,
}

impl ModelTable {
    pub fn params_for(&self, model: &str) -> ModelParams {
        self.models.get(model).cloned().unwrap_or_default()
    }
}

/// Models often wrap JSON replies in a ``` or ```json fence; return the body.
pub(crate) fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();

    if let Some(stripped) = trimmed.strip_prefix("```json") {
        if let Some(inner) = stripped.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(stripped) = trimmed.strip_prefix("```") {
        if let Some(inner) = stripped.strip_suffix("```") {
            return inner.trim();
        }
    }

    trimmed
}

// ──────────────────────────────────────────────
// Anthropic Messages API
// ──────────────────────────────────────────────

#[cfg(feature = "anthropic")]
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[cfg(feature = "anthropic")]
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<&'a Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[cfg(feature = "anthropic")]
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[cfg(feature = "anthropic")]
#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// [`LlmClient`] over the Anthropic Messages API. Request parameters come
/// from the [`ModelTable`]; the blocking `ureq` call runs on tokio's
/// blocking pool.
#[cfg(feature = "anthropic")]
pub struct AnthropicClient {
    pub api_key: String,
    /// Defaults to `https://api.anthropic.com`.
    pub base_url: String,
    pub models: ModelTable,
}

#[cfg(feature = "anthropic")]
impl AnthropicClient {
    /// Read the key from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, LlmError> {
        match std::env::var("ANTHROPIC_API_KEY") {
            Ok(key) if !key.is_empty() => Ok(Self::new(key)),
            _ => Err(LlmError::Network(
                "ANTHROPIC_API_KEY is not set; model-backed commands need it".to_string(),
            )),
        }
    }

    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            models: ModelTable::default(),
        }
    }

    pub fn with_models(mut self, models: ModelTable) -> Self {
        self.models = models;
        self
    }

    /// Serialize a request body. System turns are folded into the
    /// top-level `system` field, which is how this API takes them.
    fn request_body(&self, messages: &[Message], model: &str) -> Result<Vec<u8>, LlmError> {
        let params = self.models.params_for(model);
        let system = messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str());
        let request = MessagesRequest {
            model,
            max_tokens: params.max_tokens,
            system,
            messages: messages.iter().filter(|m| m.role != "system").collect(),
            temperature: params.temperature,
        };
        serde_json::to_vec(&request).map_err(|e| LlmError::Parse(e.to_string()))
    }
}

#[cfg(feature = "anthropic")]
#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, messages: Vec<Message>, model: &str) -> Result<String, LlmError> {
        let body = self.request_body(&messages, model)?;
        let url = format!("{}/v1/messages", self.base_url);
        let api_key = self.api_key.clone();
        tracing::debug!(model = %model, turns = messages.len(), "model request");

        tokio::task::spawn_blocking(move || {
            let reply = ureq::Agent::new_with_defaults()
                .post(&url)
                .header("x-api-key", &api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .send(&body[..]);
            let parsed: MessagesResponse = match reply {
                Ok(resp) => resp
                    .into_body()
                    .read_json()
                    .map_err(|e| LlmError::Parse(e.to_string()))?,
                Err(ureq::Error::StatusCode(status)) => {
                    return Err(LlmError::Api {
                        status,
                        message: format!("POST {}", url),
                    })
                }
                Err(e) => return Err(LlmError::Network(e.to_string())),
            };
            parsed
                .content
                .into_iter()
                .find_map(|block| block.text)
                .ok_or_else(|| LlmError::Parse("reply has no text block".to_string()))
        })
        .await
        .map_err(|e| LlmError::Network(format!("request task failed: {}", e)))?
    }
}
