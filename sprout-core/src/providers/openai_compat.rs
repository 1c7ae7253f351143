//! OpenAI-compatible specialist invoker.
//!
//! Supports OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any
//! endpoint that follows the OpenAI chat completions API format.

use crate::config::InvokerConfig;
use crate::error::InvokeError;
use crate::invoker::SpecialistInvoker;
use crate::types::{Context, TurnRole};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Invoker backed by a `/chat/completions` endpoint.
pub struct OpenAiCompatibleInvoker {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiCompatibleInvoker {
    /// Create a new invoker from configuration.
    ///
    /// Reads the API key from `config.api_key`, then from the environment
    /// variable named by `config.api_key_env`. Local endpoints need no key.
    pub fn new(config: &InvokerConfig) -> Result<Self, InvokeError> {
        let is_local = config
            .base_url
            .as_ref()
            .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
            .unwrap_or(false);

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local endpoint; using dummy bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| InvokeError::AuthFailed {
                provider: format!(
                    "OpenAI-compatible: env var '{}' not set",
                    config.api_key_env
                ),
            })?;
        Ok(Self::new_with_key(config, api_key))
    }

    /// Create an invoker with an explicitly provided API key.
    pub fn new_with_key(config: &InvokerConfig, api_key: String) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            client: Client::new(),
            base_url,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Chat messages for one call: context facts, prior turns, then the prompt.
    fn build_messages(prompt: &str, context: &Context) -> Vec<Value> {
        let mut messages = Vec::with_capacity(context.history.len() + 2);
        if !context.attributes.is_empty() {
            let facts: Vec<String> = context
                .attributes
                .iter()
                .map(|(key, value)| format!("{key}: {value}"))
                .collect();
            messages.push(json!({
                "role": "system",
                "content": format!("Known facts about this family:\n{}", facts.join("\n")),
            }));
        }
        for turn in &context.history {
            let role = match turn.role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
            };
            messages.push(json!({ "role": role, "content": turn.text }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));
        messages
    }

    /// Extract the answer text from an OpenAI-format response body.
    fn parse_response(body: &Value) -> Result<String, InvokeError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| InvokeError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;

        let text = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| InvokeError::ResponseParse {
                message: "No text content in choice".to_string(),
            })?;

        Ok(text.trim().to_string())
    }

    /// Map an HTTP status code to the appropriate InvokeError.
    fn map_http_error(specialist: &str, status: reqwest::StatusCode, body: &str) -> InvokeError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, status = status.as_u16(), "Authentication failed");
                InvokeError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => InvokeError::RateLimited {
                specialist: specialist.to_string(),
            },
            code if code >= 500 => InvokeError::Remote {
                specialist: specialist.to_string(),
                message: format!("Server error ({code}): {body}"),
            },
            408 => InvokeError::Remote {
                specialist: specialist.to_string(),
                message: format!("HTTP 408: {body}"),
            },
            code => InvokeError::Rejected {
                specialist: specialist.to_string(),
                status: code,
                message: body.to_string(),
            },
        }
    }
}

#[async_trait]
impl SpecialistInvoker for OpenAiCompatibleInvoker {
    async fn invoke(
        &self,
        specialist_id: &str,
        prompt: &str,
        context: &Context,
    ) -> Result<String, InvokeError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = json!({
            "model": self.model,
            "messages": Self::build_messages(prompt, context),
            "temperature": self.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(user) = &context.user_id {
            body["user"] = json!(user);
        }

        debug!(url = %url, model = %self.model, specialist = specialist_id, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| InvokeError::Remote {
                specialist: specialist_id.to_string(),
                message: format!("Request failed: {e}"),
            })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| InvokeError::Remote {
            specialist: specialist_id.to_string(),
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(specialist_id, status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| InvokeError::ResponseParse {
                message: format!("Invalid JSON: {e}"),
            })?;

        Self::parse_response(&json)
    }
}
