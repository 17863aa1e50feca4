use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::domain::errors::ModelError;
use crate::domain::ports::{ChatRequest, CompletionClient, ModelEndpoint};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

/// HTTP adapter over the OpenAI-compatible chat-completion contract. One
/// instance serves every endpoint; providers differ only by
/// `{base_url, api_key, model}`. Single attempt per call — retry, timeout
/// and fallback policy belong to the orchestrator.
pub struct ChatCompletionClient {
    http: reqwest::Client,
}

impl ChatCompletionClient {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            http: HttpClientFactory::create_bare_client(request_timeout),
        }
    }
}

impl Default for ChatCompletionClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionClient {
    async fn complete(
        &self,
        endpoint: &ModelEndpoint,
        request: &ChatRequest,
    ) -> Result<String, ModelError> {
        let url = format!(
            "{}/chat/completions",
            endpoint.base_url.trim_end_matches('/')
        );

        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();

        let body = json!({
            "model": endpoint.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        debug!("ChatCompletionClient: requesting {} from {}", endpoint.model, url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&endpoint.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout { seconds: 30 }
                } else {
                    ModelError::Transient {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::Provider {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }

        let payload: Value = response.json().await.map_err(|e| ModelError::Transient {
            reason: format!("unparseable completion payload: {}", e),
        })?;

        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ModelError::Transient {
                reason: "completion payload carried no message content".to_string(),
            })
    }
}
