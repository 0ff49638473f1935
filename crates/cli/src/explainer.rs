//! Chat-completions explanation backend

use anyhow::{Context, Result};
use async_trait::async_trait;
use forecast_lib::explain::SYSTEM_PROMPT;
use forecast_lib::{ExplanationRequest, Explainer, TemplateExplainer};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::ExplainerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

/// Explainer backed by an OpenAI-compatible API, falling back to the template
pub struct HttpExplainer {
    client: Client,
    completions_url: Url,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    fallback: TemplateExplainer,
}

impl HttpExplainer {
    pub fn new(config: &ExplainerConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .context("Explainer endpoint is not configured")?;
        let api_key = config
            .api_key
            .clone()
            .context("Explainer API key is not configured")?;

        // Url::join drops the last segment unless the base ends with '/'
        let base = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{endpoint}/")
        };
        let completions_url = Url::parse(&base)
            .and_then(|u| u.join("chat/completions"))
            .context("Invalid explainer endpoint")?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            completions_url,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            fallback: TemplateExplainer,
        })
    }

    /// Ask the backend once, without falling back
    pub async fn complete(&self, request: &ExplanationRequest) -> Result<String> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt(),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(self.completions_url.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        let parsed: ChatResponse = response.json().await.context("Failed to parse response")?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("Response contained no choices")?;
        debug!(item_id = %request.item_id, chars = text.len(), "Received explanation");
        Ok(text)
    }
}

#[async_trait]
impl Explainer for HttpExplainer {
    async fn explain(&self, request: &ExplanationRequest) -> Result<String> {
        match self.complete(request).await {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(item_id = %request.item_id, error = %e, "Explanation backend failed, using template");
                Ok(self.fallback.render(request))
            }
        }
    }
}
