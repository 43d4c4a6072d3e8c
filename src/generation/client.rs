//! Completion service seam and its OpenAI-compatible implementation.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Settings;

/// Anything that turns a prompt into the service's raw reply text.
pub trait CompletionService {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Clone)]
pub struct OpenAiCompletion {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompletion {
    pub fn new(url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, url: url.to_string(), api_key: api_key.to_string(), model: model.to_string() })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let key = settings
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is not set"))?;
        info!(target: "querywarden::generation", "completion endpoint {} model {}", settings.completion_url, settings.model);
        Self::new(&settings.completion_url, key, &settings.model, settings.timeout)
    }
}

impl CompletionService for OpenAiCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{"role": "user", "content": prompt}],
        });
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("completion request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("completion service returned HTTP {}: {}", status, text.trim()));
        }
        let parsed: ChatResponse = resp.json().await.context("completion response is not JSON")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("completion response has no message content"))?;
        debug!(target: "querywarden::generation", "received {} bytes", content.len());
        Ok(content)
    }
}
