//! Azure OpenAI chat completions (vision capable deployment).

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use pagerag_core::config::CompletionSettings;
use pagerag_core::error::Error;
use pagerag_core::traits::CompletionService;

pub const EXTRACTION_PROMPT: &str =
    "Extract all text in this image exactly. Return only the text, without any explanation.";

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AzureOpenAiClient {
    client: Client,
    settings: CompletionSettings,
}

impl AzureOpenAiClient {
    pub fn new(settings: CompletionSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::Completion(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    fn endpoint_url(&self) -> Result<String> {
        let missing = self.settings.missing_keys();
        if !missing.is_empty() {
            return Err(Error::InvalidConfig(format!("missing {}", missing.join(", "))).into());
        }
        let endpoint = self.settings.endpoint.as_deref().unwrap_or_default().trim_end_matches('/');
        let deployment = self.settings.deployment.as_deref().unwrap_or_default();
        Ok(format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint, deployment, self.settings.api_version
        ))
    }

    fn build_request(&self, content: Value) -> Value {
        json!({
            "messages": [{ "role": "user", "content": content }],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
            "n": 1,
        })
    }

    async fn complete(&self, content: Value) -> Result<String> {
        let url = self.endpoint_url()?;
        let api_key = self.settings.api_key.as_deref().unwrap_or_default();
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("api-key", api_key)
            .json(&self.build_request(content))
            .send()
            .await
            .map_err(|e| Error::Completion(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Completion(format!("HTTP {status}: {error_text}")).into());
        }

        let parsed: CompletionResponse = response.json().await.map_err(|e| Error::Completion(e.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Completion("no choices returned".to_string()))?;
        debug!(model = %self.settings.model, chars = text.len(), "completion received");
        Ok(text)
    }
}

/// `data:` URL for a PNG, as accepted in `image_url` content parts.
pub fn png_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", base64::engine::general_purpose::STANDARD.encode(png))
}

#[async_trait]
impl CompletionService for AzureOpenAiClient {
    fn is_ready(&self) -> bool {
        self.settings.missing_keys().is_empty()
    }

    async fn initialize(&self) -> Result<()> {
        let missing = self.settings.missing_keys();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfig(format!("completion service not configured, missing {}", missing.join(", "))).into())
        }
    }

    async fn extract_text(&self, png: &[u8]) -> Result<String> {
        let content = json!([
            { "type": "text", "text": EXTRACTION_PROMPT },
            { "type": "image_url", "image_url": { "url": png_data_url(png) } },
        ]);
        Ok(self.complete(content).await?.trim().to_string())
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.complete(Value::String(prompt.to_string())).await
    }
}
