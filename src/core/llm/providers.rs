use async_trait::async_trait;
use serde_json::json;

use super::generator::TextGenerator;
use crate::config::LlmConfig;
use crate::error::{DigestError, Result};

/// Factory function to create the appropriate text generator based on config
pub fn create_generator(config: &LlmConfig) -> Result<Box<dyn TextGenerator>> {
    if !config.enabled {
        return Err(DigestError::Config("LLM integration is disabled".to_string()));
    }

    match config.provider.as_str() {
        "azure-openai" | "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        _ => Err(DigestError::Config(format!(
            "Unsupported LLM provider: {}",
            config.provider
        ))),
    }
}

/// Chat-completions provider for OpenAI and Azure OpenAI deployments
pub struct OpenAiProvider {
    config: LlmConfig,
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| DigestError::Config("API key required for LLM provider".to_string()))?;

        let endpoint = Self::endpoint_for(config)?;

        Ok(Self {
            config: config.clone(),
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        })
    }

    fn endpoint_for(config: &LlmConfig) -> Result<String> {
        match config.provider.as_str() {
            "azure-openai" => {
                let base = config.base_url.as_deref().ok_or_else(|| {
                    DigestError::Config("Azure OpenAI endpoint not set".to_string())
                })?;
                let deployment = config.deployment.as_deref().ok_or_else(|| {
                    DigestError::Config("Azure OpenAI deployment name not set".to_string())
                })?;
                Ok(format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    base.trim_end_matches('/'),
                    deployment,
                    config.api_version
                ))
            }
            _ => {
                let base = config
                    .base_url
                    .as_deref()
                    .unwrap_or("https://api.openai.com/v1");
                Ok(format!("{}/chat/completions", base.trim_end_matches('/')))
            }
        }
    }

    fn is_azure(&self) -> bool {
        self.config.provider == "azure-openai"
    }
}

/// Pull the first choice's message text out of a chat-completions response
fn extract_content(response: &serde_json::Value) -> Result<String> {
    response["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            DigestError::Generation("Failed to extract content from LLM response".to_string())
        })
}

#[async_trait]
impl TextGenerator for OpenAiProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let mut payload = json!({
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "max_tokens": self.config.max_tokens.unwrap_or(2000),
            "temperature": self.config.temperature.unwrap_or(0.7)
        });

        let request = if self.is_azure() {
            self.client.post(&self.endpoint).header("api-key", &self.api_key)
        } else {
            payload["model"] = json!(self.config.model);
            self.client.post(&self.endpoint).bearer_auth(&self.api_key)
        };

        let response = request
            .json(&payload)
            .send()
            .await
            .map_err(|e| DigestError::Generation(format!("LLM request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DigestError::Generation(format!(
                "LLM API error {}: {}",
                status, error_text
            )));
        }

        let response_data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DigestError::Generation(format!("Failed to parse LLM response: {}", e)))?;

        extract_content(&response_data)
    }

    fn provider_name(&self) -> &str {
        if self.is_azure() {
            "Azure OpenAI"
        } else {
            "OpenAI"
        }
    }

    fn model_name(&self) -> &str {
        self.config
            .deployment
            .as_deref()
            .filter(|_| self.is_azure())
            .unwrap_or(&self.config.model)
    }
}
