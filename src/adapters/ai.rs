use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;

use super::AiEngine;
use super::prompts;
use crate::analysis::models::CombinedInput;
use crate::config::{AiProvider, AiSettings};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A message in a chat conversation with the model.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// Generates documentation and code reviews through an OpenAI-compatible
/// `/v1/chat/completions` endpoint or the Anthropic `/v1/messages` API.
pub struct AiAnalyzer {
    client: reqwest::Client,
    settings: AiSettings,
}

impl AiAnalyzer {
    pub fn new(settings: &AiSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build AI HTTP client")?;
        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }

    pub fn provider(&self) -> AiProvider {
        self.settings.provider
    }

    pub fn model(&self) -> &str {
        self.settings.model()
    }

    /// Send one system + user exchange and return the model's text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        if !self.settings.is_configured() {
            anyhow::bail!(
                "AI provider '{}' is not configured (set {})",
                self.provider(),
                self.provider().key_var()
            );
        }
        let text = match self.provider() {
            AiProvider::OpenAi => self.complete_openai(system, user).await?,
            AiProvider::Anthropic => self.complete_anthropic(system, user).await?,
        };
        if text.trim().is_empty() {
            anyhow::bail!("AI provider returned an empty response");
        }
        Ok(text)
    }

    async fn complete_openai(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.settings.base_url());
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: system.to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: user.to_string(),
            },
        ];
        let body = serde_json::json!({
            "model": self.model(),
            "messages": messages,
            "temperature": 0.2,
            "max_tokens": self.settings.max_tokens,
        });

        let mut request = self.client.post(&url).json(&body);
        if !self.settings.api_key.is_empty() {
            request = request.bearer_auth(self.settings.api_key.expose());
        }
        let response_body = send(request).await?;

        response_body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Unexpected response structure: {}", response_body))
    }

    async fn complete_anthropic(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/v1/messages", self.settings.base_url());
        let body = serde_json::json!({
            "model": self.model(),
            "max_tokens": self.settings.max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });

        let request = self
            .client
            .post(&url)
            .header("x-api-key", self.settings.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let response_body = send(request).await?;

        let blocks = response_body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| anyhow!("Unexpected response structure: {}", response_body))?;
        Ok(blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""))
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<serde_json::Value> {
    let response = request
        .send()
        .await
        .context("Failed to send request to AI provider")?;
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        anyhow::bail!("AI provider error {}: {}", status, body_text);
    }
    response
        .json()
        .await
        .context("Failed to parse AI provider response")
}

#[async_trait]
impl AiEngine for AiAnalyzer {
    async fn generate_documentation(&self, input: &CombinedInput) -> Result<String> {
        let prompt = prompts::documentation_prompt(input, self.settings.max_input_chars);
        self.complete(prompts::DOCUMENTATION_SYSTEM, &prompt).await
    }

    async fn generate_code_review(&self, input: &CombinedInput) -> Result<String> {
        let prompt = prompts::code_review_prompt(input, self.settings.max_input_chars);
        self.complete(prompts::CODE_REVIEW_SYSTEM, &prompt).await
    }
}
