mod client;
pub(crate) mod types;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::traits::CompletionAgent;
use client::ClaudeClient;
use types::*;

const MAX_TOKENS: u32 = 4096;

// =============================================================================
// Claude Agent
// =============================================================================

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    model: String,
    http: reqwest::Client,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Reuse an existing connection pool (and its timeouts).
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub(crate) fn client(&self) -> ClaudeClient {
        ClaudeClient::new(&self.api_key, self.http.clone())
    }

    pub async fn chat_completion(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<String> {
        let request = ChatRequest::new(&self.model)
            .system(system)
            .message(WireMessage::user(user))
            .max_tokens(MAX_TOKENS)
            .temperature(0.0);

        let response = self.client().chat(&request).await?;

        response
            .text()
            .ok_or_else(|| anyhow!("No response from Claude"))
    }
}

#[async_trait]
impl CompletionAgent for Claude {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        self.chat_completion(system, prompt).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
