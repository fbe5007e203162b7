//! OpenAI-compatible chat completions client (Groq by default).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::error::Error;
use crate::Result;

use super::{ChatResponse, CompletionRequest, CompletionService};

/// Default endpoint base for Groq's OpenAI-compatible API.
pub const GROQ_API_URL: &str = "https://api.groq.com/openai/v1";

/// Chat completions client using bearer-token authentication.
#[derive(Clone)]
pub struct GroqClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl GroqClient {
    /// Create a new client against `base_url` with the given API key.
    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn build_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn parse_response(response: ChatResponse) -> Result<String> {
        if let Some(usage) = &response.usage {
            debug!(
                "Completion usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Completion("No choices in response".to_string()))?;

        debug!("Completion finished: {:?}", choice.finish_reason);

        choice
            .message
            .content
            .ok_or_else(|| Error::Completion("Empty message content".to_string()))
    }
}

#[async_trait]
impl CompletionService for GroqClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        debug!("Calling completion model {} at {}", request.model, self.build_url());

        let response = self
            .client
            .post(self.build_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            return Err(Error::Completion(format!(
                "API error ({status}): {error_text}"
            )));
        }

        let chat_response: ChatResponse = response.json().await?;
        Self::parse_response(chat_response)
    }
}
