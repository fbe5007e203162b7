//! Completion service abstraction layer.
//!
//! This module provides:
//! - [`CompletionService`] trait for swappable text-completion backends
//! - [`CompletionRequest`] and [`Message`] request types
//! - [`GroqClient`], an OpenAI-compatible chat completions client
//!
//! # Adding a New Backend
//!
//! 1. Create a new file (e.g., `ollama.rs`)
//! 2. Implement `CompletionService`
//! 3. Construct it in `main.rs` instead of `GroqClient`

mod types;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use types::*;

pub mod groq;

pub use groq::GroqClient;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message sent to the completion service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A single completion call: model, prompt and sampling parameters.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Create a request with a system prompt followed by one user message.
    pub fn new(
        model: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::system(system), Message::user(user)],
            temperature: 0.7,
            max_tokens: 1024,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Completion service trait — swappable text generation backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Produce a text completion for the request.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Fake completion service for testing.
///
/// Pops scripted replies in order; `None` entries simulate a service fault.
/// Every request is recorded for later inspection.
#[cfg(test)]
pub struct FakeCompletionService {
    responses: std::sync::Mutex<std::collections::VecDeque<Option<String>>>,
    requests: std::sync::Mutex<Vec<CompletionRequest>>,
}

#[cfg(test)]
impl FakeCompletionService {
    /// Create with predefined text responses.
    pub fn new(responses: Vec<&str>) -> Self {
        Self::scripted(responses.into_iter().map(|s| Some(s.to_string())).collect())
    }

    /// Create with a script where `None` fails the corresponding call.
    pub fn scripted(responses: Vec<Option<String>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl CompletionService for FakeCompletionService {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let mut responses = self.responses.lock().unwrap();
        match responses.pop_front() {
            Some(Some(text)) => Ok(text),
            Some(None) => Err(crate::Error::Completion("scripted failure".to_string())),
            None => Err(crate::Error::Completion(
                "No more fake responses".to_string(),
            )),
        }
    }
}
