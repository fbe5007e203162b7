//! Response synthesis — phrase step outcomes as one conversational answer.

use tracing::{debug, warn};

use crate::executor::ExecutionOutcome;
use crate::llm::{CompletionRequest, CompletionService};

/// Returned when the answer cannot be produced.
pub const APOLOGY: &str = "Sorry, something went wrong while processing your request.";

/// Builds the final answer with the fast model.
#[derive(Debug, Clone)]
pub struct ResponseSynthesizer {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Characters of each result included in the prompt.
    pub snippet_chars: usize,
}

impl ResponseSynthesizer {
    pub fn new(model: &str, temperature: f32, max_tokens: u32, snippet_chars: usize) -> Self {
        Self {
            model: model.to_string(),
            temperature,
            max_tokens,
            snippet_chars,
        }
    }

    /// Summarize `outcomes` for `request`. Falls back to [`APOLOGY`] when the
    /// completion service fails or returns nothing.
    pub async fn synthesize(
        &self,
        completion: &dyn CompletionService,
        request: &str,
        outcomes: &[ExecutionOutcome],
    ) -> String {
        let prompt = CompletionRequest::new(
            &self.model,
            self.build_system_prompt(request, outcomes),
            "Write the answer based on the results above.",
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        match completion.complete(&prompt).await {
            Ok(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
            Ok(_) => {
                warn!("Synthesis returned an empty answer");
                APOLOGY.to_string()
            }
            Err(e) => {
                warn!("Synthesis failed: {}", e);
                APOLOGY.to_string()
            }
        }
    }

    fn build_system_prompt(&self, request: &str, outcomes: &[ExecutionOutcome]) -> String {
        let results = outcomes
            .iter()
            .map(|o| {
                format!(
                    "Tool: {}\nResult: {}\n",
                    o.tool_id,
                    snippet(&o.result_text, self.snippet_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        debug!("Synthesizing from {} results", outcomes.len());

        format!(
            "You are an assistant that writes answers from the results of executed tools.\n\n\
             Original request: {request}\n\n\
             Results:\n{results}\n\
             Write a clear, helpful answer for the user based on these results. \
             Be natural and conversational. Do not mention tools, providers or other \
             technical details of how the results were obtained."
        )
    }
}

/// First `max_chars` characters of `text`, with an ellipsis when cut.
fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FakeCompletionService;

    fn outcome(tool: &str, text: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            tool_id: tool.to_string(),
            description: String::new(),
            result_text: text.to_string(),
            succeeded: true,
        }
    }

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        assert_eq!(snippet("short", 500), "short");
        assert_eq!(snippet("ééééé", 3), "ééé...");
        assert_eq!(snippet("abc", 3), "abc");
    }

    #[tokio::test]
    async fn test_prompt_contains_request_and_snippets() {
        let service = FakeCompletionService::new(vec!["The file says hello."]);
        let synthesizer = ResponseSynthesizer::new("fast", 0.7, 1024, 5);

        let answer = synthesizer
            .synthesize(&service, "what is in a.txt?", &[outcome("fs:read_file", "hello world")])
            .await;
        assert_eq!(answer, "The file says hello.");

        let requests = service.requests();
        assert_eq!(requests[0].model, "fast");
        assert_eq!(requests[0].max_tokens, 1024);
        let system = &requests[0].messages[0].content;
        assert!(system.contains("what is in a.txt?"));
        assert!(system.contains("Tool: fs:read_file"));
        assert!(system.contains("Result: hello..."));
        assert!(!system.contains("hello world"));
    }

    #[tokio::test]
    async fn test_failure_returns_apology() {
        let service = FakeCompletionService::scripted(vec![None]);
        let synthesizer = ResponseSynthesizer::new("fast", 0.7, 1024, 500);

        let answer = synthesizer.synthesize(&service, "hi", &[]).await;
        assert_eq!(answer, APOLOGY);
    }

    #[tokio::test]
    async fn test_blank_answer_returns_apology() {
        let service = FakeCompletionService::new(vec!["   \n"]);
        let synthesizer = ResponseSynthesizer::new("fast", 0.7, 1024, 500);

        assert_eq!(synthesizer.synthesize(&service, "hi", &[]).await, APOLOGY);
    }
}
