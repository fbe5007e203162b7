//! Orchestrator - owns the catalog, history and providers for a session
//!
//! A request flows through plan synthesis, plan execution and response
//! synthesis. Every stage degrades to text instead of failing, so
//! `process_request` always produces an answer.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::{error, info, warn};

use crate::catalog::{ToolCatalog, ToolDescriptor};
use crate::coerce::ArgumentCoercer;
use crate::config::Config;
use crate::error::Error;
use crate::executor::PlanExecutor;
use crate::llm::{CompletionService, GroqClient};
use crate::planner::PlanSynthesizer;
use crate::provider::{ProviderSet, ToolProvider};
use crate::session::{ConversationTurn, SessionHistory};
use crate::synthesis::ResponseSynthesizer;
use crate::Result;

/// Answer given when no actionable plan was produced.
pub const CANNOT_HELP: &str =
    "Sorry, I don't know how to help with that request using the available tools.";

/// Result of connecting to every provider.
#[derive(Debug, Default)]
pub struct ConnectReport {
    /// Provider id and number of tools listed.
    pub connected: Vec<(String, usize)>,
    /// Provider id and error description.
    pub failed: Vec<(String, String)>,
}

/// The orchestration context for one session.
pub struct Orchestrator {
    completion: Box<dyn CompletionService>,
    providers: ProviderSet,
    catalog: ToolCatalog,
    history: SessionHistory,
    planner: PlanSynthesizer,
    executor: PlanExecutor,
    synthesizer: ResponseSynthesizer,
}

impl Orchestrator {
    /// Create an orchestrator; at least one provider must be registered.
    pub fn new(
        config: &Config,
        completion: Box<dyn CompletionService>,
        providers: ProviderSet,
    ) -> Result<Self> {
        if providers.is_empty() {
            return Err(Error::Config("No tool providers registered".to_string()));
        }

        Ok(Self {
            completion,
            providers,
            catalog: ToolCatalog::new(),
            history: SessionHistory::new(),
            planner: PlanSynthesizer::new(
                &config.planner_model,
                config.planner_temperature,
                config.planner_max_tokens,
            ),
            executor: PlanExecutor::new(ArgumentCoercer::with_synonyms(&config.synonyms)),
            synthesizer: ResponseSynthesizer::new(
                &config.synthesis_model,
                config.synthesis_temperature,
                config.synthesis_max_tokens,
                config.result_snippet_chars,
            ),
        })
    }

    /// Validate `config` and wire up the HTTP completion client and stdio providers.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let completion = GroqClient::new(&config.api_key, &config.base_url, config.request_timeout())?;
        let providers = ProviderSet::from_config(&config.providers, config.request_timeout());
        Self::new(config, Box::new(completion), providers)
    }

    /// Register a provider, replacing one with the same id.
    pub fn add_provider<P: ToolProvider + 'static>(&mut self, provider: P) {
        info!("Provider added: {}", provider.id());
        self.providers.add(provider);
    }

    /// List every provider's tools into the catalog, in registration order.
    ///
    /// A provider that cannot be listed is reported and skipped.
    pub async fn connect_providers(&mut self) -> ConnectReport {
        let mut report = ConnectReport::default();
        info!(
            "Connecting {} providers for session {}",
            self.providers.len(),
            self.session_id()
        );

        for provider in self.providers.iter() {
            match self.catalog.refresh(provider).await {
                Ok(count) => {
                    info!("Provider {}: {} tools", provider.id(), count);
                    report.connected.push((provider.id().to_string(), count));
                }
                Err(e) => {
                    warn!("Provider {} could not be listed: {}", provider.id(), e);
                    report.failed.push((provider.id().to_string(), e.to_string()));
                }
            }
        }

        report
    }

    /// Handle one user request and return the answer. Never fails.
    pub async fn process_request(&mut self, request: &str) -> String {
        info!("Processing: {}", request);
        self.history.push_user(request);

        let response = match AssertUnwindSafe(self.run(request)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Request processing failed: {}", message);
                format!("Error processing request: {message}")
            }
        };

        self.history.push_assistant(response.clone());
        response
    }

    async fn run(&self, request: &str) -> String {
        let plan = self
            .planner
            .synthesize(self.completion.as_ref(), request, &self.catalog)
            .await;

        if plan.is_empty() {
            return CANNOT_HELP.to_string();
        }

        let outcomes = self
            .executor
            .execute(&plan.steps, &self.catalog, &self.providers)
            .await;

        self.synthesizer
            .synthesize(self.completion.as_ref(), request, &outcomes)
            .await
    }

    /// Tools currently in the catalog.
    pub fn tools(&self) -> Vec<&ToolDescriptor> {
        self.catalog.iter().collect()
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn history(&self) -> &[ConversationTurn] {
        self.history.turns()
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.history.id()
    }

    /// Forget every listed tool. Connections are scoped, so none are open.
    pub fn disconnect(&mut self) {
        self.catalog.clear();
        info!("Providers disconnected");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected failure".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionRequest, FakeCompletionService, Role};
    use crate::provider::{FakeProvider, FakeReply};
    use async_trait::async_trait;

    const READ_PLAN: &str = r#"{"reasoning":"read the file","plan":[{"tool":"fs:read_file","arguments":{"filename":"a.txt"},"description":"read"}]}"#;

    fn orchestrator(service: FakeCompletionService, providers: Vec<FakeProvider>) -> Orchestrator {
        let mut set = ProviderSet::new();
        for provider in providers {
            set.add(provider);
        }
        Orchestrator::new(&Config::default(), Box::new(service), set).unwrap()
    }

    #[test]
    fn test_requires_providers() {
        let result = Orchestrator::new(
            &Config::default(),
            Box::new(FakeCompletionService::new(vec![])),
            ProviderSet::new(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_config_validates() {
        assert!(matches!(
            Orchestrator::from_config(&Config::default()),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_reports_failures_and_keeps_order() {
        let mut orch = orchestrator(
            FakeCompletionService::new(vec![]),
            vec![
                FakeProvider::new("fs").with_tool("read_file", &["path"]),
                FakeProvider::new("down").unreachable(),
                FakeProvider::new("web").with_tool("search", &["query"]),
            ],
        );

        let report = orch.connect_providers().await;

        assert_eq!(
            report.connected,
            vec![("fs".to_string(), 1), ("web".to_string(), 1)]
        );
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "down");
        let ids: Vec<String> = orch.tools().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec!["fs:read_file", "web:search"]);
    }

    #[tokio::test]
    async fn test_end_to_end_read_file() {
        let provider = FakeProvider::new("fs")
            .with_tool("read_file", &["path"])
            .reply("read_file", FakeReply::Text("hello".to_string()));
        let state = provider.state();
        let service = FakeCompletionService::new(vec![READ_PLAN, "Your file says hello."]);
        let mut orch = orchestrator(service, vec![provider]);
        orch.connect_providers().await;

        let answer = orch.process_request("What is in a.txt?").await;

        assert!(!answer.is_empty());
        assert!(!answer.contains("fs:read_file"));
        assert_eq!(answer, "Your file says hello.");

        let calls = state.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, serde_json::json!({"path": "a.txt"}));

        let history = orch.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "What is in a.txt?");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, answer);
    }

    #[tokio::test]
    async fn test_synthesis_prompt_sees_outcome() {
        let provider = FakeProvider::new("fs")
            .with_tool("read_file", &["path"])
            .reply("read_file", FakeReply::Text("hello".to_string()));
        let service = std::sync::Arc::new(FakeCompletionService::new(vec![READ_PLAN, "It says hello."]));

        struct Shared(std::sync::Arc<FakeCompletionService>);

        #[async_trait]
        impl CompletionService for Shared {
            async fn complete(&self, request: &CompletionRequest) -> Result<String> {
                self.0.complete(request).await
            }
        }

        let mut set = ProviderSet::new();
        set.add(provider);
        let config = Config::default();
        let mut orch = Orchestrator::new(&config, Box::new(Shared(service.clone())), set).unwrap();
        orch.connect_providers().await;
        orch.process_request("read a.txt").await;

        let requests = service.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].model, config.planner_model);
        assert_eq!(requests[1].model, config.synthesis_model);
        let synthesis_prompt = &requests[1].messages[0].content;
        assert!(synthesis_prompt.contains("Tool: fs:read_file"));
        assert!(synthesis_prompt.contains("Result: hello"));
    }

    #[tokio::test]
    async fn test_empty_plan_returns_cannot_help() {
        let provider = FakeProvider::new("fs").with_tool("read_file", &["path"]);
        let state = provider.state();
        let service = FakeCompletionService::new(vec![r#"{"reasoning":"r","plan":[]}"#]);
        let mut orch = orchestrator(service, vec![provider]);
        orch.connect_providers().await;
        let opened_after_listing = state.opened();

        let answer = orch.process_request("make me a sandwich").await;

        assert_eq!(answer, CANNOT_HELP);
        assert!(state.calls().is_empty());
        assert_eq!(state.opened(), opened_after_listing);
        assert_eq!(orch.history().len(), 2);
    }

    #[tokio::test]
    async fn test_transport_fault_still_answers() {
        let plan = r#"{"plan":[
            {"tool":"fs:write_file","arguments":{"path":"a.txt","content":"x"},"description":"write"},
            {"tool":"web:search","arguments":{"search":"rust"},"description":"search"}
        ]}"#;
        let fs = FakeProvider::new("fs")
            .with_tool("write_file", &["path", "content"])
            .reply("write_file", FakeReply::Transport("provider crashed".to_string()));
        let web = FakeProvider::new("web")
            .with_tool("search", &["query"])
            .reply("search", FakeReply::Text("Rust is a language".to_string()));
        let fs_state = fs.state();
        let web_state = web.state();
        let service = FakeCompletionService::new(vec![plan, "Writing failed, but Rust is a language."]);
        let mut orch = orchestrator(service, vec![fs, web]);
        orch.connect_providers().await;

        let answer = orch.process_request("write a.txt then search rust").await;

        assert!(!answer.is_empty());
        assert_eq!(fs_state.opened(), fs_state.closed());
        let web_calls = web_state.calls();
        assert_eq!(web_calls.len(), 1);
        assert_eq!(web_calls[0].arguments, serde_json::json!({"query": "rust"}));
    }

    #[tokio::test]
    async fn test_synthesis_failure_returns_apology() {
        let provider = FakeProvider::new("fs").with_tool("read_file", &["path"]);
        let service = FakeCompletionService::scripted(vec![Some(READ_PLAN.to_string()), None]);
        let mut orch = orchestrator(service, vec![provider]);
        orch.connect_providers().await;

        let answer = orch.process_request("read a.txt").await;
        assert_eq!(answer, crate::synthesis::APOLOGY);
    }

    #[tokio::test]
    async fn test_panic_is_recorded_in_history() {
        struct Exploding;

        #[async_trait]
        impl CompletionService for Exploding {
            async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
                panic!("completion backend exploded");
            }
        }

        let mut set = ProviderSet::new();
        set.add(FakeProvider::new("fs"));
        let mut orch = Orchestrator::new(&Config::default(), Box::new(Exploding), set).unwrap();

        let answer = orch.process_request("anything").await;
        assert!(answer.starts_with("Error processing request:"));
        assert!(answer.contains("exploded"));
        assert_eq!(orch.history().len(), 2);
        assert_eq!(orch.history()[1].content, answer);

        let again = orch.process_request("still alive?").await;
        assert!(again.starts_with("Error processing request:"));
        assert_eq!(orch.history().len(), 4);
    }

    #[tokio::test]
    async fn test_add_provider_and_disconnect() {
        let mut orch = orchestrator(
            FakeCompletionService::new(vec![]),
            vec![FakeProvider::new("fs").with_tool("read_file", &["path"])],
        );
        orch.add_provider(FakeProvider::new("fs").with_tool("list_dir", &["path"]));
        orch.connect_providers().await;

        assert!(orch.catalog().lookup("fs:list_dir").is_some());
        assert!(orch.catalog().lookup("fs:read_file").is_none());

        orch.disconnect();
        assert!(orch.tools().is_empty());
    }
}
