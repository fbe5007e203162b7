//! Tool providers — external processes exposing schema-described tools.
//!
//! A [`ToolProvider`] knows how to open a [`ProviderConnection`]. Connections
//! are scoped: callers open one per listing or invocation and always close it
//! before moving on.
//!
//! # Supported Transports
//!
//! - **stdio** — subprocess speaking newline-delimited JSON-RPC ([`StdioProvider`])

pub mod stdio;

pub use stdio::{LaunchSpec, StdioProvider};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::Result;

/// A tool as reported by a provider's listing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// One fragment of a tool result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub enum ContentPart {
    Text(String),
    Other(Value),
}

impl From<Value> for ContentPart {
    fn from(value: Value) -> Self {
        match value.get("text").and_then(Value::as_str) {
            Some(text) => ContentPart::Text(text.to_string()),
            None => ContentPart::Other(value),
        }
    }
}

impl ContentPart {
    /// Render as plain text; non-text parts become compact JSON.
    pub fn render(&self) -> String {
        match self {
            ContentPart::Text(text) => text.clone(),
            ContentPart::Other(value) => value.to_string(),
        }
    }
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentPart>,

    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Create a result holding a single text fragment.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::Text(text.into())],
            is_error: false,
        }
    }

    /// Join every content fragment with newlines.
    pub fn render(&self) -> String {
        self.content
            .iter()
            .map(ContentPart::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Provider trait — a source of tools that can be connected to on demand.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Provider id, the prefix of qualified tool ids.
    fn id(&self) -> &str;

    /// Open a fresh connection.
    async fn open(&self) -> Result<Box<dyn ProviderConnection>>;
}

/// A live channel to a provider.
#[async_trait]
pub trait ProviderConnection: Send {
    /// List the provider's tools.
    async fn list_tools(&mut self) -> Result<Vec<ToolSpec>>;

    /// Invoke a tool by its unqualified name.
    ///
    /// A result flagged as an error by the provider is returned as
    /// [`Error::Tool`](crate::Error::Tool).
    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult>;

    /// Release the connection.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Ordered set of providers keyed by id.
#[derive(Default)]
pub struct ProviderSet {
    providers: Vec<Box<dyn ToolProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build stdio providers for every configured entry, in order.
    pub fn from_config(configs: &[ProviderConfig], timeout: std::time::Duration) -> Self {
        let mut set = Self::new();
        for config in configs {
            set.add(StdioProvider::new(&config.name, config.launch_spec(), timeout));
        }
        set
    }

    /// Register a provider, replacing any provider with the same id in place.
    pub fn add<P: ToolProvider + 'static>(&mut self, provider: P) {
        self.add_boxed(Box::new(provider));
    }

    pub fn add_boxed(&mut self, provider: Box<dyn ToolProvider>) {
        match self.providers.iter().position(|p| p.id() == provider.id()) {
            Some(index) => self.providers[index] = provider,
            None => self.providers.push(provider),
        }
    }

    pub fn get(&self, id: &str) -> Option<&dyn ToolProvider> {
        self.providers
            .iter()
            .find(|p| p.id() == id)
            .map(|p| p.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ToolProvider> {
        self.providers.iter().map(|p| p.as_ref())
    }

    pub fn ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Scripted reply for [`FakeProvider`].
#[cfg(test)]
#[derive(Debug, Clone)]
pub enum FakeReply {
    Text(String),
    Result(CallToolResult),
    /// The provider flags the call as an error.
    ToolError(String),
    /// The connection breaks; later calls on the same connection fail too.
    Transport(String),
}

/// Observable state shared between a [`FakeProvider`] and its connections.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FakeState {
    pub opened: std::sync::atomic::AtomicUsize,
    pub closed: std::sync::atomic::AtomicUsize,
    pub calls: std::sync::Mutex<Vec<FakeCall>>,
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub struct FakeCall {
    pub connection: usize,
    pub tool: String,
    pub arguments: Value,
}

#[cfg(test)]
impl FakeState {
    pub fn opened(&self) -> usize {
        self.opened.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap().clone()
    }
}

/// Fake provider for testing.
#[cfg(test)]
pub struct FakeProvider {
    id: String,
    tools: Vec<ToolSpec>,
    replies: std::sync::Arc<
        std::sync::Mutex<std::collections::HashMap<String, std::collections::VecDeque<FakeReply>>>,
    >,
    fail_open: bool,
    state: std::sync::Arc<FakeState>,
}

#[cfg(test)]
impl FakeProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            tools: Vec::new(),
            replies: Default::default(),
            fail_open: false,
            state: Default::default(),
        }
    }

    /// Add a tool whose schema declares the given properties.
    pub fn with_tool(mut self, name: &str, properties: &[&str]) -> Self {
        let props: serde_json::Map<String, Value> = properties
            .iter()
            .map(|p| (p.to_string(), serde_json::json!({"type": "string"})))
            .collect();
        self.tools.push(ToolSpec {
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema: serde_json::json!({"type": "object", "properties": props}),
        });
        self
    }

    /// Queue a reply for the next call of `tool`.
    pub fn reply(self, tool: &str, reply: FakeReply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(tool.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Make every `open` fail as if the process could not be reached.
    pub fn unreachable(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn state(&self) -> std::sync::Arc<FakeState> {
        self.state.clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ToolProvider for FakeProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&self) -> Result<Box<dyn ProviderConnection>> {
        if self.fail_open {
            return Err(crate::Error::Provider(format!("{} is unreachable", self.id)));
        }
        let serial = self
            .state
            .opened
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            serial,
            tools: self.tools.clone(),
            replies: self.replies.clone(),
            state: self.state.clone(),
            broken: false,
        }))
    }
}

#[cfg(test)]
struct FakeConnection {
    serial: usize,
    tools: Vec<ToolSpec>,
    replies: std::sync::Arc<
        std::sync::Mutex<std::collections::HashMap<String, std::collections::VecDeque<FakeReply>>>,
    >,
    state: std::sync::Arc<FakeState>,
    broken: bool,
}

#[cfg(test)]
#[async_trait]
impl ProviderConnection for FakeConnection {
    async fn list_tools(&mut self) -> Result<Vec<ToolSpec>> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        if self.broken {
            return Err(crate::Error::Provider("connection is broken".to_string()));
        }
        self.state.calls.lock().unwrap().push(FakeCall {
            connection: self.serial,
            tool: name.to_string(),
            arguments,
        });
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(|queue| queue.pop_front());
        match reply {
            None => Ok(CallToolResult::text(format!("{name} ok"))),
            Some(FakeReply::Text(text)) => Ok(CallToolResult::text(text)),
            Some(FakeReply::Result(result)) => Ok(result),
            Some(FakeReply::ToolError(message)) => Err(crate::Error::Tool(message)),
            Some(FakeReply::Transport(message)) => {
                self.broken = true;
                Err(crate::Error::Provider(message))
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.state
            .closed
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
