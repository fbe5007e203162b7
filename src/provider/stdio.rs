//! Stdio transport — tool providers launched as subprocesses.
//!
//! The provider speaks JSON-RPC 2.0 over its stdin/stdout, one message per
//! line. A connection performs the `initialize` handshake on open, then
//! serves `tools/list` and `tools/call` requests.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::Error;
use crate::Result;

use super::{CallToolResult, ProviderConnection, ToolProvider, ToolSpec};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// How long `close` waits for the process to exit on its own.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND: i64 = -32601;

/// Launch specification for a provider subprocess.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Provider launched as a subprocess per connection.
pub struct StdioProvider {
    id: String,
    launch: LaunchSpec,
    timeout: Duration,
}

impl StdioProvider {
    pub fn new(id: &str, launch: LaunchSpec, timeout: Duration) -> Self {
        Self {
            id: id.to_string(),
            launch,
            timeout,
        }
    }

    fn spawn(&self) -> Result<Child> {
        Command::new(&self.launch.command)
            .args(&self.launch.args)
            .envs(&self.launch.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Provider(format!(
                    "failed to start {} ({}): {}",
                    self.id, self.launch.command, e
                ))
            })
    }
}

#[async_trait]
impl ToolProvider for StdioProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&self) -> Result<Box<dyn ProviderConnection>> {
        Ok(Box::new(self.connect().await?))
    }
}

impl StdioProvider {
    /// Spawn the process and run the handshake.
    async fn connect(&self) -> Result<StdioConnection> {
        let mut child = self.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Provider(format!("{}: stdin unavailable", self.id)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Provider(format!("{}: stdout unavailable", self.id)))?;

        let mut rpc = RpcChannel::new(BufReader::new(stdout), stdin, self.timeout);
        if let Err(e) = rpc.initialize().await {
            let _ = child.kill().await;
            return Err(e);
        }

        debug!("Connected to provider {}", self.id);

        Ok(StdioConnection {
            id: self.id.clone(),
            child,
            rpc: Some(rpc),
        })
    }
}

/// A running provider process and its JSON-RPC channel.
pub struct StdioConnection {
    id: String,
    child: Child,
    rpc: Option<RpcChannel<BufReader<ChildStdout>, ChildStdin>>,
}

impl StdioConnection {
    fn rpc(&mut self) -> Result<&mut RpcChannel<BufReader<ChildStdout>, ChildStdin>> {
        self.rpc
            .as_mut()
            .ok_or_else(|| Error::Provider(format!("{}: connection closed", self.id)))
    }
}

#[async_trait]
impl ProviderConnection for StdioConnection {
    async fn list_tools(&mut self) -> Result<Vec<ToolSpec>> {
        self.rpc()?.list_tools().await
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.rpc()?.call_tool(name, arguments).await
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        // Closing stdin tells the server to shut down.
        drop(self.rpc.take());

        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Provider {} exited: {}", self.id, status),
            Ok(Err(e)) => warn!("Waiting for provider {} failed: {}", self.id, e),
            Err(_) => {
                debug!("Provider {} did not exit, killing", self.id);
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<ToolSpec>,
    #[serde(rename = "nextCursor")]
    next_cursor: Option<String>,
}

/// Newline-delimited JSON-RPC 2.0 client over any async byte stream pair.
pub(crate) struct RpcChannel<R, W> {
    reader: R,
    writer: W,
    next_id: u64,
    timeout: Duration,
}

impl<R, W> RpcChannel<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(reader: R, writer: W, timeout: Duration) -> Self {
        Self {
            reader,
            writer,
            next_id: 1,
            timeout,
        }
    }

    /// Perform the initialize handshake.
    pub(crate) async fn initialize(&mut self) -> Result<()> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            )
            .await?;

        let server = result.get("serverInfo").cloned().unwrap_or_default();
        debug!("Provider initialized: {}", server);

        self.notify("notifications/initialized", json!({})).await
    }

    /// List every tool, following pagination cursors.
    pub(crate) async fn list_tools(&mut self) -> Result<Vec<ToolSpec>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let page: ListToolsResult =
                serde_json::from_value(self.request("tools/list", params).await?)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen.insert(next.clone()) {
                        return Err(Error::Protocol(format!(
                            "tools/list repeated cursor {next:?}"
                        )));
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Call a tool; a result flagged `isError` becomes [`Error::Tool`].
    pub(crate) async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let value = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        let result: CallToolResult = serde_json::from_value(value)?;

        if result.is_error {
            return Err(Error::Tool(result.render()));
        }
        Ok(result)
    }

    /// Send a request and wait for its response, both within the timeout.
    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        let timeout = self.timeout;
        let exchange = async {
            self.send(&message).await?;
            self.await_response(id).await
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| Error::Timeout(format!("{method} after {}ms", timeout.as_millis())))?
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        let timeout = self.timeout;

        tokio::time::timeout(timeout, self.send(&message))
            .await
            .map_err(|_| Error::Timeout(format!("{method} after {}ms", timeout.as_millis())))?
    }

    async fn send(&mut self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn await_response(&mut self, id: u64) -> Result<Value> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(Error::Provider("provider closed the connection".to_string()));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Skipping non-JSON provider output: {}", e);
                    continue;
                }
            };

            if let Some(method) = message.get("method").and_then(Value::as_str) {
                match message.get("id") {
                    Some(request_id) => {
                        debug!("Rejecting provider request: {}", method);
                        self.send(&json!({
                            "jsonrpc": "2.0",
                            "id": request_id,
                            "error": {"code": METHOD_NOT_FOUND, "message": "method not supported"}
                        }))
                        .await?;
                    }
                    None => debug!("Provider notification: {}", method),
                }
                continue;
            }

            if message.get("id").and_then(Value::as_u64) != Some(id) {
                debug!("Skipping response for unexpected id: {:?}", message.get("id"));
                continue;
            }

            if let Some(error) = message.get("error") {
                let text = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
                return Err(Error::Protocol(format!("{text} (code {code})")));
            }

            return Ok(message.get("result").cloned().unwrap_or(Value::Null));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};

    type Channel = RpcChannel<BufReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>>;

    /// Spawn a scripted server; `respond` maps each request to zero or more lines.
    fn scripted_server<F>(respond: F) -> Channel
    where
        F: Fn(&Value) -> Vec<Value> + Send + 'static,
    {
        let (client, server) = duplex(64 * 1024);
        let (server_read, mut server_write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                for reply in respond(&request) {
                    let mut out = serde_json::to_vec(&reply).unwrap();
                    out.push(b'\n');
                    if server_write.write_all(&out).await.is_err() {
                        return;
                    }
                }
            }
        });

        let (read, write) = tokio::io::split(client);
        RpcChannel::new(BufReader::new(read), write, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_initialize_and_list_tools_with_pagination() {
        let mut rpc = scripted_server(|req| {
            let id = req.get("id").cloned();
            match req["method"].as_str().unwrap() {
                "initialize" => vec![json!({
                    "jsonrpc": "2.0", "id": id,
                    "result": {"protocolVersion": PROTOCOL_VERSION, "serverInfo": {"name": "fake"}}
                })],
                "notifications/initialized" => vec![],
                "tools/list" if req["params"].get("cursor").is_none() => vec![
                    json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}}),
                    json!({
                        "jsonrpc": "2.0", "id": id,
                        "result": {"tools": [{"name": "read_file", "inputSchema": {"type": "object"}}], "nextCursor": "p2"}
                    }),
                ],
                "tools/list" => vec![json!({
                    "jsonrpc": "2.0", "id": id,
                    "result": {"tools": [{"name": "write_file", "description": "Write"}]}
                })],
                _ => vec![],
            }
        });

        rpc.initialize().await.unwrap();
        let tools = rpc.list_tools().await.unwrap();

        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["read_file", "write_file"]);
    }

    #[tokio::test]
    async fn test_call_tool_skips_stale_ids_and_joins_text() {
        let mut rpc = scripted_server(|req| {
            let id = req["id"].as_u64().unwrap();
            vec![
                json!({"jsonrpc": "2.0", "id": id + 100, "result": {}}),
                json!({
                    "jsonrpc": "2.0", "id": id,
                    "result": {"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}
                }),
            ]
        });

        let result = rpc.call_tool("echo", json!({"x": 1})).await.unwrap();
        assert_eq!(result.render(), "a\nb");
    }

    #[tokio::test]
    async fn test_call_tool_error_flag_becomes_tool_error() {
        let mut rpc = scripted_server(|req| {
            vec![json!({
                "jsonrpc": "2.0", "id": req["id"],
                "result": {"content": [{"type": "text", "text": "path outside allowed directories"}], "isError": true}
            })]
        });

        let err = rpc.call_tool("read_file", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Tool(ref m) if m.contains("outside allowed")));
    }

    #[tokio::test]
    async fn test_jsonrpc_error_becomes_protocol_error() {
        let mut rpc = scripted_server(|req| {
            vec![json!({
                "jsonrpc": "2.0", "id": req["id"],
                "error": {"code": -32602, "message": "Invalid params"}
            })]
        });

        let err = rpc.call_tool("read_file", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m.contains("Invalid params")));
    }

    #[tokio::test]
    async fn test_server_request_is_answered() {
        let mut rpc = scripted_server(|req| {
            if req.get("method").is_none() {
                // Our rejection of the server's request.
                assert_eq!(req["error"]["code"], json!(METHOD_NOT_FOUND));
                return vec![json!({
                    "jsonrpc": "2.0", "id": 1,
                    "result": {"content": [{"type": "text", "text": "done"}]}
                })];
            }
            vec![json!({"jsonrpc": "2.0", "id": "srv-1", "method": "roots/list"})]
        });

        let result = rpc.call_tool("list", json!({})).await.unwrap();
        assert_eq!(result.render(), "done");
    }

    #[tokio::test]
    async fn test_closed_stream_is_provider_error() {
        let (client, server) = duplex(1024);
        drop(server);
        let (read, write) = tokio::io::split(client);
        let mut rpc = RpcChannel::new(BufReader::new(read), write, Duration::from_secs(1));

        assert!(rpc.list_tools().await.is_err());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (client, _server) = duplex(1024);
        let (read, write) = tokio::io::split(client);
        let mut rpc = RpcChannel::new(BufReader::new(read), write, Duration::from_millis(50));

        let err = rpc.list_tools().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_repeated_cursor_is_protocol_error() {
        let mut rpc = scripted_server(|req| {
            vec![json!({
                "jsonrpc": "2.0", "id": req["id"],
                "result": {"tools": [], "nextCursor": "same"}
            })]
        });

        let listed = tokio::time::timeout(Duration::from_secs(2), rpc.list_tools())
            .await
            .expect("pagination should stop");
        assert!(matches!(listed, Err(Error::Protocol(ref m)) if m.contains("same")));
    }

    #[tokio::test]
    async fn test_blocked_writer_times_out() {
        // The peer never reads, so the request cannot fit in the buffer.
        let (client, _server) = duplex(8);
        let (read, write) = tokio::io::split(client);
        let mut rpc = RpcChannel::new(BufReader::new(read), write, Duration::from_millis(50));

        let listed = tokio::time::timeout(Duration::from_secs(2), rpc.list_tools())
            .await
            .expect("request timeout should fire first");
        assert!(matches!(listed, Err(Error::Timeout(_))));
    }

    #[cfg(unix)]
    fn shell_provider(script: &str) -> StdioProvider {
        StdioProvider::new(
            "sh",
            LaunchSpec {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                ..Default::default()
            },
            Duration::from_secs(5),
        )
    }

    #[cfg(unix)]
    fn is_running(pid: u32) -> bool {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(unix)]
    const INIT_REPLY: &str =
        r#"read line; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"serverInfo":{"name":"sh"}}}'; "#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_lists_tools_and_exits_on_close() {
        // Handshake, skip the initialized notification, answer tools/list, then run until EOF.
        let script = format!(
            "{INIT_REPLY}read line; read line; \
             printf '%s\\n' '{{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{{\"tools\":[{{\"name\":\"echo\"}}]}}}}'; \
             while read line; do :; done"
        );
        let provider = shell_provider(&script);

        let mut connection = provider.connect().await.unwrap();
        let pid = connection.child.id().unwrap();

        let tools = connection.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        Box::new(connection).close().await.unwrap();
        assert!(!is_running(pid));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_kills_process_that_ignores_eof() {
        let script = format!("{INIT_REPLY}while :; do sleep 1; done");
        let provider = shell_provider(&script);

        let connection = provider.connect().await.unwrap();
        let pid = connection.child.id().unwrap();

        tokio::time::timeout(EXIT_GRACE * 3, Box::new(connection).close())
            .await
            .expect("close should not hang")
            .unwrap();
        assert!(!is_running(pid));
    }

    #[tokio::test]
    async fn test_missing_command_fails_to_open() {
        let provider = StdioProvider::new(
            "ghost",
            LaunchSpec {
                command: "orchestra-test-no-such-binary".to_string(),
                ..Default::default()
            },
            Duration::from_secs(1),
        );

        let err = provider.open().await.err().unwrap();
        assert!(matches!(err, Error::Provider(ref m) if m.contains("ghost")));
    }
}
