//! Client for one capability server subprocess.
//!
//! A capability server is spawned once and spoken to over newline-delimited
//! JSON-RPC 2.0 on its stdin/stdout: an `initialize` handshake, then
//! `tools/list` and `tools/call`. Tool results arrive as text content blocks
//! plus an `isError` flag. Server stderr is drained to the log.

use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;

const PROTOCOL_VERSION: &str = "2024-11-05";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request timed out")]
    Timeout,
}

/// Result of one tool invocation, as text for the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutcome {
    /// A successful outcome. The model needs a non-empty observation to
    /// continue its turn, so empty text becomes `"Done."`.
    pub fn success(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            text: if text.trim().is_empty() {
                "Done.".to_string()
            } else {
                text
            },
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// A connected capability server process.
pub struct CapabilityClient {
    name: String,
    child: Child,
    stdin: ChildStdin,
    reader: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl CapabilityClient {
    /// Spawn the server process and complete the initialize handshake.
    pub async fn connect(config: &ServerConfig) -> Result<Self, CapabilityError> {
        info!(server = %config.name, command = %config.command, "Starting capability server");

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            CapabilityError::Protocol("child process has no stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            CapabilityError::Protocol("child process has no stdout".to_string())
        })?;
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(config.name.clone(), stderr);
        }

        let mut client = Self {
            name: config.name.clone(),
            child,
            stdin,
            reader: BufReader::new(stdout).lines(),
            next_id: 0,
        };

        tokio::time::timeout(
            CONNECT_TIMEOUT,
            client.request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "majordomo",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            ),
        )
        .await
        .map_err(|_| CapabilityError::Timeout)??;

        client.notify("notifications/initialized", json!({})).await?;

        debug!(server = %client.name, "Capability server initialized");
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the server's tool descriptors.
    pub async fn list_tools(&mut self) -> Result<Vec<openai::Tool>, CapabilityError> {
        let result = tokio::time::timeout(CALL_TIMEOUT, self.request("tools/list", json!({})))
            .await
            .map_err(|_| CapabilityError::Timeout)??;
        parse_descriptors(&result)
    }

    /// Invoke one tool. Protocol failures surface as `Err`; a failure inside
    /// the tool itself comes back as an error-tagged outcome.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolOutcome, CapabilityError> {
        let result = tokio::time::timeout(
            CALL_TIMEOUT,
            self.request("tools/call", json!({"name": name, "arguments": arguments})),
        )
        .await
        .map_err(|_| CapabilityError::Timeout)??;

        let text = join_text_content(&result);
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(if is_error {
            ToolOutcome::error(if text.is_empty() {
                format!("Tool \"{name}\" reported an error")
            } else {
                text
            })
        } else {
            ToolOutcome::success(text)
        })
    }

    /// Kill the server process.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(server = %self.name, error = %e, "Failed to kill capability server");
        }
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, CapabilityError> {
        self.next_id += 1;
        let id = self.next_id;

        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.write_line(&request).await?;

        // Skip notifications and stale responses until ours arrives
        while let Some(line) = self.reader.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let message: Value = match serde_json::from_str(line) {
                Ok(message) => message,
                Err(e) => {
                    warn!(server = %self.name, error = %e, "Discarding unparseable line from capability server");
                    continue;
                }
            };

            if message.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }

            if let Some(error) = message.get("error") {
                let detail = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(CapabilityError::Protocol(format!("{method}: {detail}")));
            }

            return Ok(message.get("result").cloned().unwrap_or(Value::Null));
        }

        Err(CapabilityError::Protocol(format!(
            "{method}: server closed its stdout"
        )))
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<(), CapabilityError> {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_line(&notification).await
    }

    async fn write_line(&mut self, message: &Value) -> Result<(), CapabilityError> {
        let line = serde_json::to_string(message)?;
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

fn drain_stderr(name: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(server = %name, "{line}");
        }
    });
}

fn parse_descriptors(result: &Value) -> Result<Vec<openai::Tool>, CapabilityError> {
    let tools = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| CapabilityError::Protocol("tools/list: missing tools array".to_string()))?;

    let mut descriptors = Vec::new();
    for tool in tools {
        let Some(name) = tool.get("name").and_then(Value::as_str) else {
            continue;
        };
        descriptors.push(openai::Tool {
            name: name.to_string(),
            description: tool
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            parameters: tool
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({"type": "object"})),
        });
    }
    Ok(descriptors)
}

/// Join the text blocks of a tool result with newlines, skipping any
/// non-text content.
fn join_text_content(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|block| {
                    if block.get("type").and_then(Value::as_str) == Some("text") {
                        block.get("text").and_then(Value::as_str)
                    } else {
                        None
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}
