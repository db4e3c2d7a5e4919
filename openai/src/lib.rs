//! Minimal OpenAI-compatible Chat Completions client.
//!
//! This crate provides a focused client for the Chat Completions API with:
//! - Non-streaming and streaming requests
//! - Tool (function) calling support
//! - Proper SSE parsing for streaming responses
//!
//! The base URL is configurable, so the client works against api.openai.com
//! or any compatible backend.

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

/// Errors that can occur when using the client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Chat Completions API client.
#[derive(Clone)]
pub struct OpenAi {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAi {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create a client from the OPENAI_API_KEY environment variable.
    ///
    /// OPENAI_BASE_URL, when set, overrides the default endpoint.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| Error::NoApiKey)?;
        let mut client = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            client = client.with_base_url(base_url);
        }
        Ok(client)
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different API endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Send a completion request and return the full response.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let api_request = self.build_api_request(&request, false);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        parse_response(api_response)
    }

    /// Send a completion request and stream the response.
    pub async fn stream(
        &self,
        request: Request,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>, Error> {
        let api_request = self.build_api_request(&request, true);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        // Use scan to maintain a buffer for incomplete SSE events across chunks
        let stream = response
            .bytes_stream()
            .scan(String::new(), |buffer, result| {
                let events = match result {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        parse_sse_events_buffered(buffer)
                    }
                    Err(e) => vec![Err(Error::Network(e.to_string()))],
                };
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }

    fn build_api_request(&self, request: &Request, stream: bool) -> ApiRequest {
        let messages: Vec<ApiMessage> = request.messages.iter().map(|m| m.into()).collect();

        let tools: Option<Vec<ApiTool>> = request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| ApiTool {
                    r#type: "function".to_string(),
                    function: ApiFunctionDef {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect()
        });

        ApiRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools,
            tool_choice: request.tool_choice.map(|tc| {
                match tc {
                    ToolChoice::Auto => "auto",
                    ToolChoice::None => "none",
                    ToolChoice::Required => "required",
                }
                .to_string()
            }),
            stream,
        }
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A chat completion request.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub max_tokens: Option<usize>,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<ToolChoice>,
}

impl Request {
    /// Create a new request with the given messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            max_tokens: None,
            messages,
            temperature: None,
            tools: None,
            tool_choice: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }
}

/// A message in the conversation.
///
/// A `Tool` message answers one tool call from the preceding assistant
/// message and must carry its `tool_call_id`.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            content: text.into(),
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: text.into(),
        }
    }

    /// Create a plain-text assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Create a tool result message answering the given call.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON-encoded arguments, exactly as the model emitted them.
    pub arguments: String,
}

impl ToolCall {
    /// Parse the arguments into a JSON value. Empty arguments parse as `{}`.
    pub fn arguments_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            Ok(serde_json::Value::Object(serde_json::Map::new()))
        } else {
            serde_json::from_str(&self.arguments)
        }
    }
}

/// A tool definition offered to the model.
#[derive(Debug, Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

/// Tool choice configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
}

/// A completion response.
#[derive(Debug, Clone)]
pub struct Response {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

impl Response {
    /// The assistant text, or the empty string if there is none.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// Token usage information.
#[derive(Debug, Clone)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

// ============================================================================
// Streaming types
// ============================================================================

/// Events from a streaming response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A fragment of assistant text.
    ContentDelta { text: String },
    /// A fragment of a tool call, keyed by its position in the call list.
    ///
    /// The first fragment for an index carries the id and usually the full
    /// name; later fragments append to the arguments.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// The choice finished with the given reason.
    Finished { reason: FinishReason },
    /// End of stream (the `[DONE]` marker).
    Done,
}

/// Reassembles complete tool calls from streaming deltas.
///
/// Deltas must be complete before a call can be dispatched, so streaming
/// consumers feed every `ToolCallDelta` in here and take the finished calls
/// once the stream ends.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    partial: BTreeMap<usize, PartialCall>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta into the accumulator.
    ///
    /// An id replaces any previous id for the index; name and argument
    /// fragments are appended.
    pub fn push(&mut self, index: usize, id: Option<String>, name: Option<String>, arguments: &str) {
        let entry = self.partial.entry(index).or_default();
        if let Some(id) = id {
            entry.id = id;
        }
        if let Some(name) = name {
            entry.name.push_str(&name);
        }
        entry.arguments.push_str(arguments);
    }

    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }

    /// Consume the accumulator, returning complete calls in index order.
    pub fn finish(self) -> Vec<ToolCall> {
        self.partial
            .into_values()
            .map(|p| ToolCall {
                id: p.id,
                name: p.name,
                arguments: p.arguments,
            })
            .collect()
    }
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl From<&Message> for ApiMessage {
    fn from(message: &Message) -> Self {
        match message {
            Message::System { content } => ApiMessage {
                role: "system".to_string(),
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            Message::User { content } => ApiMessage {
                role: "user".to_string(),
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            Message::Assistant {
                content,
                tool_calls,
            } => ApiMessage {
                role: "assistant".to_string(),
                content: content.clone(),
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls.iter().map(|c| c.into()).collect())
                },
                tool_call_id: None,
                name: None,
            },
            Message::Tool {
                tool_call_id,
                name,
                content,
            } => ApiMessage {
                role: "tool".to_string(),
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
                name: Some(name.clone()),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunctionCall,
}

impl From<&ToolCall> for ApiToolCall {
    fn from(call: &ToolCall) -> Self {
        ApiToolCall {
            id: call.id.clone(),
            r#type: "function".to_string(),
            function: ApiFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

impl From<ApiToolCall> for ToolCall {
    fn from(call: ApiToolCall) -> Self {
        ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    r#type: String,
    function: ApiFunctionDef,
}

#[derive(Debug, Serialize)]
struct ApiFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

// Streaming types
#[derive(Debug, Deserialize)]
struct ApiStreamChunk {
    #[serde(default)]
    choices: Vec<ApiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamChoice {
    #[serde(default)]
    delta: ApiStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiStreamToolCall>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ApiStreamFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiStreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

fn parse_response(api_response: ApiResponse) -> Result<Response, Error> {
    let usage = Usage {
        prompt_tokens: api_response.usage.prompt_tokens,
        completion_tokens: api_response.usage.completion_tokens,
    };

    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Parse("response contained no choices".to_string()))?;

    let finish_reason = choice
        .finish_reason
        .as_deref()
        .map(parse_finish_reason)
        .unwrap_or(FinishReason::Stop);

    Ok(Response {
        content: choice.message.content,
        tool_calls: choice.message.tool_calls.into_iter().map(|c| c.into()).collect(),
        finish_reason,
        usage,
    })
}

fn parse_finish_reason(s: &str) -> FinishReason {
    match s {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

/// Parse SSE events from a buffer, consuming complete events and leaving incomplete data.
///
/// SSE lines arrive as `data: {json}` with a final `data: [DONE]`. This
/// function parses complete lines and removes them from the buffer, leaving
/// any incomplete line for the next chunk.
fn parse_sse_events_buffered(buffer: &mut String) -> Vec<Result<StreamEvent, Error>> {
    let mut events = Vec::new();

    loop {
        // Find the next complete line (ending with \n)
        let Some(newline_pos) = buffer.find('\n') else {
            // No complete line yet, wait for more data
            break;
        };

        let line = &buffer[..newline_pos];

        // Check if this is a data line
        if let Some(json_str) = line.strip_prefix("data: ") {
            if json_str.trim() == "[DONE]" {
                events.push(Ok(StreamEvent::Done));
            } else if !json_str.is_empty() {
                match serde_json::from_str::<ApiStreamChunk>(json_str) {
                    Ok(chunk) => {
                        events.extend(convert_stream_chunk(chunk).into_iter().map(Ok));
                    }
                    Err(e) => {
                        // Incomplete JSON at a chunk boundary: don't consume
                        // the line, wait for more data
                        if e.is_eof() {
                            break;
                        }
                        events.push(Err(Error::Parse(format!("SSE parse error: {e}"))));
                    }
                }
            }
        }
        // Skip comments, empty lines, and other SSE metadata

        // Consume the processed line (including the newline)
        buffer.drain(..=newline_pos);
    }

    events
}

fn convert_stream_chunk(chunk: ApiStreamChunk) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    for choice in chunk.choices {
        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                events.push(StreamEvent::ContentDelta { text });
            }
        }

        for call in choice.delta.tool_calls {
            let (name, arguments) = match call.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            events.push(StreamEvent::ToolCallDelta {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }

        if let Some(reason) = choice.finish_reason {
            events.push(StreamEvent::Finished {
                reason: parse_finish_reason(&reason),
            });
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OpenAi::new("test-key");
        assert_eq!(client.model, DEFAULT_MODEL);
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_client_with_model() {
        let client = OpenAi::new("test-key").with_model("gpt-4o-mini");
        assert_eq!(client.model, "gpt-4o-mini");
    }

    #[test]
    fn test_client_with_base_url_trims_slash() {
        let client = OpenAi::new("test-key").with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_request_builder() {
        let request = Request::new(vec![Message::user("Hello")])
            .with_model("gpt-4o")
            .with_max_tokens(1000)
            .with_temperature(0.7)
            .with_tool_choice(ToolChoice::Auto);

        assert_eq!(request.max_tokens, Some(1000));
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.tool_choice, Some(ToolChoice::Auto));
    }

    #[test]
    fn test_message_constructors() {
        let user = Message::user("Hello");
        assert!(matches!(user, Message::User { .. }));

        let assistant = Message::assistant("Hi there");
        match assistant {
            Message::Assistant {
                content,
                tool_calls,
            } => {
                assert_eq!(content.as_deref(), Some("Hi there"));
                assert!(tool_calls.is_empty());
            }
            _ => panic!("Expected assistant message"),
        }

        let tool = Message::tool_result("call_1", "get_weather", "Sunny");
        match tool {
            Message::Tool {
                tool_call_id, name, ..
            } => {
                assert_eq!(tool_call_id, "call_1");
                assert_eq!(name, "get_weather");
            }
            _ => panic!("Expected tool message"),
        }
    }

    #[test]
    fn test_tool_call_arguments_json() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "set_light".to_string(),
            arguments: r#"{"room":"kitchen","on":true}"#.to_string(),
        };
        let args = call.arguments_json().unwrap();
        assert_eq!(args["room"], "kitchen");
        assert_eq!(args["on"], true);

        let empty = ToolCall {
            id: "call_2".to_string(),
            name: "noop".to_string(),
            arguments: String::new(),
        };
        assert!(empty.arguments_json().unwrap().is_object());
    }

    #[test]
    fn test_api_message_conversion() {
        let assistant = Message::Assistant {
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: "set_light".to_string(),
                arguments: "{}".to_string(),
            }],
        };
        let api: ApiMessage = (&assistant).into();
        assert_eq!(api.role, "assistant");
        assert!(api.content.is_none());
        assert_eq!(api.tool_calls.as_ref().unwrap().len(), 1);
        assert_eq!(api.tool_calls.as_ref().unwrap()[0].r#type, "function");

        let tool = Message::tool_result("call_1", "set_light", "Done.");
        let api: ApiMessage = (&tool).into();
        assert_eq!(api.role, "tool");
        assert_eq!(api.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(api.name.as_deref(), Some("set_light"));
    }

    #[test]
    fn test_build_api_request_serialization() {
        let client = OpenAi::new("test-key");
        let request = Request::new(vec![Message::user("hi")])
            .with_tools(vec![Tool {
                name: "set_light".to_string(),
                description: "Turn a light on or off".to_string(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }])
            .with_tool_choice(ToolChoice::Auto);

        let api = client.build_api_request(&request, true);
        let value = serde_json::to_value(&api).unwrap();

        assert_eq!(value["model"], DEFAULT_MODEL);
        assert_eq!(value["stream"], true);
        assert_eq!(value["tool_choice"], "auto");
        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tools"][0]["function"]["name"], "set_light");
        // Unset options are omitted entirely
        assert!(value.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let json = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "set_light", "arguments": "{\"on\":true}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }"#;
        let api: ApiResponse = serde_json::from_str(json).unwrap();
        let response = parse_response(api).unwrap();

        assert!(response.content.is_none());
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "set_light");
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.usage.prompt_tokens, 10);
    }

    #[test]
    fn test_parse_response_no_choices() {
        let api: ApiResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parse_response(api).is_err());
    }

    #[test]
    fn test_parse_sse_content_deltas() {
        let mut buffer = String::from(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\
             data: [DONE]\n",
        );
        let events = parse_sse_events_buffered(&mut buffer);

        assert_eq!(events.len(), 4);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::ContentDelta { text } if text == "Hel"
        ));
        assert!(matches!(
            events[1].as_ref().unwrap(),
            StreamEvent::ContentDelta { text } if text == "lo"
        ));
        assert!(matches!(
            events[2].as_ref().unwrap(),
            StreamEvent::Finished {
                reason: FinishReason::Stop
            }
        ));
        assert!(matches!(events[3].as_ref().unwrap(), StreamEvent::Done));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_sse_split_across_chunks() {
        let mut buffer = String::from("data: {\"choices\":[{\"delta\":{\"con");
        let events = parse_sse_events_buffered(&mut buffer);
        assert!(events.is_empty());
        // The partial line stays in the buffer
        assert!(!buffer.is_empty());

        buffer.push_str("tent\":\"Hi\"}}]}\n");
        let events = parse_sse_events_buffered(&mut buffer);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::ContentDelta { text } if text == "Hi"
        ));
    }

    #[test]
    fn test_parse_sse_tool_call_delta() {
        let mut buffer = String::from(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"set_light\",\"arguments\":\"\"}}]}}]}\n\
             data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"on\\\":\"}}]}}]}\n",
        );
        let events = parse_sse_events_buffered(&mut buffer);

        assert_eq!(events.len(), 2);
        match events[0].as_ref().unwrap() {
            StreamEvent::ToolCallDelta {
                index, id, name, ..
            } => {
                assert_eq!(*index, 0);
                assert_eq!(id.as_deref(), Some("call_1"));
                assert_eq!(name.as_deref(), Some("set_light"));
            }
            other => panic!("Expected tool call delta, got {other:?}"),
        }
        match events[1].as_ref().unwrap() {
            StreamEvent::ToolCallDelta {
                index,
                id,
                arguments,
                ..
            } => {
                assert_eq!(*index, 0);
                assert!(id.is_none());
                assert_eq!(arguments, "{\"on\":");
            }
            other => panic!("Expected tool call delta, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_sse_malformed_json() {
        let mut buffer = String::from("data: {\"choices\": [}\n");
        let events = parse_sse_events_buffered(&mut buffer);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
    }

    #[test]
    fn test_accumulator_reassembles_interleaved_calls() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(0, Some("call_a".to_string()), Some("set_light".to_string()), "");
        acc.push(1, Some("call_b".to_string()), Some("play_music".to_string()), "{\"art");
        acc.push(0, None, None, "{\"on\":");
        acc.push(1, None, None, "ist\":\"Miles\"}");
        acc.push(0, None, None, "true}");

        assert!(!acc.is_empty());
        let calls = acc.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].name, "set_light");
        assert_eq!(calls[0].arguments, "{\"on\":true}");
        assert_eq!(calls[1].id, "call_b");
        assert_eq!(calls[1].name, "play_music");
        assert_eq!(calls[1].arguments, "{\"artist\":\"Miles\"}");
    }

    #[test]
    fn test_accumulator_id_overwrite() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(0, Some("tmp".to_string()), None, "");
        acc.push(0, Some("call_final".to_string()), Some("noop".to_string()), "{}");

        let calls = acc.finish();
        assert_eq!(calls[0].id, "call_final");
    }

    #[test]
    fn test_accumulator_empty() {
        let acc = ToolCallAccumulator::new();
        assert!(acc.is_empty());
        assert!(acc.finish().is_empty());
    }
}
