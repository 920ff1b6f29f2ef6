//! Remote reasoning backend.
//!
//! [`ReasoningBackend`] is the seam between the engine and whatever actually
//! executes a specialist. [`HttpBackend`] talks to an OpenAI-compatible
//! chat-completions endpoint and drives a bounded tool-calling loop, running
//! the requested repository tools locally.

use crate::agent::tools::{tool_definitions, ToolCall, ToolExecutor};
use crate::error::BackendError;
use crate::models::ToolKind;
use crate::scanner::RepositoryContext;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One call to a specialist, fully resolved.
#[derive(Debug, Clone)]
pub struct SpecialistRequest {
    pub agent_name: String,
    pub model: String,
    /// System prompt.
    pub instructions: String,
    /// User turn: what to do this time.
    pub task: String,
    pub tools: Vec<ToolKind>,
    pub context: Arc<RepositoryContext>,
    pub timeout: Duration,
}

/// `call(agent_name, instructions, tools, context, timeout) -> raw_output | failure`
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn call(&self, request: &SpecialistRequest) -> Result<String, BackendError>;
}

/// Configuration for the HTTP backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub api_url: String,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    /// Upper bound on model turns that request tools.
    pub max_tool_rounds: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            temperature: None,
            max_tool_rounds: 12,
        }
    }
}

/// Message in the chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn tool_result(call_id: &str, content: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: Some(call_id.to_string()),
        }
    }
}

/// Chat-completions request.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Chat-completions response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// OpenAI-compatible backend.
pub struct HttpBackend {
    config: BackendConfig,
    http_client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        info!("Initializing reasoning backend at {}", config.api_url);

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| BackendError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }
}

/// One model turn. Split from the tool loop so the loop can be driven
/// without a server.
#[async_trait]
trait ChatTransport: Send + Sync {
    async fn chat(
        &self,
        request: &SpecialistRequest,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ChatMessage, BackendError>;
}

#[async_trait]
impl ChatTransport for HttpBackend {
    async fn chat(
        &self,
        request: &SpecialistRequest,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ChatMessage, BackendError> {
        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));

        let body = ChatRequest {
            model: &request.model,
            messages,
            tools: tools.to_vec(),
            temperature: self.config.temperature,
        };

        debug!(
            agent = %request.agent_name,
            "Sending chat request with {} messages",
            messages.len()
        );

        let mut builder = self
            .http_client
            .post(&url)
            .timeout(request.timeout)
            .json(&body);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(request.timeout)
            } else if e.is_connect() {
                BackendError::Transport(format!("Cannot connect to {}", self.config.api_url))
            } else {
                BackendError::Transport(format!("Failed to send request: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, body, request.timeout));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(request.timeout)
            } else {
                BackendError::InvalidResponse(format!("Failed to parse response: {}", e))
            }
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| BackendError::InvalidResponse("response had no choices".to_string()))
    }
}

#[async_trait]
impl ReasoningBackend for HttpBackend {
    async fn call(&self, request: &SpecialistRequest) -> Result<String, BackendError> {
        run_tool_loop(self, request, self.config.max_tool_rounds).await
    }
}

/// Alternate model turns and local tool execution until the model answers
/// with text. Tool results go back tagged with the originating call id.
async fn run_tool_loop(
    transport: &dyn ChatTransport,
    request: &SpecialistRequest,
    max_tool_rounds: usize,
) -> Result<String, BackendError> {
    let executor = ToolExecutor::new(Arc::clone(&request.context), request.tools.clone());
    let tools: Vec<Value> = tool_definitions(&request.tools)
        .iter()
        .filter_map(|t| serde_json::to_value(t).ok())
        .collect();

    let mut messages = vec![
        ChatMessage::text("system", request.instructions.clone()),
        ChatMessage::text("user", request.task.clone()),
    ];

    for round in 0..=max_tool_rounds {
        let reply = transport.chat(request, &messages, &tools).await?;

        let tool_calls = reply.tool_calls.clone().unwrap_or_default();
        if tool_calls.is_empty() {
            return match reply.content {
                Some(text) if !text.trim().is_empty() => Ok(text),
                _ => Err(BackendError::InvalidResponse(
                    "model returned an empty message".to_string(),
                )),
            };
        }

        debug!(
            agent = %request.agent_name,
            round = round + 1,
            "Model requested {} tool call(s)",
            tool_calls.len()
        );
        messages.push(reply);

        for call in &tool_calls {
            let args: Value = serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::Object(Default::default()));
            let result = executor.execute(&call.function.name, &args)?;
            messages.push(ChatMessage::tool_result(&call.id, result.into_message()));
        }
    }

    Err(BackendError::Tool {
        tool: "tool_loop".to_string(),
        message: format!(
            "model still requesting tools after {} rounds",
            max_tool_rounds
        ),
    })
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: String,
    timeout: Duration,
) -> BackendError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited {
            message: format!("{}: {}", status, body),
            retry_after,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => BackendError::Timeout(timeout),
        _ => BackendError::Api {
            status: status.as_u16(),
            body,
        },
    }
}
