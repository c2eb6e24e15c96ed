//! Ollama `/api/chat` client.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChatMessage, ChatResponse, LlmClient, LlmError, Role};
use crate::tools::{ToolCallRequest, ToolDescriptor};

/// Client for a local or remote Ollama server.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[&ToolDescriptor],
    ) -> Result<ChatResponse, LlmError> {
        let request = build_request(model, messages, tools);
        let url = format!("{}/api/chat", self.base_url);

        tracing::debug!("POST {} ({} messages)", url, messages.len());

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        Ok(into_chat_response(reply))
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolSpec<'a>,
}

#[derive(Debug, Serialize)]
struct WireToolSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    message: WireMessage,
}

fn build_request<'a>(
    model: &'a str,
    messages: &[ChatMessage],
    tools: &[&'a ToolDescriptor],
) -> WireRequest<'a> {
    let messages = messages
        .iter()
        .map(|m| WireMessage {
            role: m.role,
            content: m.content.clone().unwrap_or_default(),
            tool_calls: m
                .tool_calls
                .iter()
                .flatten()
                .map(|call| WireToolCall {
                    function: WireFunction {
                        name: call.name.clone(),
                        arguments: Value::Object(call.arguments.clone()),
                    },
                })
                .collect(),
            tool_name: m.tool_name.clone(),
        })
        .collect();

    let tools = tools
        .iter()
        .copied()
        .map(|d| WireTool {
            kind: "function",
            function: WireToolSpec {
                name: d.name(),
                description: d.description(),
                parameters: d.json_schema(),
            },
        })
        .collect();

    WireRequest {
        model,
        messages,
        tools,
        stream: false,
    }
}

fn into_chat_response(reply: WireResponse) -> ChatResponse {
    let content = strip_reasoning(&reply.message.content);
    ChatResponse {
        content: (!content.is_empty()).then_some(content),
        tool_calls: reply
            .message
            .tool_calls
            .into_iter()
            .map(|call| ToolCallRequest::from_raw(call.function.name, call.function.arguments))
            .collect(),
    }
}

/// Drop `<think>...</think>` blocks that reasoning models prepend to answers.
fn strip_reasoning(content: &str) -> String {
    static THINK: OnceLock<Regex> = OnceLock::new();
    let re = THINK.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));
    re.replace_all(content, "").trim().to_string()
}
