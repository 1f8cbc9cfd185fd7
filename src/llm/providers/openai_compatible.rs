//! OpenAI-compatible streamed chat completion provider
//! (`/v1/chat/completions` with `stream: true`).
//!
//! All OpenAI wire types are private to this module — callers see only
//! [`OpenAiStream`] fragments and the assembled tool calls. Each prompt is
//! one stateless round-trip; conversation history and the tool-call loop
//! belong to the relay layer.

use std::collections::{BTreeMap, VecDeque};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::llm::sse::SseParser;
use crate::llm::{FinalResponse, ProviderError, ToolCallRequest, ToolDefinition};

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Covers OpenAI, OpenAI-compatible local servers (Ollama, LM Studio…), and
/// hosted alternatives. Constructed once at startup, then cheaply cloned
/// because `reqwest::Client` is an `Arc` internally.
#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
    tools: Vec<ToolDefinition>,
}

impl OpenAiCompatibleProvider {
    /// Build a provider from config values and an optional API key.
    ///
    /// `api_key` is `None` for keyless local models. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        api_key: Option<String>,
        tools: Vec<ToolDefinition>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_base_url, model, temperature, api_key, tools })
    }

    /// Open a streamed completion over `content` as the user message.
    pub async fn stream(&self, content: &str) -> Result<OpenAiStream, ProviderError> {
        // Some models (gpt-5 family) do not accept a temperature parameter.
        let temperature = if self.model.starts_with("gpt-5") {
            None
        } else {
            Some(self.temperature)
        };

        let payload = ChatCompletionRequest {
            model: &self.model,
            messages: vec![Message { role: "user", content }],
            temperature,
            stream: true,
            tools: self
                .tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunction {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect(),
        };

        debug!(
            model = %self.model,
            temperature = ?temperature,
            content_len = content.len(),
            tools = self.tools.len(),
            "opening streamed completion"
        );

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "completion request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;
        let response = check_status(response).await?;

        Ok(OpenAiStream {
            response,
            parser: SseParser::new(),
            assembler: StreamAssembler::default(),
        })
    }
}

// ── Stream ────────────────────────────────────────────────────────────────────

/// One in-flight streamed completion. Finite; not restartable.
pub struct OpenAiStream {
    response: reqwest::Response,
    parser: SseParser,
    assembler: StreamAssembler,
}

impl OpenAiStream {
    /// Await the next text fragment; `Ok(None)` once the server signals
    /// `[DONE]` or closes the stream.
    pub async fn next_fragment(&mut self) -> Result<Option<String>, ProviderError> {
        loop {
            if let Some(fragment) = self.assembler.pending.pop_front() {
                return Ok(Some(fragment));
            }
            if self.assembler.done {
                return Ok(None);
            }
            match self.response.chunk().await {
                Err(e) => {
                    error!(error = %e, "completion stream aborted");
                    return Err(ProviderError::Stream(e.to_string()));
                }
                Ok(None) => {
                    self.assembler.done = true;
                }
                Ok(Some(bytes)) => {
                    for event in self.parser.feed(&bytes) {
                        self.assembler.feed(&event.data)?;
                    }
                }
            }
        }
    }

    /// Tool calls assembled from the deltas, once the stream is exhausted.
    pub fn final_response(self) -> FinalResponse {
        self.assembler.into_final()
    }
}

/// Folds stream-chunk deltas into ready fragments and partial tool calls.
/// Separated from the HTTP plumbing so the wire handling is testable.
#[derive(Default)]
struct StreamAssembler {
    pending: VecDeque<String>,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    done: bool,
}

#[derive(Default)]
struct PartialToolCall {
    name: String,
    arguments: String,
}

impl StreamAssembler {
    fn feed(&mut self, data: &str) -> Result<(), ProviderError> {
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }

        let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
            error!(error = %e, "failed to deserialize stream chunk");
            ProviderError::Stream(format!("bad stream chunk: {e}"))
        })?;

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                trace!(len = content.len(), "text fragment");
                self.pending.push_back(content);
            }
            for delta in choice.delta.tool_calls {
                let partial = self.tool_calls.entry(delta.index).or_default();
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        partial.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        partial.arguments.push_str(&arguments);
                    }
                }
            }
        }
        Ok(())
    }

    fn into_final(self) -> FinalResponse {
        let tool_calls = self
            .tool_calls
            .into_values()
            .map(|partial| {
                let arguments = if partial.arguments.is_empty() {
                    serde_json::Map::new()
                } else {
                    match serde_json::from_str(&partial.arguments) {
                        Ok(serde_json::Value::Object(map)) => map,
                        Ok(_) | Err(_) => {
                            warn!(tool = %partial.name, "tool-call arguments are not a JSON object");
                            serde_json::Map::new()
                        }
                    }
                };
                ToolCallRequest { name: partial.name, arguments }
            })
            .collect();
        FinalResponse { tool_calls }
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Deserialize, Default)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env
            .error
            .code
            .map(|v| match v {
                serde_json::Value::String(s) => format!(" [code={s}]"),
                other => format!(" [code={other}]"),
            })
            .unwrap_or_default();
        format!("HTTP {status}{code}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "completion request returned HTTP error");
    Err(ProviderError::Request(message))
}
