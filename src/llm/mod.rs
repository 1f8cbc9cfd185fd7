//! Model-session abstraction — streamed completions with tool-call capture.
//!
//! [`ModelSession`] is an enum over concrete provider implementations; add a
//! new variant + module in `providers/` for each additional backend. Enum
//! dispatch avoids `dyn` trait objects and the `async-trait` dependency.
//!
//! A session hands back a [`CompletionStream`]: a finite, non-restartable
//! sequence of text fragments. After the stream is exhausted the caller
//! exchanges it for the [`FinalResponse`], which carries any structured
//! tool-call requests the model issued during generation.

pub mod providers;
mod sse;

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

pub use providers::openai_compatible::{OpenAiCompatibleProvider, OpenAiStream};
pub use providers::scripted::{ScriptedProvider, ScriptedStream, ScriptedTurn};

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("stream failed: {0}")]
    Stream(String),
}

// ── Tool calls ────────────────────────────────────────────────────────────────

/// A model-issued request to invoke an external capability.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCallRequest {
    /// Build a request from a JSON object literal; non-object values become
    /// an empty argument map.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { name: name.into(), arguments }
    }
}

/// The structured remainder of a completed stream.
#[derive(Debug, Default)]
pub struct FinalResponse {
    pub tool_calls: Vec<ToolCallRequest>,
}

/// A tool the model may request, advertised with every prompt.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the arguments.
    pub parameters: Value,
}

/// The web-search tool declaration offered to the model.
pub fn web_search_tool() -> ToolDefinition {
    ToolDefinition {
        name: "web_search".to_string(),
        description: "Search the web for current information on a topic".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to execute"
                }
            },
            "required": ["query"]
        }),
    }
}

// ── Session / stream enums ────────────────────────────────────────────────────

/// All available model-session backends.
#[derive(Clone)]
pub enum ModelSession {
    OpenAiCompatible(OpenAiCompatibleProvider),
    Scripted(Arc<ScriptedProvider>),
}

impl std::fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSession::OpenAiCompatible(_) => f.write_str("ModelSession::OpenAiCompatible"),
            ModelSession::Scripted(_) => f.write_str("ModelSession::Scripted"),
        }
    }
}

impl ModelSession {
    /// A scripted session answering from the given turns, plus a handle for
    /// seeding further turns and inspecting received prompts.
    pub fn scripted(turns: Vec<ScriptedTurn>) -> (Self, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(turns));
        (Self::Scripted(provider.clone()), provider)
    }

    /// Open a streamed completion over `prompt`.
    pub async fn send_prompt(&self, prompt: &str) -> Result<CompletionStream, ProviderError> {
        match self {
            ModelSession::OpenAiCompatible(p) => {
                Ok(CompletionStream::OpenAi(p.stream(prompt).await?))
            }
            ModelSession::Scripted(p) => Ok(CompletionStream::Scripted(p.stream(prompt)?)),
        }
    }
}

/// One in-flight streamed completion.
pub enum CompletionStream {
    OpenAi(OpenAiStream),
    Scripted(ScriptedStream),
}

impl CompletionStream {
    /// Await the next text fragment; `Ok(None)` once the stream is exhausted.
    pub async fn next_fragment(&mut self) -> Result<Option<String>, ProviderError> {
        match self {
            CompletionStream::OpenAi(s) => s.next_fragment().await,
            CompletionStream::Scripted(s) => s.next_fragment().await,
        }
    }

    /// Exchange the exhausted stream for its structured remainder.
    pub fn final_response(self) -> FinalResponse {
        match self {
            CompletionStream::OpenAi(s) => s.final_response(),
            CompletionStream::Scripted(s) => s.final_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_search_tool_declares_query_param() {
        let tool = web_search_tool();
        assert_eq!(tool.name, "web_search");
        assert_eq!(tool.parameters["properties"]["query"]["type"], "string");
        assert_eq!(tool.parameters["required"][0], "query");
    }
}
