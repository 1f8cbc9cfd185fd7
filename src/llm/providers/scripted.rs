//! Scripted model session — replays pre-seeded turns, for tests and for
//! running the relay without a real API key.
//!
//! Each call to `stream` consumes the next queued [`ScriptedTurn`] and
//! records the prompt it was given, so tests can assert on exactly what the
//! relay sent. Fragments can be fixed up front, fed live through a channel
//! (to exercise mid-stream cancellation), delayed per fragment (to exercise
//! the update throttle under a paused clock), or replaced by an injected
//! failure.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::llm::{FinalResponse, ProviderError, ToolCallRequest};

// ── Turns ─────────────────────────────────────────────────────────────────────

/// One scripted exchange: what the stream yields and what the final
/// response carries.
pub struct ScriptedTurn {
    source: Source,
    tool_calls: Vec<ToolCallRequest>,
    fragment_delay: Duration,
    error: Option<String>,
}

enum Source {
    Fixed(VecDeque<String>),
    Piped(mpsc::UnboundedReceiver<String>),
}

impl ScriptedTurn {
    /// A turn yielding the given fragments in order.
    pub fn text(fragments: &[&str]) -> Self {
        Self {
            source: Source::Fixed(fragments.iter().map(|s| s.to_string()).collect()),
            tool_calls: Vec::new(),
            fragment_delay: Duration::ZERO,
            error: None,
        }
    }

    /// A turn whose fragments are pushed live through the returned sender;
    /// the stream ends when the sender is dropped.
    pub fn piped() -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let turn = Self {
            source: Source::Piped(rx),
            tool_calls: Vec::new(),
            fragment_delay: Duration::ZERO,
            error: None,
        };
        (turn, tx)
    }

    /// A turn that fails at `send_prompt` instead of streaming.
    pub fn failing(message: &str) -> Self {
        Self {
            source: Source::Fixed(VecDeque::new()),
            tool_calls: Vec::new(),
            fragment_delay: Duration::ZERO,
            error: Some(message.to_string()),
        }
    }

    /// Attach tool calls to the turn's final response.
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Sleep this long before yielding each fragment.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }
}

// ── Provider ──────────────────────────────────────────────────────────────────

pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue another turn.
    pub fn push_turn(&self, turn: ScriptedTurn) {
        self.turns.lock().unwrap().push_back(turn);
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub(crate) fn stream(&self, prompt: &str) -> Result<ScriptedStream, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Request("no scripted turn queued".into()))?;
        if let Some(message) = turn.error {
            return Err(ProviderError::Request(message));
        }
        Ok(ScriptedStream {
            source: turn.source,
            tool_calls: turn.tool_calls,
            fragment_delay: turn.fragment_delay,
        })
    }
}

// ── Stream ────────────────────────────────────────────────────────────────────

pub struct ScriptedStream {
    source: Source,
    tool_calls: Vec<ToolCallRequest>,
    fragment_delay: Duration,
}

impl std::fmt::Debug for ScriptedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedStream")
            .field("tool_calls", &self.tool_calls)
            .field("fragment_delay", &self.fragment_delay)
            .finish()
    }
}

impl ScriptedStream {
    pub async fn next_fragment(&mut self) -> Result<Option<String>, ProviderError> {
        match &mut self.source {
            Source::Fixed(queue) => match queue.pop_front() {
                None => Ok(None),
                Some(fragment) => {
                    if !self.fragment_delay.is_zero() {
                        tokio::time::sleep(self.fragment_delay).await;
                    }
                    Ok(Some(fragment))
                }
            },
            // `None` once the sender side is dropped.
            Source::Piped(rx) => Ok(rx.recv().await),
        }
    }

    pub fn final_response(self) -> FinalResponse {
        FinalResponse { tool_calls: self.tool_calls }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_turn_replays_fragments() {
        let provider = ScriptedProvider::new(vec![ScriptedTurn::text(&["a", "b"])]);
        let mut stream = provider.stream("hello").unwrap();
        assert_eq!(stream.next_fragment().await.unwrap().as_deref(), Some("a"));
        assert_eq!(stream.next_fragment().await.unwrap().as_deref(), Some("b"));
        assert_eq!(stream.next_fragment().await.unwrap(), None);
        assert!(stream.final_response().tool_calls.is_empty());
        assert_eq!(provider.prompts(), vec!["hello"]);
    }

    #[tokio::test]
    async fn tool_calls_ride_on_final_response() {
        let call = ToolCallRequest::new("web_search", serde_json::json!({"query": "foo"}));
        let provider = ScriptedProvider::new(vec![
            ScriptedTurn::text(&[]).with_tool_calls(vec![call.clone()]),
        ]);
        let mut stream = provider.stream("q").unwrap();
        assert_eq!(stream.next_fragment().await.unwrap(), None);
        assert_eq!(stream.final_response().tool_calls, vec![call]);
    }

    #[tokio::test]
    async fn failing_turn_errors_at_send() {
        let provider = ScriptedProvider::new(vec![ScriptedTurn::failing("boom")]);
        let err = provider.stream("q").unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn exhausted_provider_errors() {
        let provider = ScriptedProvider::new(Vec::new());
        assert!(provider.stream("q").is_err());
    }

    #[tokio::test]
    async fn piped_turn_ends_when_sender_drops() {
        let (turn, tx) = ScriptedTurn::piped();
        let provider = ScriptedProvider::new(vec![turn]);
        let mut stream = provider.stream("q").unwrap();
        tx.send("x".into()).unwrap();
        assert_eq!(stream.next_fragment().await.unwrap().as_deref(), Some("x"));
        drop(tx);
        assert_eq!(stream.next_fragment().await.unwrap(), None);
    }
}
