//! ResponseRelay — drives one streamed model response to completion while
//! mirroring progress into a chat message and the `ai_indicator.*` side
//! channel.
//!
//! # Lifecycle
//!
//! One relay owns one target message. `run` walks a single linear workflow:
//! signal GENERATING, stream fragments into throttled partial updates,
//! service `web_search` tool calls (signalling EXTERNAL_SOURCES), stream
//! the follow-up, flush the final text, clear the indicator, dispose.
//! Normal completion, an external `ai_indicator.stop` request, and any
//! error all converge on [`ResponseRelay::dispose`], which is idempotent —
//! the single defense against duplicate side effects.
//!
//! # Concurrency
//!
//! Two tasks touch a relay: the run loop and the stop listener spawned at
//! construction. They share an `AtomicBool` terminated flag (swap for the
//! check-then-set) and race only through the idempotent dispose; every
//! transport helper is gated on the flag, so nothing reaches the platform
//! after teardown. The run loop polls the flag once per received fragment,
//! so worst-case cancellation latency is one fragment, not one throttle
//! window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chat::{AiState, Channel, StatusEvent, StopEvent, TransportError};
use crate::config::RelaySettings;
use crate::error::AppError;
use crate::llm::{FinalResponse, ModelSession, ToolCallRequest};
use crate::search::SearchTool;

/// Substituted for the tool result when the search capability itself fails.
/// Tool failures never abort the run.
const FAILED_TOOL_CALL: &str = r#"{"error":"failed to call tool"}"#;

/// The only tool the relay services; other requests are logged and skipped.
const WEB_SEARCH_TOOL: &str = "web_search";

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Minimum wall-clock gap between partial message updates while a
    /// stream is in flight. The final flush always fires regardless.
    pub update_interval: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self { update_interval: Duration::from_millis(1000) }
    }
}

impl From<&RelaySettings> for RelayOptions {
    fn from(settings: &RelaySettings) -> Self {
        Self { update_interval: settings.update_interval }
    }
}

// ── Relay state ───────────────────────────────────────────────────────────────

/// Mutable state of one run. Owned exclusively by the run loop; destroyed
/// with the relay.
struct RelayState {
    accumulated_text: String,
    chunk_count: u64,
    /// `None` until the first flush, so the first fragment may flush
    /// immediately.
    last_flush: Option<Instant>,
}

impl RelayState {
    fn new() -> Self {
        Self {
            accumulated_text: String::new(),
            chunk_count: 0,
            last_flush: None,
        }
    }

    fn push_fragment(&mut self, fragment: &str) {
        self.accumulated_text.push_str(fragment);
        self.chunk_count += 1;
    }

    fn due_for_flush(&self, interval: Duration) -> bool {
        self.last_flush.map_or(true, |at| at.elapsed() >= interval)
    }

    fn mark_flushed(&mut self) {
        self.last_flush = Some(Instant::now());
    }
}

// ── Shared core ───────────────────────────────────────────────────────────────

/// State shared between the run loop and the stop listener.
struct RelayShared {
    channel: Channel,
    message_id: String,
    terminated: AtomicBool,
    /// Cancelled on dispose; ends the stop listener.
    stop_guard: CancellationToken,
    on_dispose: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl RelayShared {
    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Idempotent teardown. The first caller flips the flag, unregisters
    /// the stop listener, and invokes the disposal callback; every later
    /// call is a no-op.
    fn dispose(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(message_id = %self.message_id, "disposing relay");
        self.stop_guard.cancel();
        let callback = self.on_dispose.lock().unwrap().take();
        if let Some(callback) = callback {
            callback();
        }
    }

    async fn emit_state(&self, state: AiState) -> Result<(), TransportError> {
        if self.is_terminated() {
            return Ok(());
        }
        self.channel
            .send_event(&StatusEvent::update(state, self.channel.cid(), &self.message_id))
            .await
    }

    async fn emit_clear(&self) -> Result<(), TransportError> {
        if self.is_terminated() {
            return Ok(());
        }
        self.channel
            .send_event(&StatusEvent::clear(self.channel.cid(), &self.message_id))
            .await
    }

    async fn update_message(&self, set: serde_json::Value) -> Result<(), TransportError> {
        if self.is_terminated() {
            return Ok(());
        }
        self.channel
            .client()
            .partial_update_message(&self.message_id, set)
            .await
    }
}

// ── ResponseRelay ─────────────────────────────────────────────────────────────

/// Result of one serviced tool call, folded into the follow-up prompt.
struct ToolCallResult {
    name: String,
    response: String,
}

pub struct ResponseRelay {
    session: ModelSession,
    search: SearchTool,
    shared: Arc<RelayShared>,
    update_interval: Duration,
}

impl ResponseRelay {
    /// Bind a relay to its collaborators and target message, register the
    /// stop listener, and store the disposal callback (invoked exactly once
    /// at teardown). Must be called within a Tokio runtime.
    pub fn new(
        session: ModelSession,
        channel: Channel,
        message_id: impl Into<String>,
        search: SearchTool,
        options: RelayOptions,
        on_dispose: impl FnOnce() + Send + 'static,
    ) -> Self {
        let stop_rx = channel.client().subscribe_stop();
        let shared = Arc::new(RelayShared {
            channel,
            message_id: message_id.into(),
            terminated: AtomicBool::new(false),
            stop_guard: CancellationToken::new(),
            on_dispose: Mutex::new(Some(Box::new(on_dispose))),
        });
        tokio::spawn(stop_listener(shared.clone(), stop_rx));
        Self {
            session,
            search,
            shared,
            update_interval: options.update_interval,
        }
    }

    /// Drive one full generation for `user_message`. The instruction text
    /// is prepended to the message (plain concatenation, no templating).
    /// Every outcome — success, external cancel, error — ends in exactly
    /// one dispose; failures are routed to the error handler rather than
    /// returned.
    pub async fn run(&self, user_message: &str, instructions: &str) {
        if let Err(err) = self.drive(user_message, instructions).await {
            self.handle_error(&err).await;
        }
    }

    /// Idempotent teardown; also reachable through the stop listener and
    /// `Drop`, so the callback fires on every exit path.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    async fn drive(&self, user_message: &str, instructions: &str) -> Result<(), AppError> {
        let prompt = compose_prompt(instructions, user_message);
        self.shared.emit_state(AiState::Generating).await?;

        let mut state = RelayState::new();
        let Some(final_response) = self.consume_stream(&prompt, &mut state).await? else {
            // Cancelled mid-stream; the stop handler owns cleanup.
            return Ok(());
        };

        if !final_response.tool_calls.is_empty() {
            self.shared.emit_state(AiState::ExternalSources).await?;
            let results = self.invoke_tool_calls(&final_response.tool_calls).await;
            if !results.is_empty() {
                let follow_up = format_tool_results(&results);
                if self.consume_stream(&follow_up, &mut state).await?.is_none() {
                    return Ok(());
                }
            }
        }

        // Final flush: the throttle must never drop the tail of the reply.
        self.shared
            .update_message(serde_json::json!({ "text": state.accumulated_text }))
            .await?;
        self.shared.emit_clear().await?;
        info!(
            message_id = %self.shared.message_id,
            chunks = state.chunk_count,
            chars = state.accumulated_text.len(),
            "generation complete"
        );
        self.shared.dispose();
        Ok(())
    }

    /// Stream one prompt into `state` with throttled partial updates.
    /// `Ok(None)` means the relay was terminated mid-stream.
    async fn consume_stream(
        &self,
        prompt: &str,
        state: &mut RelayState,
    ) -> Result<Option<FinalResponse>, AppError> {
        let mut stream = self.session.send_prompt(prompt).await?;
        while let Some(fragment) = stream.next_fragment().await? {
            // Cancellation point: checked once per received fragment.
            if self.shared.is_terminated() {
                debug!(
                    message_id = %self.shared.message_id,
                    "terminated mid-stream, abandoning completion"
                );
                return Ok(None);
            }
            state.push_fragment(&fragment);
            if state.due_for_flush(self.update_interval) {
                self.shared
                    .update_message(serde_json::json!({ "text": state.accumulated_text }))
                    .await?;
                state.mark_flushed();
            }
        }
        Ok(Some(stream.final_response()))
    }

    /// Service `web_search` requests. Failures are substituted with a
    /// structured error payload instead of propagating.
    async fn invoke_tool_calls(&self, calls: &[ToolCallRequest]) -> Vec<ToolCallResult> {
        let mut results = Vec::new();
        for call in calls {
            if call.name != WEB_SEARCH_TOOL {
                debug!(tool = %call.name, "ignoring unsupported tool call");
                continue;
            }
            let query = call
                .arguments
                .get("query")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let response = match self.search.search(query).await {
                Ok(body) => body,
                Err(err) => {
                    warn!(error = %err, "web search tool call failed");
                    FAILED_TOOL_CALL.to_string()
                }
            };
            results.push(ToolCallResult {
                name: call.name.clone(),
                response,
            });
        }
        results
    }

    /// Terminal error path: surface the failure in the target message,
    /// signal ERROR, dispose. Best-effort — transport errors here are only
    /// logged.
    async fn handle_error(&self, err: &AppError) {
        if self.shared.is_terminated() {
            return;
        }
        error!(message_id = %self.shared.message_id, error = %err, "relay run failed");
        if let Err(e) = self.shared.emit_state(AiState::Error).await {
            warn!(error = %e, "failed to signal error state");
        }
        let set = serde_json::json!({
            "text": err.to_string(),
            "error": format!("{err:?}"),
        });
        if let Err(e) = self.shared.update_message(set).await {
            warn!(error = %e, "failed to write error into message");
        }
        self.shared.dispose();
    }
}

impl Drop for ResponseRelay {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

// ── Stop listener ─────────────────────────────────────────────────────────────

/// Runs until the relay disposes or a matching stop request arrives.
/// A stop for a different message id is ignored entirely.
async fn stop_listener(shared: Arc<RelayShared>, mut rx: broadcast::Receiver<StopEvent>) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shared.stop_guard.cancelled() => return,
            received = rx.recv() => match received {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "stop listener lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        };
        if event.message_id != shared.message_id {
            debug!(
                message_id = %event.message_id,
                target = %shared.message_id,
                "ignoring stop for another message"
            );
            continue;
        }
        if shared.is_terminated() {
            return;
        }
        info!(message_id = %shared.message_id, "stop requested, cancelling generation");
        if let Err(e) = shared.emit_clear().await {
            warn!(error = %e, "failed to clear indicator on stop");
        }
        shared.dispose();
        return;
    }
}

// ── Prompt assembly ───────────────────────────────────────────────────────────

/// Prepend instruction text to the user message. Plain concatenation; empty
/// instructions leave the message untouched.
fn compose_prompt(instructions: &str, user_message: &str) -> String {
    if instructions.is_empty() {
        user_message.to_string()
    } else {
        format!("{instructions}\n\n{user_message}")
    }
}

/// Serialize tool results into the follow-up prompt block.
fn format_tool_results(results: &[ToolCallResult]) -> String {
    results
        .iter()
        .map(|r| format!("Function: {}\nResult: {}", r.name, r.response))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_prepends_instructions() {
        assert_eq!(
            compose_prompt("Be concise", "What's the weather?"),
            "Be concise\n\nWhat's the weather?"
        );
    }

    #[test]
    fn compose_without_instructions_is_identity() {
        assert_eq!(compose_prompt("", "hello"), "hello");
    }

    #[test]
    fn tool_results_formatted_per_call() {
        let results = vec![ToolCallResult {
            name: "web_search".into(),
            response: r#"{"answer":"bar"}"#.into(),
        }];
        assert_eq!(
            format_tool_results(&results),
            "Function: web_search\nResult: {\"answer\":\"bar\"}"
        );
    }

    #[test]
    fn multiple_tool_results_double_newline_separated() {
        let results = vec![
            ToolCallResult { name: "web_search".into(), response: "{}".into() },
            ToolCallResult { name: "web_search".into(), response: "[]".into() },
        ];
        assert_eq!(
            format_tool_results(&results),
            "Function: web_search\nResult: {}\n\nFunction: web_search\nResult: []"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flush_due_tracks_interval() {
        let interval = Duration::from_millis(1000);
        let mut state = RelayState::new();
        // Never flushed: due immediately.
        assert!(state.due_for_flush(interval));
        state.mark_flushed();
        assert!(!state.due_for_flush(interval));
        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!state.due_for_flush(interval));
        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(state.due_for_flush(interval));
    }

    #[test]
    fn push_fragment_appends_and_counts() {
        let mut state = RelayState::new();
        state.push_fragment("Sun");
        state.push_fragment("ny");
        assert_eq!(state.accumulated_text, "Sunny");
        assert_eq!(state.chunk_count, 2);
    }
}
