//! Chat platform client — HTTP backend plus a recording backend for tests.
//!
//! Enum dispatch over backends avoids `dyn` trait objects and the
//! `async-trait` dependency. `reqwest::Client` is an `Arc` internally, so
//! the client clones cheaply; one clone per relay plus one in the stop
//! listener is the expected shape.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::config::ChatConfig;

use super::{StatusEvent, StopEvent, TransportError};

/// Capacity of the stop-signal broadcast. Stop requests are tiny and rare;
/// a lagging subscriber just means that relay already finished.
const STOP_CHANNEL_CAPACITY: usize = 16;

// ── ChatClient ────────────────────────────────────────────────────────────────

/// Connection to the chat platform's REST surface plus the stop-signal bus.
#[derive(Clone)]
pub struct ChatClient {
    backend: Backend,
    stop_tx: broadcast::Sender<StopEvent>,
}

#[derive(Clone)]
enum Backend {
    Http(HttpBackend),
    Recording(Arc<RecordingState>),
}

impl ChatClient {
    /// Build an HTTP-backed client from config values and an API key.
    pub fn http(config: &ChatConfig, api_key: &str) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            backend: Backend::Http(HttpBackend {
                http,
                api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
                api_key: api_key.to_string(),
            }),
            stop_tx: broadcast::channel(STOP_CHANNEL_CAPACITY).0,
        })
    }

    /// Build a recording client for tests, plus the log handle to inspect it.
    pub fn recording() -> (Self, RecordingLog) {
        let state = Arc::new(RecordingState::default());
        let client = Self {
            backend: Backend::Recording(state.clone()),
            stop_tx: broadcast::channel(STOP_CHANNEL_CAPACITY).0,
        };
        (client, RecordingLog { state })
    }

    /// Broadcast a status event on `cid`. Fire-and-forget semantics at the
    /// platform level; the HTTP call itself is awaited and status-checked.
    pub async fn send_event(&self, cid: &str, event: &StatusEvent) -> Result<(), TransportError> {
        match &self.backend {
            Backend::Http(b) => b.send_event(cid, event).await,
            Backend::Recording(state) => {
                trace!(cid, event_type = event.event_type, "recording event");
                state.events.lock().unwrap().push(event.clone());
                Ok(())
            }
        }
    }

    /// Merge the named fields into the stored message; unspecified fields
    /// are left untouched.
    pub async fn partial_update_message(
        &self,
        message_id: &str,
        set: serde_json::Value,
    ) -> Result<(), TransportError> {
        match &self.backend {
            Backend::Http(b) => b.partial_update_message(message_id, set).await,
            Backend::Recording(state) => {
                trace!(message_id, "recording partial update");
                state
                    .updates
                    .lock()
                    .unwrap()
                    .push((message_id.to_string(), set));
                Ok(())
            }
        }
    }

    /// Subscribe to externally delivered stop requests.
    pub fn subscribe_stop(&self) -> broadcast::Receiver<StopEvent> {
        self.stop_tx.subscribe()
    }

    /// Deliver a stop request to every subscribed relay. Called by the
    /// embedding application when the platform forwards an
    /// `ai_indicator.stop` event.
    pub fn deliver_stop(&self, event: StopEvent) {
        debug!(message_id = %event.message_id, "delivering stop signal");
        // No subscribers means no relay is running for this client — fine.
        let _ = self.stop_tx.send(event);
    }
}

// ── HTTP backend ──────────────────────────────────────────────────────────────

#[derive(Clone)]
struct HttpBackend {
    http: reqwest::Client,
    api_base_url: String,
    api_key: String,
}

impl HttpBackend {
    async fn send_event(&self, cid: &str, event: &StatusEvent) -> Result<(), TransportError> {
        let (channel_type, channel_id) = split_cid(cid)?;
        let url = format!(
            "{}/channels/{channel_type}/{channel_id}/event",
            self.api_base_url
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "event": event }))
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        check_status(response).await.map(|_| ())
    }

    async fn partial_update_message(
        &self,
        message_id: &str,
        set: serde_json::Value,
    ) -> Result<(), TransportError> {
        let url = format!("{}/messages/{message_id}", self.api_base_url);
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "set": set }))
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        check_status(response).await.map(|_| ())
    }
}

/// Split a `type:id` cid into its URL path segments.
fn split_cid(cid: &str) -> Result<(&str, &str), TransportError> {
    match cid.split_once(':') {
        Some((channel_type, channel_id)) if !channel_type.is_empty() && !channel_id.is_empty() => {
            Ok((channel_type, channel_id))
        }
        _ => Err(TransportError::InvalidCid(cid.to_string())),
    }
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

// ── Recording backend ─────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingState {
    events: Mutex<Vec<StatusEvent>>,
    updates: Mutex<Vec<(String, serde_json::Value)>>,
}

/// Inspection handle for a recording client — every event and partial
/// update, in call order.
#[derive(Clone)]
pub struct RecordingLog {
    state: Arc<RecordingState>,
}

impl RecordingLog {
    pub fn events(&self) -> Vec<StatusEvent> {
        self.state.events.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(String, serde_json::Value)> {
        self.state.updates.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::AiState;

    #[test]
    fn split_cid_accepts_type_id() {
        assert_eq!(split_cid("messaging:general").unwrap(), ("messaging", "general"));
    }

    #[test]
    fn split_cid_rejects_malformed() {
        assert!(split_cid("general").is_err());
        assert!(split_cid(":general").is_err());
        assert!(split_cid("messaging:").is_err());
    }

    #[tokio::test]
    async fn recording_backend_captures_calls() {
        let (client, log) = ChatClient::recording();
        let ev = StatusEvent::update(AiState::Generating, "messaging:general", "m1");
        client.send_event("messaging:general", &ev).await.unwrap();
        client
            .partial_update_message("m1", serde_json::json!({ "text": "hi" }))
            .await
            .unwrap();

        let events = log.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ai_state, Some(AiState::Generating));

        let updates = log.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "m1");
        assert_eq!(updates[0].1["text"], "hi");
    }

    #[tokio::test]
    async fn stop_signal_reaches_subscriber() {
        let (client, _log) = ChatClient::recording();
        let mut rx = client.subscribe_stop();
        client.deliver_stop(StopEvent { message_id: "m1".into() });
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.message_id, "m1");
    }

    #[test]
    fn deliver_stop_without_subscribers_is_fine() {
        let (client, _log) = ChatClient::recording();
        client.deliver_stop(StopEvent { message_id: "m1".into() });
    }
}
