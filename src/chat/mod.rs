//! Chat transport capability — status events, partial message updates, and
//! the external stop signal.
//!
//! [`ChatClient`] is the connection to the chat platform; [`Channel`] binds
//! a client to one channel `cid` and is what a relay holds. Status signals
//! travel as `ai_indicator.*` events on the channel; message mutation goes
//! through merge-style partial updates keyed by message id. The platform's
//! websocket layer is the embedding application's concern — it feeds
//! `ai_indicator.stop` requests in through [`ChatClient::deliver_stop`].

pub mod client;

pub use client::{ChatClient, RecordingLog};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid channel cid (expected `type:id`): {0}")]
    InvalidCid(String),
}

// ── Wire events ───────────────────────────────────────────────────────────────

pub const EVENT_INDICATOR_UPDATE: &str = "ai_indicator.update";
pub const EVENT_INDICATOR_CLEAR: &str = "ai_indicator.clear";
pub const EVENT_INDICATOR_STOP: &str = "ai_indicator.stop";

/// Generation phase shown by the end user's chat client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AiState {
    #[serde(rename = "AI_STATE_GENERATING")]
    Generating,
    #[serde(rename = "AI_STATE_EXTERNAL_SOURCES")]
    ExternalSources,
    #[serde(rename = "AI_STATE_ERROR")]
    Error,
}

/// An `ai_indicator.*` status broadcast, keyed by (cid, message id).
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_state: Option<AiState>,
    pub cid: String,
    pub message_id: String,
    pub created_at: DateTime<Utc>,
}

impl StatusEvent {
    /// An `ai_indicator.update` carrying the given state.
    pub fn update(state: AiState, cid: &str, message_id: &str) -> Self {
        Self {
            event_type: EVENT_INDICATOR_UPDATE,
            ai_state: Some(state),
            cid: cid.to_string(),
            message_id: message_id.to_string(),
            created_at: Utc::now(),
        }
    }

    /// An `ai_indicator.clear` for the given message.
    pub fn clear(cid: &str, message_id: &str) -> Self {
        Self {
            event_type: EVENT_INDICATOR_CLEAR,
            ai_state: None,
            cid: cid.to_string(),
            message_id: message_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// An externally delivered "stop generating" request.
#[derive(Debug, Clone)]
pub struct StopEvent {
    pub message_id: String,
}

// ── Channel ───────────────────────────────────────────────────────────────────

/// A [`ChatClient`] bound to one channel `cid`.
#[derive(Clone)]
pub struct Channel {
    client: ChatClient,
    cid: String,
}

impl Channel {
    pub fn new(client: ChatClient, cid: impl Into<String>) -> Self {
        Self { client, cid: cid.into() }
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }

    /// Broadcast a status event on this channel.
    pub async fn send_event(&self, event: &StatusEvent) -> Result<(), TransportError> {
        self.client.send_event(&self.cid, event).await
    }
}
