//! chat-relay — streams a generative-model reply into a live chat message.
//!
//! One [`relay::ResponseRelay`] instance drives a single streamed completion
//! to termination while mirroring progress into the target message and an
//! `ai_indicator.*` status side channel:
//!
//!   1. compose prompt, signal `AI_STATE_GENERATING`
//!   2. stream fragments, throttling partial message updates
//!   3. service `web_search` tool calls, signal `AI_STATE_EXTERNAL_SOURCES`
//!   4. stream the follow-up, flush the final text, clear the indicator
//!
//! Success, user-cancel (`ai_indicator.stop`), and error all funnel into one
//! idempotent dispose path. The collaborators are capability enums with one
//! real HTTP backend and one scripted backend each: [`llm::ModelSession`],
//! [`chat::ChatClient`], [`search::SearchTool`]. The embedding bot loads
//! [`config::Config`], builds the capabilities, and calls
//! [`relay::ResponseRelay::run`] once per message.

pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod logger;
pub mod relay;
pub mod search;

pub use error::AppError;
pub use relay::{RelayOptions, ResponseRelay};
