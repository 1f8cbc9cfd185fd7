//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies the `RELAY_LOG_LEVEL` env override. API credentials are
//! only ever read from the environment (`LLM_API_KEY`, `CHAT_API_KEY`,
//! `SEARCH_API_KEY`) — never from TOML — and are injected into the
//! capability constructors, so nothing in the library reads globals ad hoc.

use std::{env, fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::error::AppError;

// ── Resolved config ───────────────────────────────────────────────────────────

/// Relay behaviour knobs (from `[relay]`).
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Minimum wall-clock interval between partial message updates while a
    /// stream is in flight. The final flush ignores this.
    pub update_interval: Duration,
}

/// Model-session provider configuration (from `[llm]`).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (e.g. `"scripted"`, `"openai"`).
    pub provider: String,
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// Chat transport configuration (from `[chat]`).
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL of the chat platform REST API.
    pub api_base_url: String,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// Web-search tool configuration (from `[search]`).
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Search endpoint URL.
    pub api_url: String,
    pub search_depth: String,
    pub max_results: u32,
    pub include_answer: bool,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// Fully-resolved configuration for an embedding application.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub relay: RelaySettings,
    pub llm: LlmConfig,
    pub chat: ChatConfig,
    pub search: SearchConfig,
    /// From `LLM_API_KEY` — `None` for keyless local models.
    pub llm_api_key: Option<String>,
    /// From `CHAT_API_KEY`.
    pub chat_api_key: Option<String>,
    /// From `SEARCH_API_KEY` — `None` disables web search (the tool then
    /// answers with its not-configured payload instead of calling out).
    pub search_api_key: Option<String>,
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    relay: RawRelay,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    chat: RawChat,
    #[serde(default)]
    search: RawSearch,
}

#[derive(Deserialize)]
struct RawRelay {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_update_interval_ms")]
    update_interval_ms: u64,
}

impl Default for RawRelay {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            update_interval_ms: default_update_interval_ms(),
        }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default = "default_llm_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_llm_model")]
    model: String,
    #[serde(default = "default_llm_temperature")]
    temperature: f32,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_base_url: default_llm_api_base_url(),
            model: default_llm_model(),
            temperature: default_llm_temperature(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawChat {
    #[serde(default = "default_chat_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawChat {
    fn default() -> Self {
        Self {
            api_base_url: default_chat_api_base_url(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawSearch {
    #[serde(default = "default_search_api_url")]
    api_url: String,
    #[serde(default = "default_search_depth")]
    search_depth: String,
    #[serde(default = "default_search_max_results")]
    max_results: u32,
    #[serde(default = "default_true")]
    include_answer: bool,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawSearch {
    fn default() -> Self {
        Self {
            api_url: default_search_api_url(),
            search_depth: default_search_depth(),
            max_results: default_search_max_results(),
            include_answer: true,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_update_interval_ms() -> u64 { 1000 }
fn default_llm_provider() -> String { "scripted".to_string() }
fn default_llm_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_temperature() -> f32 { 0.2 }
fn default_timeout_seconds() -> u64 { 60 }
fn default_chat_api_base_url() -> String { "https://chat.stream-io-api.com".to_string() }
fn default_search_api_url() -> String { "https://api.tavily.com/search".to_string() }
fn default_search_depth() -> String { "advanced".to_string() }
fn default_search_max_results() -> u32 { 5 }
fn default_true() -> bool { true }

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from `config/default.toml`, then apply env-var overrides.
///
/// Also loads `.env` if present (ignored when missing) so credentials can
/// live beside the checkout during development.
pub fn load() -> Result<Config, AppError> {
    let _ = dotenvy::dotenv();
    let log_level_override = env::var("RELAY_LOG_LEVEL").ok();
    load_from(Path::new("config/default.toml"), log_level_override.as_deref())
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: &Path, log_level_override: Option<&str>) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let log_level = log_level_override
        .unwrap_or(&parsed.relay.log_level)
        .to_string();

    Ok(Config {
        log_level,
        relay: RelaySettings {
            update_interval: Duration::from_millis(parsed.relay.update_interval_ms),
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            api_base_url: parsed.llm.api_base_url,
            model: parsed.llm.model,
            temperature: parsed.llm.temperature,
            timeout_seconds: parsed.llm.timeout_seconds,
        },
        chat: ChatConfig {
            api_base_url: parsed.chat.api_base_url,
            timeout_seconds: parsed.chat.timeout_seconds,
        },
        search: SearchConfig {
            api_url: parsed.search.api_url,
            search_depth: parsed.search.search_depth,
            max_results: parsed.search.max_results,
            include_answer: parsed.search.include_answer,
            timeout_seconds: parsed.search.timeout_seconds,
        },
        llm_api_key: env::var("LLM_API_KEY").ok(),
        chat_api_key: env::var("CHAT_API_KEY").ok(),
        search_api_key: env::var("SEARCH_API_KEY").ok(),
    })
}
