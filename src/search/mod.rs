//! Web-search capability — a single-call HTTP tool mapping a query to a
//! JSON payload.
//!
//! Failures at the HTTP layer never surface as `Err`: a missing credential,
//! a non-2xx status, and a transport exception all come back as `Ok` with a
//! structured JSON error payload, so the model sees what went wrong instead
//! of the run aborting. `Err` is reserved for the scripted backend's
//! injected failures (exercising the caller's substitution path).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SearchConfig;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(String),
}

// ── SearchTool ────────────────────────────────────────────────────────────────

/// All available search backends. Enum dispatch — add a backend as a new
/// variant plus a `search` arm.
pub enum SearchTool {
    Http(HttpSearch),
    Scripted(Arc<ScriptedSearch>),
}

impl SearchTool {
    /// Build the HTTP backend. `api_key` is injected here rather than read
    /// from the process environment inside the call path.
    pub fn http(config: &SearchConfig, api_key: Option<String>) -> Result<Self, SearchError> {
        Ok(Self::Http(HttpSearch::new(config, api_key)?))
    }

    /// A scripted backend answering from the given queue of responses, plus
    /// a handle for inspecting the queries it received.
    pub fn scripted(responses: Vec<Result<String, SearchError>>) -> (Self, Arc<ScriptedSearch>) {
        let scripted = Arc::new(ScriptedSearch::new(responses));
        (Self::Scripted(scripted.clone()), scripted)
    }

    /// Resolve `query` to a JSON-encoded result payload.
    pub async fn search(&self, query: &str) -> Result<String, SearchError> {
        match self {
            SearchTool::Http(s) => s.search(query).await,
            SearchTool::Scripted(s) => s.search(query),
        }
    }
}

// ── HTTP backend ──────────────────────────────────────────────────────────────

pub struct HttpSearch {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    search_depth: String,
    max_results: u32,
    include_answer: bool,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    search_depth: &'a str,
    max_results: u32,
    include_answer: bool,
    include_raw_content: bool,
}

impl HttpSearch {
    pub fn new(config: &SearchConfig, api_key: Option<String>) -> Result<Self, SearchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SearchError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key,
            search_depth: config.search_depth.clone(),
            max_results: config.max_results,
            include_answer: config.include_answer,
        })
    }

    async fn search(&self, query: &str) -> Result<String, SearchError> {
        let Some(api_key) = &self.api_key else {
            // Short-circuit: no credential, no network call.
            return Ok(
                r#"{"error": "Web search is not available. API key not configured."}"#.to_string(),
            );
        };

        let payload = SearchRequest {
            query,
            search_depth: &self.search_depth,
            max_results: self.max_results,
            include_answer: self.include_answer,
            include_raw_content: false,
        };

        debug!(query_len = query.len(), "sending search request");

        let response = match self
            .http
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "search transport failure");
                return Ok(exception_payload(&e.to_string()));
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(%status, "search returned HTTP error");
            return Ok(status_payload(status.as_u16(), &body));
        }

        Ok(body)
    }
}

/// Payload for a non-2xx search response. The body rides along verbatim —
/// as parsed JSON when it is JSON, as a string otherwise.
fn status_payload(status: u16, body: &str) -> String {
    let details = serde_json::from_str::<serde_json::Value>(body)
        .unwrap_or_else(|_| serde_json::Value::String(body.to_string()));
    serde_json::json!({
        "error": format!("Search failed with status: {status}"),
        "details": details,
    })
    .to_string()
}

/// Payload for a transport-level failure.
fn exception_payload(description: &str) -> String {
    serde_json::json!({
        "error": "An exception occurred during the search.",
        "message": description,
    })
    .to_string()
}

// ── Scripted backend ──────────────────────────────────────────────────────────

/// Answers from a queue of pre-seeded responses and records every query.
pub struct ScriptedSearch {
    responses: Mutex<VecDeque<Result<String, SearchError>>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn new(responses: Vec<Result<String, SearchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    fn search(&self, query: &str) -> Result<String, SearchError> {
        self.queries.lock().unwrap().push(query.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SearchError::Request("no scripted response left".into())))
    }

    /// Queries received so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SearchConfig {
        SearchConfig {
            api_url: "http://localhost:0/search".into(),
            search_depth: "advanced".into(),
            max_results: 5,
            include_answer: true,
            timeout_seconds: 1,
        }
    }

    #[tokio::test]
    async fn missing_key_short_circuits() {
        let tool = SearchTool::http(&test_config(), None).unwrap();
        let body = tool.search("anything").await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            parsed["error"],
            "Web search is not available. API key not configured."
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_becomes_exception_payload() {
        // Port 0 is unconnectable; the transport error must come back as a
        // JSON payload, not an Err.
        let tool = SearchTool::http(&test_config(), Some("key".into())).unwrap();
        let body = tool.search("anything").await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["error"], "An exception occurred during the search.");
        assert!(parsed["message"].is_string());
    }

    #[test]
    fn request_body_shape() {
        let payload = SearchRequest {
            query: "rust async",
            search_depth: "advanced",
            max_results: 5,
            include_answer: true,
            include_raw_content: false,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["query"], "rust async");
        assert_eq!(json["search_depth"], "advanced");
        assert_eq!(json["max_results"], 5);
        assert_eq!(json["include_answer"], true);
        assert_eq!(json["include_raw_content"], false);
    }

    #[test]
    fn status_payload_embeds_json_details() {
        let body = status_payload(502, r#"{"reason":"upstream"}"#);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["error"], "Search failed with status: 502");
        assert_eq!(parsed["details"]["reason"], "upstream");
    }

    #[test]
    fn status_payload_keeps_non_json_body_as_string() {
        let body = status_payload(500, "internal server error");
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["details"], "internal server error");
    }

    #[tokio::test]
    async fn scripted_replays_and_records() {
        let (tool, handle) = SearchTool::scripted(vec![
            Ok(r#"{"answer":"bar"}"#.to_string()),
            Err(SearchError::Request("boom".into())),
        ]);
        assert_eq!(tool.search("foo").await.unwrap(), r#"{"answer":"bar"}"#);
        assert!(tool.search("baz").await.is_err());
        assert_eq!(handle.queries(), vec!["foo", "baz"]);
    }
}
