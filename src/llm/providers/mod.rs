//! Provider construction from config.

pub mod openai_compatible;
pub mod scripted;

use crate::config::LlmConfig;
use crate::llm::{ModelSession, ProviderError, web_search_tool};

/// Build the configured provider. `api_key` comes from `LLM_API_KEY` env —
/// never TOML. Every provider advertises the web-search tool.
pub fn build(config: &LlmConfig, api_key: Option<String>) -> Result<ModelSession, ProviderError> {
    match config.provider.as_str() {
        "openai" => Ok(ModelSession::OpenAiCompatible(
            openai_compatible::OpenAiCompatibleProvider::new(
                config.api_base_url.clone(),
                config.model.clone(),
                config.temperature,
                config.timeout_seconds,
                api_key,
                vec![web_search_tool()],
            )?,
        )),
        "scripted" => Ok(ModelSession::scripted(Vec::new()).0),
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            api_base_url: "http://localhost:0/v1/chat/completions".into(),
            model: "test-model".into(),
            temperature: 0.0,
            timeout_seconds: 1,
        }
    }

    #[test]
    fn builds_known_providers() {
        assert!(build(&test_config("openai"), Some("key".into())).is_ok());
        assert!(build(&test_config("scripted"), None).is_ok());
    }

    #[test]
    fn unknown_provider_errors() {
        let err = build(&test_config("quantum"), None).unwrap_err();
        assert!(err.to_string().contains("quantum"));
    }
}
