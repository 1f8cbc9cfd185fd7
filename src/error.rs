//! Application-wide error types.

use thiserror::Error;

use crate::chat::TransportError;
use crate::llm::ProviderError;
use crate::search::SearchError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("model session error: {0}")]
    Provider(#[from] ProviderError),

    #[error("chat transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("search error: {0}")]
    Search(#[from] SearchError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn logger_error_display() {
        let e = AppError::Logger("already initialized".into());
        assert!(e.to_string().contains("already initialized"));
    }

    #[test]
    fn provider_error_converts() {
        let e: AppError = ProviderError::Request("timed out".into()).into();
        assert!(e.to_string().contains("model session error"));
        assert!(e.to_string().contains("timed out"));
        // satisfies std::error::Error trait
        let _: &dyn Error = &e;
    }

    #[test]
    fn transport_error_converts() {
        let e: AppError = TransportError::Request("connection refused".into()).into();
        assert!(e.to_string().contains("chat transport error"));
    }
}
