//! Model capability adaptation layer.
//!
//! A uniform interface over LLM backends that differ in whether they
//! natively support structured output and tool calling. The
//! [`adapter::ModelAdapter`] branches on the detected
//! [`capability::BackendProfile`]; everything above it is
//! capability-agnostic.

pub mod adapter;
pub mod capability;
pub mod openai;
pub mod provider;
pub mod schema;

use std::sync::Arc;

use crate::config::ResearchConfig;
use crate::error::ResearchError;

pub use adapter::{AdapterOptions, ModelAdapter, ToolTurn};
pub use capability::BackendProfile;
pub use openai::OpenAiProvider;
pub use provider::LlmProvider;

/// Creates an [`LlmProvider`] based on the configured provider name.
///
/// # Supported Providers
///
/// - `"openai"` (default) — OpenAI-compatible APIs via `async-openai`,
///   which also covers local inference servers exposing that wire format.
///
/// # Errors
///
/// Returns [`ResearchError::UnsupportedProvider`] for unknown provider
/// names.
pub fn create_provider(config: &ResearchConfig) -> Result<Arc<dyn LlmProvider>, ResearchError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(
            &config.api_key,
            config.base_url.as_deref(),
        ))),
        other => Err(ResearchError::UnsupportedProvider {
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_openai_provider() {
        let config = ResearchConfig::builder()
            .api_key("test")
            .provider("openai")
            .build()
            .unwrap_or_else(|_| unreachable!());
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap_or_else(|_| unreachable!()).name(), "openai");
    }

    #[test]
    fn test_create_unknown_provider() {
        let config = ResearchConfig::builder()
            .api_key("test")
            .provider("unknown")
            .build()
            .unwrap_or_else(|_| unreachable!());
        let result = create_provider(&config);
        assert!(matches!(
            result,
            Err(ResearchError::UnsupportedProvider { .. })
        ));
    }
}
