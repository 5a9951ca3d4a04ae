//! Pluggable LLM provider trait.
//!
//! Implementations translate provider-agnostic [`ChatRequest`]/[`ChatResponse`]
//! into provider-specific SDK calls. This keeps the orchestration logic
//! decoupled from any particular LLM vendor; the adapter layer above it
//! handles capability differences.

use async_trait::async_trait;

use crate::error::ResearchError;
use crate::message::{ChatRequest, ChatResponse};

/// Trait for LLM provider backends.
///
/// Implementations handle the transport layer (HTTP, SDK calls) for a
/// specific provider while presenting a uniform interface. Retries,
/// timeouts, and capability fallbacks live in
/// [`ModelAdapter`](super::adapter::ModelAdapter), not here.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`ResearchError::Transport`] on API failures or timeouts,
    /// [`ResearchError::ContextOverflow`] when the backend rejects the
    /// prompt as too long.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ResearchError>;
}
