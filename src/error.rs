//! Error types for the research engine.
//!
//! One crate-level enum covers the whole taxonomy. Transport failures are
//! the only retryable kind; everything else is either fatal for its step
//! or handled by the caller (context overflow triggers pruning, budget
//! exhaustion is a normal terminal state and has no variant here).

/// Errors that can occur during a research session.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    /// HTTP-level failure talking to an LLM or search backend, including
    /// timeouts. Retried with backoff up to the configured bound.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    /// The model could not produce schema-conforming output within the
    /// structured retry budget.
    #[error("structured output error: {message}")]
    StructuredOutput { message: String, content: String },

    /// A ReAct-format reply could not be decoded into a tool call.
    #[error("tool call parse error: {message}")]
    ToolParse { message: String, content: String },

    /// A tool invocation failed. Surfaced to the model as an error
    /// observation, never to the caller.
    #[error("tool '{name}' failed: {message}")]
    ToolInvocation { name: String, message: String },

    /// The assembled prompt does not fit the backend's context window.
    /// Never retried; the worker responds by pruning.
    #[error("prompt of ~{prompt_tokens} tokens exceeds context limit of {limit}")]
    ContextOverflow { prompt_tokens: usize, limit: usize },

    /// The caller's cancellation signal fired. No report is produced.
    #[error("research cancelled")]
    Cancelled,

    /// Invalid or incomplete configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A failure in the orchestration flow itself.
    #[error("orchestration error: {message}")]
    Orchestration { message: String },

    /// The configured provider name has no implementation.
    #[error("unsupported provider: {name}")]
    UnsupportedProvider { name: String },
}

impl ResearchError {
    /// Whether the error is worth retrying at the transport layer.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
