//! Backend capability detection.
//!
//! Each backend is described by a [`BackendProfile`]: which native
//! features it has and how large its context window is. Capabilities are
//! detected from the model-family prefix; the default assumption is
//! "native" unless the family is on the known-missing list.

use std::time::Duration;

/// Model-family prefixes known to lack both native structured output and
/// native tool calling. These are driven via JSON-mode prompts and the
/// ReAct text protocol instead.
const NON_NATIVE_FAMILIES: &[&str] = &["ollama:", "llamacpp:", "together:", "groq:", "local:"];

/// Known context windows, matched by substring. Conservative default for
/// anything not listed.
const CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("gpt-5", 272_000),
    ("gpt-4.1", 1_047_576),
    ("gpt-4o-mini", 128_000),
    ("gpt-4o", 128_000),
    ("o3", 200_000),
    ("o4-mini", 200_000),
    ("claude-opus-4", 200_000),
    ("claude-sonnet-4", 200_000),
    ("claude-3-5-haiku", 200_000),
    ("ollama:llama3", 128_000),
    ("ollama:llama2", 4_096),
    ("ollama:mistral", 32_768),
    ("ollama:qwen", 32_768),
];

/// Fallback context window for unknown models.
const DEFAULT_CONTEXT_WINDOW: usize = 8_192;

/// A backend descriptor: model identity, native capabilities, context
/// window, and per-request timeout.
#[derive(Debug, Clone)]
pub struct BackendProfile {
    /// Full model identifier, possibly family-prefixed
    /// (e.g., `"ollama:llama3"`).
    pub model: String,
    /// Whether the backend accepts a response schema natively.
    pub native_structured: bool,
    /// Whether the backend has a native tool-calling interface.
    pub native_tools: bool,
    /// Context window in tokens.
    pub context_window: usize,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl BackendProfile {
    /// Detects a profile for the given model identifier.
    #[must_use]
    pub fn detect(model: &str, timeout: Duration) -> Self {
        let native = !is_non_native_family(model);
        Self {
            model: model.to_string(),
            native_structured: native,
            native_tools: native,
            context_window: context_window_for(model),
            timeout,
        }
    }

    /// The model identifier to send over the wire, with any known family
    /// prefix stripped (`"ollama:llama3"` → `"llama3"`).
    #[must_use]
    pub fn api_model(&self) -> &str {
        for family in NON_NATIVE_FAMILIES {
            if let Some(rest) = self.model.strip_prefix(family) {
                return rest;
            }
        }
        &self.model
    }
}

/// Whether the model belongs to a family without native structured
/// output or tool calling.
#[must_use]
pub fn is_non_native_family(model: &str) -> bool {
    let lowered = model.to_lowercase();
    NON_NATIVE_FAMILIES
        .iter()
        .any(|family| lowered.starts_with(family))
}

/// Looks up the context window for a model, falling back to a
/// conservative default.
#[must_use]
pub fn context_window_for(model: &str) -> usize {
    let lowered = model.to_lowercase();
    CONTEXT_WINDOWS
        .iter()
        .find(|(key, _)| lowered.contains(key))
        .map_or(DEFAULT_CONTEXT_WINDOW, |&(_, limit)| limit)
}
