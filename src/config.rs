//! Research engine configuration with builder pattern and environment
//! variable support.
//!
//! Configuration is resolved in order: explicit values → environment
//! variables → defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ResearchError;

/// Default parallel worker cap.
const DEFAULT_MAX_CONCURRENT_UNITS: usize = 3;
/// Default supervisor loop cap.
const DEFAULT_MAX_SUPERVISOR_ITERATIONS: usize = 6;
/// Default per-worker loop cap.
const DEFAULT_MAX_WORKER_ITERATIONS: usize = 6;
/// Default supervisor tool-call budget.
const DEFAULT_MAX_TOTAL_TOOL_CALLS: usize = 10;
/// Default per-worker tool-call budget.
const DEFAULT_MAX_WORKER_TOOL_CALLS: usize = 10;
/// Default raw-content truncation before summarization (characters).
const DEFAULT_MAX_CONTENT_LENGTH: usize = 50_000;
/// Default structured-output retry bound.
const DEFAULT_MAX_STRUCTURED_RETRIES: u32 = 3;
/// Default transport retry bound.
const DEFAULT_MAX_TRANSPORT_RETRIES: u32 = 3;
/// Default per-step ReAct parse retry bound.
const DEFAULT_REACT_PARSE_RETRIES: u32 = 2;
/// Default search results per query.
const DEFAULT_MAX_RESULTS_PER_QUERY: usize = 5;
/// Default concurrent queries per search tool call.
const DEFAULT_SEARCH_CONCURRENCY: usize = 4;
/// Default LLM request timeout in seconds.
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
/// Default search request timeout in seconds.
const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 20;
/// Default token reserve left for the model's response when pruning.
const DEFAULT_RESPONSE_RESERVE_TOKENS: usize = 4_096;
/// Default count of trailing observations protected from pruning.
const DEFAULT_PRESERVED_OBSERVATIONS: usize = 6;
/// Default supervisor max tokens.
const DEFAULT_SUPERVISOR_MAX_TOKENS: u32 = 4_096;
/// Default worker max tokens. Set high so compression input survives
/// dense evidence without truncation.
const DEFAULT_WORKER_MAX_TOKENS: u32 = 8_192;
/// Default summarization max tokens.
const DEFAULT_SUMMARIZATION_MAX_TOKENS: u32 = 1_024;
/// Default final report max tokens.
const DEFAULT_REPORT_MAX_TOKENS: u32 = 8_192;
/// Default search endpoint (local SearXNG instance).
const DEFAULT_SEARCH_ENDPOINT: &str = "http://localhost:8888";

/// Configuration for the research engine.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// LLM provider name (e.g., "openai").
    pub provider: String,
    /// API key for the provider.
    pub api_key: String,
    /// Optional base URL override (for proxies or compatible APIs).
    pub base_url: Option<String>,
    /// Model driving the supervisor loop.
    pub supervisor_model: String,
    /// Model driving worker research loops.
    pub worker_model: String,
    /// Model producing per-result search summaries.
    pub summarization_model: String,
    /// Model writing the final report.
    pub final_report_model: String,
    /// Parallel worker cap, ≥ 1.
    pub max_concurrent_units: usize,
    /// Supervisor loop cap, ≥ 1.
    pub max_supervisor_iterations: usize,
    /// Per-worker loop cap, ≥ 1.
    pub max_worker_iterations: usize,
    /// Supervisor-wide tool-call budget.
    pub max_total_tool_calls: usize,
    /// Per-worker tool-call budget.
    pub max_worker_tool_calls: usize,
    /// Raw-content truncation before summarization (characters).
    pub max_content_length: usize,
    /// Structured-output retry bound.
    pub max_structured_retries: u32,
    /// Transport retry bound.
    pub max_transport_retries: u32,
    /// Per-step ReAct parse retry bound.
    pub react_parse_retries: u32,
    /// Whether the clarify phase runs before briefing.
    pub allow_clarification: bool,
    /// Search provider name (e.g., "searxng").
    pub search_provider: String,
    /// Base URL of the search service.
    pub search_endpoint: String,
    /// Search results taken per query.
    pub max_results_per_query: usize,
    /// Concurrent queries per search tool call.
    pub search_concurrency: usize,
    /// Language every prompt instructs the models to answer in.
    pub response_language: Option<String>,
    /// Per-request LLM timeout.
    pub llm_timeout: Duration,
    /// Per-request search timeout.
    pub search_timeout: Duration,
    /// Minimum delay between worker spawns after acquiring a permit.
    /// `Duration::ZERO` (default) disables pacing beyond the semaphore.
    pub request_delay: Duration,
    /// Token reserve left for the response when checking context fit.
    pub response_reserve_tokens: usize,
    /// Trailing observations protected from pruning.
    pub preserved_observations: usize,
    /// Maximum tokens for supervisor turns.
    pub supervisor_max_tokens: u32,
    /// Maximum tokens for worker turns and compression.
    pub worker_max_tokens: u32,
    /// Maximum tokens for search summarization.
    pub summarization_max_tokens: u32,
    /// Maximum tokens for the final report.
    pub report_max_tokens: u32,
    /// Directory containing prompt template overrides.
    pub prompt_dir: Option<PathBuf>,
}

impl ResearchConfig {
    /// Creates a new builder for `ResearchConfig`.
    #[must_use]
    pub fn builder() -> ResearchConfigBuilder {
        ResearchConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ResearchError::Config`] if no API key is found or a cap
    /// is set to zero.
    pub fn from_env() -> Result<Self, ResearchError> {
        Self::builder().from_env().build()
    }
}

/// Builder for [`ResearchConfig`].
#[derive(Debug, Clone, Default)]
pub struct ResearchConfigBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    supervisor_model: Option<String>,
    worker_model: Option<String>,
    summarization_model: Option<String>,
    final_report_model: Option<String>,
    max_concurrent_units: Option<usize>,
    max_supervisor_iterations: Option<usize>,
    max_worker_iterations: Option<usize>,
    max_total_tool_calls: Option<usize>,
    max_worker_tool_calls: Option<usize>,
    max_content_length: Option<usize>,
    max_structured_retries: Option<u32>,
    max_transport_retries: Option<u32>,
    react_parse_retries: Option<u32>,
    allow_clarification: Option<bool>,
    search_provider: Option<String>,
    search_endpoint: Option<String>,
    max_results_per_query: Option<usize>,
    search_concurrency: Option<usize>,
    response_language: Option<String>,
    llm_timeout: Option<Duration>,
    search_timeout: Option<Duration>,
    request_delay: Option<Duration>,
    response_reserve_tokens: Option<usize>,
    preserved_observations: Option<usize>,
    supervisor_max_tokens: Option<u32>,
    worker_max_tokens: Option<u32>,
    summarization_max_tokens: Option<u32>,
    report_max_tokens: Option<u32>,
    prompt_dir: Option<PathBuf>,
}

impl ResearchConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.provider.is_none() {
            self.provider = std::env::var("DELVER_PROVIDER").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("OPENAI_API_KEY")
                .or_else(|_| std::env::var("DELVER_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("OPENAI_BASE_URL")
                .or_else(|_| std::env::var("DELVER_BASE_URL"))
                .ok();
        }
        if self.supervisor_model.is_none() {
            self.supervisor_model = std::env::var("DELVER_SUPERVISOR_MODEL").ok();
        }
        if self.worker_model.is_none() {
            self.worker_model = std::env::var("DELVER_WORKER_MODEL").ok();
        }
        if self.summarization_model.is_none() {
            self.summarization_model = std::env::var("DELVER_SUMMARIZATION_MODEL").ok();
        }
        if self.final_report_model.is_none() {
            self.final_report_model = std::env::var("DELVER_REPORT_MODEL").ok();
        }
        if self.search_endpoint.is_none() {
            self.search_endpoint = std::env::var("DELVER_SEARCH_ENDPOINT").ok();
        }
        if self.max_concurrent_units.is_none() {
            self.max_concurrent_units = std::env::var("DELVER_MAX_CONCURRENT_UNITS")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.max_supervisor_iterations.is_none() {
            self.max_supervisor_iterations = std::env::var("DELVER_MAX_SUPERVISOR_ITERATIONS")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.response_language.is_none() {
            self.response_language = std::env::var("DELVER_RESPONSE_LANGUAGE").ok();
        }
        if self.prompt_dir.is_none() {
            self.prompt_dir = std::env::var("DELVER_PROMPT_DIR").ok().map(PathBuf::from);
        }
        self
    }

    /// Sets the LLM provider name.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the supervisor model.
    #[must_use]
    pub fn supervisor_model(mut self, model: impl Into<String>) -> Self {
        self.supervisor_model = Some(model.into());
        self
    }

    /// Sets the worker model.
    #[must_use]
    pub fn worker_model(mut self, model: impl Into<String>) -> Self {
        self.worker_model = Some(model.into());
        self
    }

    /// Sets the summarization model.
    #[must_use]
    pub fn summarization_model(mut self, model: impl Into<String>) -> Self {
        self.summarization_model = Some(model.into());
        self
    }

    /// Sets the final report model.
    #[must_use]
    pub fn final_report_model(mut self, model: impl Into<String>) -> Self {
        self.final_report_model = Some(model.into());
        self
    }

    /// Sets the parallel worker cap.
    #[must_use]
    pub const fn max_concurrent_units(mut self, n: usize) -> Self {
        self.max_concurrent_units = Some(n);
        self
    }

    /// Sets the supervisor loop cap.
    #[must_use]
    pub const fn max_supervisor_iterations(mut self, n: usize) -> Self {
        self.max_supervisor_iterations = Some(n);
        self
    }

    /// Sets the per-worker loop cap.
    #[must_use]
    pub const fn max_worker_iterations(mut self, n: usize) -> Self {
        self.max_worker_iterations = Some(n);
        self
    }

    /// Sets the supervisor tool-call budget.
    #[must_use]
    pub const fn max_total_tool_calls(mut self, n: usize) -> Self {
        self.max_total_tool_calls = Some(n);
        self
    }

    /// Sets the per-worker tool-call budget.
    #[must_use]
    pub const fn max_worker_tool_calls(mut self, n: usize) -> Self {
        self.max_worker_tool_calls = Some(n);
        self
    }

    /// Sets the raw-content truncation limit.
    #[must_use]
    pub const fn max_content_length(mut self, n: usize) -> Self {
        self.max_content_length = Some(n);
        self
    }

    /// Sets the structured-output retry bound.
    #[must_use]
    pub const fn max_structured_retries(mut self, n: u32) -> Self {
        self.max_structured_retries = Some(n);
        self
    }

    /// Sets the transport retry bound.
    #[must_use]
    pub const fn max_transport_retries(mut self, n: u32) -> Self {
        self.max_transport_retries = Some(n);
        self
    }

    /// Sets the per-step ReAct parse retry bound.
    #[must_use]
    pub const fn react_parse_retries(mut self, n: u32) -> Self {
        self.react_parse_retries = Some(n);
        self
    }

    /// Enables or disables the clarify phase.
    #[must_use]
    pub const fn allow_clarification(mut self, enabled: bool) -> Self {
        self.allow_clarification = Some(enabled);
        self
    }

    /// Sets the search provider name.
    #[must_use]
    pub fn search_provider(mut self, name: impl Into<String>) -> Self {
        self.search_provider = Some(name.into());
        self
    }

    /// Sets the search service base URL.
    #[must_use]
    pub fn search_endpoint(mut self, url: impl Into<String>) -> Self {
        self.search_endpoint = Some(url.into());
        self
    }

    /// Sets the search results taken per query.
    #[must_use]
    pub const fn max_results_per_query(mut self, n: usize) -> Self {
        self.max_results_per_query = Some(n);
        self
    }

    /// Sets the concurrent queries per search call.
    #[must_use]
    pub const fn search_concurrency(mut self, n: usize) -> Self {
        self.search_concurrency = Some(n);
        self
    }

    /// Sets the response language for all prompts.
    #[must_use]
    pub fn response_language(mut self, lang: impl Into<String>) -> Self {
        self.response_language = Some(lang.into());
        self
    }

    /// Sets the LLM request timeout.
    #[must_use]
    pub const fn llm_timeout(mut self, duration: Duration) -> Self {
        self.llm_timeout = Some(duration);
        self
    }

    /// Sets the search request timeout.
    #[must_use]
    pub const fn search_timeout(mut self, duration: Duration) -> Self {
        self.search_timeout = Some(duration);
        self
    }

    /// Sets the minimum delay between worker spawns.
    #[must_use]
    pub const fn request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = Some(delay);
        self
    }

    /// Sets the response token reserve used during pruning.
    #[must_use]
    pub const fn response_reserve_tokens(mut self, n: usize) -> Self {
        self.response_reserve_tokens = Some(n);
        self
    }

    /// Sets the count of trailing observations protected from pruning.
    #[must_use]
    pub const fn preserved_observations(mut self, n: usize) -> Self {
        self.preserved_observations = Some(n);
        self
    }

    /// Sets the supervisor max tokens.
    #[must_use]
    pub const fn supervisor_max_tokens(mut self, n: u32) -> Self {
        self.supervisor_max_tokens = Some(n);
        self
    }

    /// Sets the worker max tokens.
    #[must_use]
    pub const fn worker_max_tokens(mut self, n: u32) -> Self {
        self.worker_max_tokens = Some(n);
        self
    }

    /// Sets the summarization max tokens.
    #[must_use]
    pub const fn summarization_max_tokens(mut self, n: u32) -> Self {
        self.summarization_max_tokens = Some(n);
        self
    }

    /// Sets the final report max tokens.
    #[must_use]
    pub const fn report_max_tokens(mut self, n: u32) -> Self {
        self.report_max_tokens = Some(n);
        self
    }

    /// Sets the prompt template directory.
    #[must_use]
    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_dir = Some(dir.into());
        self
    }

    /// Builds the [`ResearchConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ResearchError::Config`] if no API key was set or any
    /// cap that must be ≥ 1 is zero.
    pub fn build(self) -> Result<ResearchConfig, ResearchError> {
        let api_key = self.api_key.ok_or_else(|| ResearchError::Config {
            message: "no API key set (OPENAI_API_KEY or DELVER_API_KEY)".to_string(),
        })?;

        let config = ResearchConfig {
            provider: self.provider.unwrap_or_else(|| "openai".to_string()),
            api_key,
            base_url: self.base_url,
            supervisor_model: self
                .supervisor_model
                .unwrap_or_else(|| "gpt-5.2-2025-12-11".to_string()),
            worker_model: self
                .worker_model
                .unwrap_or_else(|| "gpt-5-mini-2025-08-07".to_string()),
            summarization_model: self
                .summarization_model
                .unwrap_or_else(|| "gpt-5-mini-2025-08-07".to_string()),
            final_report_model: self
                .final_report_model
                .unwrap_or_else(|| "gpt-5.2-2025-12-11".to_string()),
            max_concurrent_units: self
                .max_concurrent_units
                .unwrap_or(DEFAULT_MAX_CONCURRENT_UNITS),
            max_supervisor_iterations: self
                .max_supervisor_iterations
                .unwrap_or(DEFAULT_MAX_SUPERVISOR_ITERATIONS),
            max_worker_iterations: self
                .max_worker_iterations
                .unwrap_or(DEFAULT_MAX_WORKER_ITERATIONS),
            max_total_tool_calls: self
                .max_total_tool_calls
                .unwrap_or(DEFAULT_MAX_TOTAL_TOOL_CALLS),
            max_worker_tool_calls: self
                .max_worker_tool_calls
                .unwrap_or(DEFAULT_MAX_WORKER_TOOL_CALLS),
            max_content_length: self.max_content_length.unwrap_or(DEFAULT_MAX_CONTENT_LENGTH),
            max_structured_retries: self
                .max_structured_retries
                .unwrap_or(DEFAULT_MAX_STRUCTURED_RETRIES),
            max_transport_retries: self
                .max_transport_retries
                .unwrap_or(DEFAULT_MAX_TRANSPORT_RETRIES),
            react_parse_retries: self
                .react_parse_retries
                .unwrap_or(DEFAULT_REACT_PARSE_RETRIES),
            allow_clarification: self.allow_clarification.unwrap_or(false),
            search_provider: self.search_provider.unwrap_or_else(|| "searxng".to_string()),
            search_endpoint: self
                .search_endpoint
                .unwrap_or_else(|| DEFAULT_SEARCH_ENDPOINT.to_string()),
            max_results_per_query: self
                .max_results_per_query
                .unwrap_or(DEFAULT_MAX_RESULTS_PER_QUERY),
            search_concurrency: self.search_concurrency.unwrap_or(DEFAULT_SEARCH_CONCURRENCY),
            response_language: self.response_language,
            llm_timeout: self
                .llm_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS)),
            search_timeout: self
                .search_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_SEARCH_TIMEOUT_SECS)),
            request_delay: self.request_delay.unwrap_or(Duration::ZERO),
            response_reserve_tokens: self
                .response_reserve_tokens
                .unwrap_or(DEFAULT_RESPONSE_RESERVE_TOKENS),
            preserved_observations: self
                .preserved_observations
                .unwrap_or(DEFAULT_PRESERVED_OBSERVATIONS),
            supervisor_max_tokens: self
                .supervisor_max_tokens
                .unwrap_or(DEFAULT_SUPERVISOR_MAX_TOKENS),
            worker_max_tokens: self.worker_max_tokens.unwrap_or(DEFAULT_WORKER_MAX_TOKENS),
            summarization_max_tokens: self
                .summarization_max_tokens
                .unwrap_or(DEFAULT_SUMMARIZATION_MAX_TOKENS),
            report_max_tokens: self.report_max_tokens.unwrap_or(DEFAULT_REPORT_MAX_TOKENS),
            prompt_dir: self.prompt_dir,
        };

        for (name, value) in [
            ("max_concurrent_units", config.max_concurrent_units),
            ("max_supervisor_iterations", config.max_supervisor_iterations),
            ("max_worker_iterations", config.max_worker_iterations),
            ("max_results_per_query", config.max_results_per_query),
            ("search_concurrency", config.search_concurrency),
        ] {
            if value == 0 {
                return Err(ResearchError::Config {
                    message: format!("{name} must be at least 1"),
                });
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ResearchConfig::builder()
            .api_key("test-key")
            .build()
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(config.provider, "openai");
        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.max_concurrent_units, DEFAULT_MAX_CONCURRENT_UNITS);
        assert_eq!(
            config.max_supervisor_iterations,
            DEFAULT_MAX_SUPERVISOR_ITERATIONS
        );
        assert_eq!(config.max_total_tool_calls, DEFAULT_MAX_TOTAL_TOOL_CALLS);
        assert_eq!(config.search_provider, "searxng");
        assert!(!config.allow_clarification);
        assert_eq!(config.llm_timeout, Duration::from_secs(120));
        assert_eq!(config.search_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_builder_missing_api_key() {
        let result = ResearchConfig::builder().build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_zero_caps() {
        let result = ResearchConfig::builder()
            .api_key("key")
            .max_concurrent_units(0)
            .build();
        assert!(matches!(result, Err(ResearchError::Config { .. })));
    }

    #[test]
    fn test_builder_custom_values() {
        let config = ResearchConfig::builder()
            .api_key("key")
            .provider("custom")
            .worker_model("gpt-5-mini-2025-08-07")
            .max_concurrent_units(2)
            .max_supervisor_iterations(1)
            .allow_clarification(true)
            .search_endpoint("http://searx.internal:8080")
            .llm_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(config.provider, "custom");
        assert_eq!(config.worker_model, "gpt-5-mini-2025-08-07");
        assert_eq!(config.max_concurrent_units, 2);
        assert_eq!(config.max_supervisor_iterations, 1);
        assert!(config.allow_clarification);
        assert_eq!(config.search_endpoint, "http://searx.internal:8080");
        assert_eq!(config.llm_timeout, Duration::from_secs(30));
    }
}
