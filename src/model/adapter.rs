//! Uniform LLM surface over heterogeneous backends.
//!
//! [`ModelAdapter`] exposes three operations — free-form completion,
//! schema-constrained completion, and tool-calling completion — and
//! bridges capability gaps per the backend's [`BackendProfile`]: backends
//! without native structured output are driven through JSON-mode prompts
//! with validation and re-prompting; backends without native tool calling
//! are driven through the ReAct text protocol. All capability branching
//! happens here, at the adapter boundary.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ResearchError;
use crate::message::{
    ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage, assistant_message, system_message,
    user_message,
};
use crate::model::capability::BackendProfile;
use crate::model::provider::LlmProvider;
use crate::model::schema;
use crate::react::{self, ReactStep};
use crate::tool::{ToolCall, ToolDefinition};

/// Base backoff delay between transport retries.
const BACKOFF_BASE_MS: u64 = 500;
/// Upper bound of the random jitter added to each backoff delay.
const BACKOFF_JITTER_MS: u64 = 250;

/// Per-adapter generation and retry settings.
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens per response.
    pub max_tokens: u32,
    /// Total attempts for schema-constrained output.
    pub max_structured_retries: u32,
    /// Additional attempts after a transport failure.
    pub max_transport_retries: u32,
    /// Additional attempts after an unparseable ReAct reply.
    pub react_parse_retries: u32,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 2_048,
            max_structured_retries: 3,
            max_transport_retries: 3,
            react_parse_retries: 2,
        }
    }
}

/// One tool-calling turn: optional narrative text plus zero or more
/// requested tool calls.
#[derive(Debug, Clone)]
pub struct ToolTurn {
    /// Narrative text accompanying the calls (or the final answer when
    /// no calls were made).
    pub text: String,
    /// Tool calls requested this turn. Empty means the model is done.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage for the turn, including ReAct parse retries.
    pub usage: TokenUsage,
}

/// Uniform callable surface over one LLM backend.
pub struct ModelAdapter {
    provider: Arc<dyn LlmProvider>,
    profile: BackendProfile,
    options: AdapterOptions,
}

impl ModelAdapter {
    /// Creates an adapter for the given provider and backend profile.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        profile: BackendProfile,
        options: AdapterOptions,
    ) -> Self {
        Self {
            provider,
            profile,
            options,
        }
    }

    /// The backend profile this adapter targets.
    #[must_use]
    pub const fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    /// Free-form text generation.
    ///
    /// # Errors
    ///
    /// Returns [`ResearchError::Transport`] after retry exhaustion, or
    /// [`ResearchError::ContextOverflow`] (never retried).
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ResearchError> {
        let request = self.base_request(messages.to_vec());
        self.chat_with_retry(&request).await
    }

    /// Schema-constrained generation. The returned value conforms to
    /// `output_schema`.
    ///
    /// Backends with native structured output get the schema directly.
    /// Others get a JSON-mode instruction; the reply is located, parsed,
    /// and validated, with validator feedback re-prompted up to the
    /// attempt budget. Both paths validate locally so a retry sequence
    /// that eventually validates is indistinguishable from a direct
    /// valid reply.
    ///
    /// # Errors
    ///
    /// Returns [`ResearchError::StructuredOutput`] when no attempt
    /// produced a conforming document, or transport errors per
    /// [`Self::complete`].
    pub async fn complete_structured(
        &self,
        messages: &[ChatMessage],
        output_schema: &Value,
    ) -> Result<(Value, TokenUsage), ResearchError> {
        let mut working = messages.to_vec();
        let mut request_template = self.base_request(Vec::new());
        if self.profile.native_structured {
            request_template.response_schema = Some(output_schema.clone());
        } else {
            request_template.json_mode = true;
            working.push(user_message(&schema::render_instruction(output_schema)));
        }

        let attempts = self.options.max_structured_retries.max(1);
        let mut usage = TokenUsage::default();

        for attempt in 1..=attempts {
            let mut request = request_template.clone();
            request.messages = working.clone();
            let response = self.chat_with_retry(&request).await?;
            usage.absorb(response.usage);

            match parse_against_schema(&response.content, output_schema) {
                Ok(value) => return Ok((value, usage)),
                Err(description) => {
                    debug!(attempt, %description, "structured output rejected");
                    if attempt == attempts {
                        return Err(ResearchError::StructuredOutput {
                            message: description,
                            content: response.content,
                        });
                    }
                    working.push(assistant_message(&response.content));
                    working.push(user_message(&format!(
                        "Your previous reply was invalid: {description}. \
                         Reply again with a single JSON document matching the required format."
                    )));
                }
            }
        }

        unreachable!("structured attempt loop always returns")
    }

    /// Schema-constrained generation deserialized into `T`.
    ///
    /// # Errors
    ///
    /// As [`Self::complete_structured`]; a document that validates but
    /// does not deserialize into `T` is a [`ResearchError::StructuredOutput`].
    pub async fn complete_structured_as<T: DeserializeOwned>(
        &self,
        messages: &[ChatMessage],
        output_schema: &Value,
    ) -> Result<(T, TokenUsage), ResearchError> {
        let (value, usage) = self.complete_structured(messages, output_schema).await?;
        let content = value.to_string();
        let typed = serde_json::from_value(value).map_err(|e| ResearchError::StructuredOutput {
            message: format!("validated document did not deserialize: {e}"),
            content,
        })?;
        Ok((typed, usage))
    }

    /// Tool-calling generation: zero or more tool calls plus optional
    /// narrative text.
    ///
    /// Backends with native tool calling get the definitions verbatim.
    /// Others are driven through the ReAct protocol with a bounded
    /// per-step parse-retry budget; when that budget is exhausted the
    /// step ends with no tool calls.
    ///
    /// # Errors
    ///
    /// Transport errors per [`Self::complete`].
    pub async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ToolTurn, ResearchError> {
        if self.profile.native_tools {
            let mut request = self.base_request(messages.to_vec());
            request.tools = tools.to_vec();
            let response = self.chat_with_retry(&request).await?;
            return Ok(ToolTurn {
                text: response.content,
                tool_calls: response.tool_calls,
                usage: response.usage,
            });
        }

        self.react_tool_turn(messages, tools).await
    }

    /// One tool turn over the ReAct text protocol.
    async fn react_tool_turn(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ToolTurn, ResearchError> {
        let preamble = react::render_preamble(tools);
        let mut working: Vec<ChatMessage> = messages.to_vec();
        match working.first_mut() {
            Some(first) if first.role == Role::System => {
                first.content = format!("{}\n\n{preamble}", first.content);
            }
            _ => working.insert(0, system_message(&preamble)),
        }

        let mut usage = TokenUsage::default();
        let mut parse_failures = 0u32;

        loop {
            let request = self.base_request(working.clone());
            let response = self.chat_with_retry(&request).await?;
            usage.absorb(response.usage);

            match react::decode(&response.content) {
                Ok(ReactStep::Final { answer, .. }) => {
                    return Ok(ToolTurn {
                        text: answer,
                        tool_calls: Vec::new(),
                        usage,
                    });
                }
                Ok(ReactStep::Call {
                    thought,
                    name,
                    arguments,
                }) => {
                    let call = ToolCall {
                        id: format!("react-{}", working.len()),
                        name,
                        arguments: arguments.to_string(),
                    };
                    return Ok(ToolTurn {
                        text: thought,
                        tool_calls: vec![call],
                        usage,
                    });
                }
                Err(error) => {
                    if parse_failures >= self.options.react_parse_retries {
                        warn!(%error, "ReAct parse retries exhausted, ending step without tool calls");
                        return Ok(ToolTurn {
                            text: response.content,
                            tool_calls: Vec::new(),
                            usage,
                        });
                    }
                    parse_failures += 1;
                    debug!(parse_failures, %error, "unparseable ReAct reply, nudging");
                    working.push(assistant_message(&response.content));
                    working.push(user_message(&react::render_observation(
                        react::PARSE_RETRY_NUDGE,
                    )));
                }
            }
        }
    }

    /// Shapes the base request for this backend.
    fn base_request(&self, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            model: self.profile.api_model().to_string(),
            messages,
            temperature: Some(self.options.temperature),
            max_tokens: Some(self.options.max_tokens),
            json_mode: false,
            response_schema: None,
            tools: Vec::new(),
        }
    }

    /// Executes a request with per-request timeout and bounded retry on
    /// transport failures. Context overflow is never retried.
    async fn chat_with_retry(&self, request: &ChatRequest) -> Result<ChatResponse, ResearchError> {
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::time::timeout(self.profile.timeout, self.provider.chat(request));
            let error = match outcome.await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) if e.is_retryable() => e,
                Ok(Err(e)) => return Err(e),
                Err(_) => ResearchError::Transport {
                    message: format!(
                        "request to {} timed out after {:?}",
                        self.provider.name(),
                        self.profile.timeout
                    ),
                    status: None,
                },
            };

            if attempt >= self.options.max_transport_retries {
                return Err(error);
            }
            let delay = backoff_delay(attempt);
            warn!(attempt, %error, ?delay, "transport failure, backing off");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl std::fmt::Debug for ModelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAdapter")
            .field("provider", &self.provider.name())
            .field("profile", &self.profile)
            .field("options", &self.options)
            .finish()
    }
}

/// Locates, parses, and validates a JSON document in reply text.
fn parse_against_schema(content: &str, output_schema: &Value) -> Result<Value, String> {
    let json_text =
        schema::extract_json(content).ok_or_else(|| "no JSON document in reply".to_string())?;
    let value: Value =
        serde_json::from_str(json_text).map_err(|e| format!("JSON did not parse: {e}"))?;
    schema::validate(output_schema, &value)?;
    Ok(value)
}

/// Exponential backoff with random jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let exponential = BACKOFF_BASE_MS.saturating_mul(1 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
    Duration::from_millis(exponential + jitter)
}
