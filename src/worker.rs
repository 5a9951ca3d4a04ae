//! Worker researcher: drives one sub-question to compressed, cited
//! findings.
//!
//! Each worker owns a private conversation seeded from the brief and its
//! sub-question, loops over search/reflect tool calls bounded by the
//! task's iteration and tool-call caps, and finishes with a compression
//! step that turns its notes into schema-constrained cited claims.
//! Workers never mutate supervisor state and never return an error:
//! every failure mode is a [`WorkerFindings`] with the matching status.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dispatch::ToolDispatcher;
use crate::error::ResearchError;
use crate::message::{
    ChatMessage, Role, TokenUsage, assistant_message, assistant_tool_calls_message,
    observation_message, system_message, user_message,
};
use crate::model::ModelAdapter;
use crate::prompt::{PromptSet, build_compress_prompt, build_worker_system_prompt, with_language};
use crate::search::SearchResult;
use crate::state::{Brief, CompressedClaims, FindingStatus, Source, WorkerFindings, WorkerTask};

/// Schema for the compression step's output.
fn compression_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "claims": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "source_indices": {
                            "type": "array",
                            "items": { "type": "integer" }
                        }
                    },
                    "required": ["text", "source_indices"]
                }
            },
            "sources": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "url": { "type": "string" },
                        "title": { "type": "string" }
                    },
                    "required": ["url", "title"]
                }
            }
        },
        "required": ["claims", "sources"]
    })
}

/// A worker researcher bound to one model adapter and tool dispatcher.
pub struct Worker {
    adapter: Arc<ModelAdapter>,
    dispatcher: Arc<ToolDispatcher>,
    prompts: Arc<PromptSet>,
    response_language: Option<String>,
    response_reserve_tokens: usize,
    preserved_observations: usize,
}

impl Worker {
    /// Creates a worker.
    #[must_use]
    pub fn new(
        adapter: Arc<ModelAdapter>,
        dispatcher: Arc<ToolDispatcher>,
        prompts: Arc<PromptSet>,
        response_language: Option<String>,
        response_reserve_tokens: usize,
        preserved_observations: usize,
    ) -> Self {
        Self {
            adapter,
            dispatcher,
            prompts,
            response_language,
            response_reserve_tokens,
            preserved_observations,
        }
    }

    /// Runs the task to completion.
    ///
    /// Infallible by contract: errors and cancellation become findings
    /// with status [`FindingStatus::Failed`].
    pub async fn run(
        &self,
        task: &WorkerTask,
        brief: &Brief,
        cancel: &CancellationToken,
    ) -> WorkerFindings {
        let system = with_language(
            &build_worker_system_prompt(&self.prompts.worker, brief, &task.sub_question),
            self.response_language.as_deref(),
        );
        let mut messages = vec![
            system_message(&system),
            user_message("Begin your research."),
        ];

        let mut notes: Vec<String> = Vec::new();
        let mut collected: Vec<SearchResult> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut tool_calls_used = 0usize;
        let mut status = FindingStatus::Exhausted;
        let mut failure: Option<String> = None;

        let context_window = self.adapter.profile().context_window;

        'research: for iteration in 0..task.max_iterations {
            if cancel.is_cancelled() {
                return self.cancelled(task, notes, usage);
            }

            if !prune_conversation(
                &mut messages,
                context_window,
                self.response_reserve_tokens,
                self.preserved_observations,
            ) {
                debug!(task_id = task.id, "pruning cannot fit context, exhausting");
                break 'research;
            }

            let turn = match self
                .adapter
                .complete_with_tools(&messages, self.dispatcher.tool_set().definitions())
                .await
            {
                Ok(turn) => turn,
                Err(ResearchError::Cancelled) => {
                    return self.cancelled(task, notes, usage);
                }
                Err(ResearchError::ContextOverflow { .. }) => {
                    // The backend rejected a prompt our estimate thought
                    // fit. Prune against a halved window and try again.
                    if prune_conversation(
                        &mut messages,
                        context_window / 2,
                        self.response_reserve_tokens,
                        self.preserved_observations,
                    ) {
                        continue 'research;
                    }
                    break 'research;
                }
                Err(error) => {
                    warn!(task_id = task.id, %error, "worker model call failed");
                    failure = Some(error.to_string());
                    status = FindingStatus::Failed;
                    break 'research;
                }
            };
            usage.absorb(turn.usage);

            if turn.tool_calls.is_empty() {
                // Native: empty tool-call list; ReAct: Final Answer.
                if !turn.text.is_empty() {
                    notes.push(turn.text.clone());
                    messages.push(assistant_message(&turn.text));
                }
                debug!(task_id = task.id, iteration, "worker signalled completion");
                status = FindingStatus::Complete;
                break 'research;
            }

            messages.push(assistant_tool_calls_message(&turn.text, turn.tool_calls.clone()));

            for call in &turn.tool_calls {
                if tool_calls_used >= task.max_tool_calls {
                    debug!(task_id = task.id, "worker tool budget hit");
                    break 'research;
                }
                if cancel.is_cancelled() {
                    return self.cancelled(task, notes, usage);
                }
                tool_calls_used += 1;

                let outcome = self.dispatcher.execute(call).await;
                debug!(
                    task_id = task.id,
                    tool = call.name,
                    is_error = outcome.result.is_error,
                    "worker tool call dispatched"
                );
                notes.push(outcome.result.content.clone());
                collected.extend(outcome.search_results);
                messages.push(observation_message(
                    &outcome.result.tool_call_id,
                    &outcome.result.content,
                ));
            }
        }

        if status == FindingStatus::Failed {
            let mut findings = WorkerFindings::failed(
                &task.id,
                failure.unwrap_or_else(|| "worker failed".to_string()),
                notes,
            );
            findings.usage = usage;
            return findings;
        }

        if cancel.is_cancelled() {
            return self.cancelled(task, notes, usage);
        }

        self.compress(task, status, notes, &collected, usage).await
    }

    /// Compression step: distills notes and search results into cited
    /// claims. A worker with no citable sources skips the model call and
    /// returns empty findings.
    async fn compress(
        &self,
        task: &WorkerTask,
        status: FindingStatus,
        notes: Vec<String>,
        collected: &[SearchResult],
        mut usage: TokenUsage,
    ) -> WorkerFindings {
        let consulted = dedup_sources(collected);
        if consulted.is_empty() {
            return WorkerFindings {
                task_id: task.id.clone(),
                compressed_text: String::new(),
                raw_notes: notes,
                sources: Vec::new(),
                status,
                error: None,
                usage,
            };
        }

        let compress_prompt = with_language(&self.prompts.compress, self.response_language.as_deref());
        let messages = [
            system_message(&compress_prompt),
            user_message(&build_compress_prompt(&task.sub_question, &notes, &consulted)),
        ];

        match self
            .adapter
            .complete_structured_as::<CompressedClaims>(&messages, &compression_schema())
            .await
        {
            Ok((compressed, compress_usage)) => {
                usage.absorb(compress_usage);
                let compressed = compressed.sanitized();
                WorkerFindings {
                    task_id: task.id.clone(),
                    compressed_text: compressed.render_bullets(),
                    raw_notes: notes,
                    sources: compressed.sources,
                    status,
                    error: None,
                    usage,
                }
            }
            Err(error) => {
                warn!(task_id = task.id, %error, "compression failed");
                let mut findings =
                    WorkerFindings::failed(&task.id, format!("compression failed: {error}"), notes);
                findings.usage = usage;
                findings
            }
        }
    }

    fn cancelled(
        &self,
        task: &WorkerTask,
        notes: Vec<String>,
        usage: TokenUsage,
    ) -> WorkerFindings {
        let mut findings = WorkerFindings::failed(&task.id, "cancelled", notes);
        findings.usage = usage;
        findings
    }
}

/// Deduplicates search results by URL, in first-seen order, into a
/// citable source list.
fn dedup_sources(results: &[SearchResult]) -> Vec<Source> {
    let mut seen = std::collections::HashSet::new();
    let mut sources = Vec::new();
    for result in results {
        if seen.insert(result.url.clone()) {
            sources.push(Source {
                url: result.url.clone(),
                title: result.title.clone(),
            });
        }
    }
    sources
}

/// Rough prompt-size estimate: total content bytes over four.
fn estimated_tokens(messages: &[ChatMessage]) -> usize {
    let bytes: usize = messages
        .iter()
        .map(|m| {
            m.content.len()
                + m.tool_calls
                    .iter()
                    .map(|c| c.name.len() + c.arguments.len())
                    .sum::<usize>()
        })
        .sum();
    bytes / 4
}

/// Prunes the oldest non-system messages until the estimated prompt fits
/// `context_window - reserve`, preserving the system prompt and the tail
/// window starting at the N-th-from-last observation.
///
/// Returns whether the conversation now fits.
pub(crate) fn prune_conversation(
    messages: &mut Vec<ChatMessage>,
    context_window: usize,
    reserve: usize,
    preserved_observations: usize,
) -> bool {
    let target = context_window.saturating_sub(reserve);
    if estimated_tokens(messages) <= target {
        return true;
    }

    // Start of the protected tail: the N-th observation from the end.
    // Everything from there on (observations and the assistant turns
    // between them) stays.
    let mut protected_start = messages.len();
    let mut seen = 0usize;
    for i in (0..messages.len()).rev() {
        if messages[i].role == Role::Observation {
            seen += 1;
            protected_start = i;
            if seen == preserved_observations {
                break;
            }
        }
    }

    while estimated_tokens(messages) > target && protected_start > 1 {
        messages.remove(1);
        protected_start -= 1;
    }

    estimated_tokens(messages) <= target
}
