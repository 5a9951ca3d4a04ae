//! Supervisor: plans research, fans out workers, collects findings,
//! decides termination.
//!
//! The supervisor is single-flow: one reflection/decision step per
//! iteration. Worker units issued in one turn run concurrently under a
//! semaphore bounded by `max_concurrent_units`; their findings are
//! appended to the supervisor transcript in task-submission order
//! regardless of completion order, so the transcript is deterministic
//! given the same inputs and model outputs.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ResearchConfig;
use crate::dispatch::ToolDispatcher;
use crate::error::ResearchError;
use crate::message::{
    ChatMessage, assistant_tool_calls_message, observation_message, system_message, user_message,
};
use crate::model::{
    AdapterOptions, BackendProfile, LlmProvider, ModelAdapter, create_provider,
};
use crate::prompt::{PromptSet, build_supervisor_user_msg, with_language};
use crate::report::Synthesizer;
use crate::search::{SearchProvider, SearxngSearch};
use crate::state::{
    Brief, ClarifyDecision, FindingStatus, ResearchOutcome, SupervisorState, Termination,
    WorkerFindings, WorkerTask,
};
use crate::tool::{self, ToolCall};
use crate::worker::Worker;

/// Schema for the clarify decision.
fn clarify_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "need_clarification": {
                "type": "boolean",
                "description": "Whether research cannot sensibly proceed without clarification."
            },
            "question": {
                "type": "string",
                "description": "The clarification question to ask, empty when not needed."
            }
        },
        "required": ["need_clarification"]
    })
}

/// Schema for the research brief.
fn brief_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "question": {
                "type": "string",
                "description": "The self-contained research question."
            },
            "success_criteria": {
                "type": "array",
                "items": { "type": "string" },
                "description": "What a complete answer must cover."
            },
            "constraints": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Constraints the research must respect."
            },
            "language": {
                "type": "string",
                "description": "BCP 47 tag of the user's language."
            }
        },
        "required": ["question"]
    })
}

/// Orchestrates a full research session.
pub struct Supervisor {
    config: ResearchConfig,
    prompts: Arc<PromptSet>,
    supervisor_adapter: Arc<ModelAdapter>,
    supervisor_dispatcher: Arc<ToolDispatcher>,
    worker: Arc<Worker>,
    synthesizer: Synthesizer,
}

impl Supervisor {
    /// Creates a supervisor wired to the configured provider and search
    /// backend.
    ///
    /// # Errors
    ///
    /// Returns [`ResearchError::UnsupportedProvider`] for unknown
    /// provider or search-provider names, [`ResearchError::Config`] for
    /// client construction failures.
    pub fn new(config: ResearchConfig) -> Result<Self, ResearchError> {
        let provider = create_provider(&config)?;

        let summarizer = Arc::new(phase_adapter(
            &config,
            Arc::clone(&provider),
            &config.summarization_model,
            config.summarization_max_tokens,
        ));
        let search: Arc<dyn SearchProvider> = match config.search_provider.as_str() {
            "searxng" => Arc::new(SearxngSearch::new(
                &config.search_endpoint,
                config.search_timeout,
                summarizer,
                PromptSet::load(config.prompt_dir.as_deref()).summarize,
                config.max_content_length,
                config.search_concurrency,
                config.max_transport_retries,
            )?),
            other => {
                return Err(ResearchError::UnsupportedProvider {
                    name: other.to_string(),
                });
            }
        };

        Ok(Self::with_backends(config, provider, search))
    }

    /// Creates a supervisor over explicit provider and search backends.
    ///
    /// This is the seam for custom backends and for tests driving the
    /// orchestration with scripted stubs.
    #[must_use]
    pub fn with_backends(
        config: ResearchConfig,
        provider: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchProvider>,
    ) -> Self {
        let prompts = Arc::new(PromptSet::load(config.prompt_dir.as_deref()));

        let supervisor_adapter = Arc::new(phase_adapter(
            &config,
            Arc::clone(&provider),
            &config.supervisor_model,
            config.supervisor_max_tokens,
        ));
        let worker_adapter = Arc::new(phase_adapter(
            &config,
            Arc::clone(&provider),
            &config.worker_model,
            config.worker_max_tokens,
        ));
        let report_adapter = Arc::new(phase_adapter(
            &config,
            Arc::clone(&provider),
            &config.final_report_model,
            config.report_max_tokens,
        ));

        let worker_dispatcher = Arc::new(ToolDispatcher::for_worker(
            search,
            config.max_results_per_query,
        ));
        let worker = Arc::new(Worker::new(
            worker_adapter,
            worker_dispatcher,
            Arc::clone(&prompts),
            config.response_language.clone(),
            config.response_reserve_tokens,
            config.preserved_observations,
        ));

        let synthesizer = Synthesizer::new(
            report_adapter,
            Arc::clone(&prompts),
            config.response_language.clone(),
        );

        Self {
            config,
            prompts,
            supervisor_adapter,
            supervisor_dispatcher: Arc::new(ToolDispatcher::for_supervisor()),
            worker,
            synthesizer,
        }
    }

    /// Runs a research session over the user's messages.
    ///
    /// Returns a report (possibly truncated and flagged) or, when the
    /// clarify phase is enabled and fires, a clarification question.
    ///
    /// # Errors
    ///
    /// Returns [`ResearchError::Cancelled`] when the caller's signal
    /// fires, [`ResearchError::StructuredOutput`] when the brief cannot
    /// be produced, and transport errors that survived retry.
    /// Intermediate tool failures never propagate here.
    pub async fn run(
        &self,
        user_messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<ResearchOutcome, ResearchError> {
        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }

        // Phase 1: clarify (optional).
        if self.config.allow_clarification
            && let Some(question) = self.clarify(user_messages).await?
        {
            return Ok(ResearchOutcome::Clarification(question));
        }

        // Phase 2: brief.
        let brief = self.write_brief(user_messages).await?;
        debug!(question = brief.question, "research brief produced");
        let mut state = SupervisorState::new(brief.clone());

        // Phase 3: supervisor loop.
        let language = self.config.response_language.as_deref();
        let mut transcript = vec![
            system_message(&with_language(&self.prompts.supervisor, language)),
            user_message(&build_supervisor_user_msg(&brief)),
        ];

        let mut termination = None;
        while termination.is_none() && state.iterations < self.config.max_supervisor_iterations {
            if cancel.is_cancelled() {
                return Err(ResearchError::Cancelled);
            }

            let turn = self
                .supervisor_adapter
                .complete_with_tools(
                    &transcript,
                    self.supervisor_dispatcher.tool_set().definitions(),
                )
                .await?;
            state.usage.absorb(turn.usage);
            state.iterations += 1;
            transcript.push(assistant_tool_calls_message(&turn.text, turn.tool_calls.clone()));

            if turn.tool_calls.is_empty() {
                // An empty tool-call list is the model's completion
                // signal, same as in the worker loop.
                debug!(iteration = state.iterations, "supervisor emitted no tool calls");
                termination = Some(Termination::DoneByModel);
                break;
            }

            let turn_outcome = self
                .process_turn(&turn.tool_calls, &mut state, &mut transcript)
                .await;

            if !turn_outcome.delegates.is_empty() {
                let batch = self
                    .fan_out(&brief, turn_outcome.delegates, cancel)
                    .await;
                if cancel.is_cancelled() {
                    return Err(ResearchError::Cancelled);
                }
                for (call_id, findings) in batch {
                    transcript.push(observation_message(
                        &call_id,
                        &render_findings_observation(&findings),
                    ));
                    state.usage.absorb(findings.usage);
                    state.completed_findings.push(findings);
                }
            }

            if turn_outcome.complete_requested {
                termination = Some(Termination::DoneByModel);
            } else if state.tool_calls_total >= self.config.max_total_tool_calls {
                debug!(total = state.tool_calls_total, "supervisor tool budget exhausted");
                termination = Some(Termination::DoneByToolBudget);
            }
        }
        let termination = termination.unwrap_or(Termination::DoneByIterations);

        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }

        // Phase 4: synthesize.
        let report = self.synthesizer.synthesize(&state, termination).await?;
        Ok(ResearchOutcome::Report(report))
    }

    /// Clarify phase: returns the clarification question when one is
    /// needed.
    async fn clarify(
        &self,
        user_messages: &[ChatMessage],
    ) -> Result<Option<String>, ResearchError> {
        let language = self.config.response_language.as_deref();
        let mut messages = vec![system_message(&with_language(&self.prompts.clarify, language))];
        messages.extend_from_slice(user_messages);

        let (decision, _usage) = self
            .supervisor_adapter
            .complete_structured_as::<ClarifyDecision>(&messages, &clarify_schema())
            .await?;

        Ok(decision
            .need_clarification
            .then_some(decision.question)
            .filter(|q| !q.is_empty()))
    }

    /// Brief phase: produces the immutable research brief.
    async fn write_brief(&self, user_messages: &[ChatMessage]) -> Result<Brief, ResearchError> {
        let language = self.config.response_language.as_deref();
        let mut messages = vec![system_message(&with_language(&self.prompts.brief, language))];
        messages.extend_from_slice(user_messages);

        let (brief, _usage) = self
            .supervisor_adapter
            .complete_structured_as::<Brief>(&messages, &brief_schema())
            .await?;
        Ok(brief)
    }

    /// Processes one turn's tool calls: counts them against the budget,
    /// intercepts the control tools, dispatches `reflect`, and collects
    /// the fan-out batch. Calls past the budget get a skip observation
    /// so every call id has a response.
    async fn process_turn(
        &self,
        calls: &[ToolCall],
        state: &mut SupervisorState,
        transcript: &mut Vec<ChatMessage>,
    ) -> TurnOutcome {
        let mut outcome = TurnOutcome::default();

        for call in calls {
            if state.tool_calls_total >= self.config.max_total_tool_calls {
                transcript.push(observation_message(
                    &call.id,
                    "not executed: tool budget exhausted",
                ));
                continue;
            }
            state.tool_calls_total += 1;

            match call.name.as_str() {
                tool::RESEARCH_COMPLETE => {
                    outcome.complete_requested = true;
                    transcript.push(observation_message(&call.id, "Research marked complete."));
                }
                tool::DELEGATE_RESEARCH => match parse_sub_question(call) {
                    Ok(sub_question) => {
                        let task = WorkerTask {
                            id: state.next_task_id(),
                            sub_question,
                            max_iterations: self.config.max_worker_iterations,
                            max_tool_calls: self.config.max_worker_tool_calls,
                        };
                        debug!(task_id = task.id, sub_question = task.sub_question, "delegating");
                        outcome.delegates.push((call.id.clone(), task));
                    }
                    Err(message) => {
                        warn!(call_id = call.id, message, "malformed delegate_research call");
                        transcript.push(observation_message(&call.id, &message));
                    }
                },
                _ => {
                    let dispatched = self.supervisor_dispatcher.execute(call).await;
                    if call.name == tool::REFLECT && !dispatched.result.is_error {
                        state.notes.push(dispatched.result.content.clone());
                    }
                    transcript.push(observation_message(
                        &dispatched.result.tool_call_id,
                        &dispatched.result.content,
                    ));
                }
            }
        }

        outcome
    }

    /// Fans the batch out across workers under the concurrency bound and
    /// collects findings in task-submission order.
    async fn fan_out(
        &self,
        brief: &Brief,
        delegates: Vec<(String, WorkerTask)>,
        cancel: &CancellationToken,
    ) -> Vec<(String, WorkerFindings)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_units));
        let request_delay = self.config.request_delay;

        let mut handles = Vec::with_capacity(delegates.len());
        for (call_id, task) in delegates {
            let semaphore = Arc::clone(&semaphore);
            let worker = Arc::clone(&self.worker);
            let brief = brief.clone();
            let cancel = cancel.clone();
            let task_id = task.id.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return WorkerFindings::failed(&task.id, "semaphore closed", Vec::new());
                };
                if !request_delay.is_zero() {
                    tokio::time::sleep(request_delay).await;
                }
                worker.run(&task, &brief, &cancel).await
            });
            handles.push((call_id, task_id, handle));
        }

        // Awaiting in submission order reconstructs deterministic
        // ordering regardless of completion order.
        let mut batch = Vec::with_capacity(handles.len());
        for (call_id, task_id, handle) in handles {
            let findings = match handle.await {
                Ok(findings) => findings,
                Err(e) => {
                    warn!(task_id, %e, "worker task join failed");
                    WorkerFindings::failed(&task_id, format!("task join failed: {e}"), Vec::new())
                }
            };
            batch.push((call_id, findings));
        }
        batch
    }
}

/// What one supervisor turn produced.
#[derive(Debug, Default)]
struct TurnOutcome {
    delegates: Vec<(String, WorkerTask)>,
    complete_requested: bool,
}

/// Extracts the sub-question from a `delegate_research` call.
fn parse_sub_question(call: &ToolCall) -> Result<String, String> {
    let parsed: Value = serde_json::from_str(&call.arguments)
        .map_err(|e| format!("invalid delegate_research arguments: {e}"))?;
    let arguments = tool::normalize_arguments(tool::DELEGATE_RESEARCH, parsed);
    arguments
        .get("sub_question")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| "missing required parameter(s): sub_question".to_string())
}

/// Renders a worker's findings as the supervisor observation.
fn render_findings_observation(findings: &WorkerFindings) -> String {
    let status = match findings.status {
        FindingStatus::Complete => "complete",
        FindingStatus::Exhausted => "exhausted",
        FindingStatus::Failed => "failed",
    };
    let body = if findings.status == FindingStatus::Failed {
        format!(
            "error: {}",
            findings.error.as_deref().unwrap_or("unknown failure")
        )
    } else if findings.compressed_text.is_empty() {
        "no citable findings".to_string()
    } else {
        findings.compressed_text.clone()
    };
    format!("Findings from {} (status: {status}):\n{body}", findings.task_id)
}

/// Builds a phase-specific adapter sharing one provider.
fn phase_adapter(
    config: &ResearchConfig,
    provider: Arc<dyn LlmProvider>,
    model: &str,
    max_tokens: u32,
) -> ModelAdapter {
    ModelAdapter::new(
        provider,
        BackendProfile::detect(model, config.llm_timeout),
        AdapterOptions {
            temperature: 0.0,
            max_tokens,
            max_structured_retries: config.max_structured_retries,
            max_transport_retries: config.max_transport_retries,
            react_parse_retries: config.react_parse_retries,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[test]
    fn test_parse_sub_question() {
        let parsed = parse_sub_question(&call(
            tool::DELEGATE_RESEARCH,
            r#"{"sub_question": "What is HNSW?", "rationale": "core concept"}"#,
        ));
        assert_eq!(parsed.as_deref(), Ok("What is HNSW?"));
    }

    #[test]
    fn test_parse_sub_question_rejects_missing_or_blank() {
        assert!(parse_sub_question(&call(tool::DELEGATE_RESEARCH, "{}")).is_err());
        assert!(
            parse_sub_question(&call(tool::DELEGATE_RESEARCH, r#"{"sub_question": "  "}"#))
                .is_err()
        );
        assert!(parse_sub_question(&call(tool::DELEGATE_RESEARCH, "not json")).is_err());
    }

    #[test]
    fn test_render_findings_observation_variants() {
        let complete = WorkerFindings {
            task_id: "task-1".to_string(),
            compressed_text: "- a claim [1]\n".to_string(),
            raw_notes: Vec::new(),
            sources: Vec::new(),
            status: FindingStatus::Complete,
            error: None,
            usage: crate::message::TokenUsage::default(),
        };
        let rendered = render_findings_observation(&complete);
        assert!(rendered.contains("task-1"));
        assert!(rendered.contains("status: complete"));
        assert!(rendered.contains("- a claim [1]"));

        let failed = WorkerFindings::failed("task-2", "cancelled", Vec::new());
        let rendered = render_findings_observation(&failed);
        assert!(rendered.contains("status: failed"));
        assert!(rendered.contains("error: cancelled"));

        let empty = WorkerFindings {
            compressed_text: String::new(),
            status: FindingStatus::Exhausted,
            ..complete
        };
        assert!(render_findings_observation(&empty).contains("no citable findings"));
    }

    #[test]
    fn test_schemas_validate_expected_shapes() {
        use crate::model::schema;

        let decision = serde_json::json!({"need_clarification": true, "question": "which region?"});
        assert!(schema::validate(&clarify_schema(), &decision).is_ok());

        let brief = serde_json::json!({
            "question": "q",
            "success_criteria": ["a"],
            "constraints": [],
            "language": "en"
        });
        assert!(schema::validate(&brief_schema(), &brief).is_ok());

        let missing = serde_json::json!({"success_criteria": []});
        assert!(schema::validate(&brief_schema(), &missing).is_err());
    }
}
