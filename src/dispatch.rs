//! Tool dispatcher: routes a parsed tool call to its effect.
//!
//! `search` invokes the configured search provider; `reflect` records a
//! thought with no side effect. The supervisor's control tools
//! (`delegate_research`, `research_complete`) are intercepted by the
//! supervisor loop before dispatch and never reach here. Every failure —
//! unknown tool, bad arguments, missing parameters, provider errors —
//! becomes an error [`ToolResult`] fed back to the model as an
//! observation; nothing in this module propagates to the caller.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::prompt::render_search_observation;
use crate::search::{SearchProvider, SearchQueryBatch, SearchResult};
use crate::tool::{self, ToolCall, ToolResult, ToolSet};

/// Maximum raw byte length of tool argument JSON from the LLM.
const MAX_TOOL_ARGS_LEN: usize = 100_000;

/// The outcome of dispatching one tool call: the observation payload
/// plus any search results retrieved along the way (the worker tracks
/// those as citation sources).
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Observation fed back to the model.
    pub result: ToolResult,
    /// Search results retrieved by this call, if it was a search.
    pub search_results: Vec<SearchResult>,
}

/// Dispatches tool calls against a role-restricted tool set.
pub struct ToolDispatcher {
    set: ToolSet,
    search: Option<Arc<dyn SearchProvider>>,
    default_max_results: usize,
}

impl ToolDispatcher {
    /// Dispatcher for worker loops: `search` and `reflect`.
    #[must_use]
    pub fn for_worker(search: Arc<dyn SearchProvider>, default_max_results: usize) -> Self {
        Self {
            set: ToolSet::worker(),
            search: Some(search),
            default_max_results: default_max_results.max(1),
        }
    }

    /// Dispatcher for the supervisor loop: `reflect` only (the control
    /// tools are intercepted upstream).
    #[must_use]
    pub fn for_supervisor() -> Self {
        Self {
            set: ToolSet::supervisor(),
            search: None,
            default_max_results: 1,
        }
    }

    /// The tool set this dispatcher serves.
    #[must_use]
    pub const fn tool_set(&self) -> &ToolSet {
        &self.set
    }

    /// Executes one tool call.
    pub async fn execute(&self, call: &ToolCall) -> DispatchOutcome {
        if call.arguments.len() > MAX_TOOL_ARGS_LEN {
            return error_outcome(
                call,
                format!(
                    "tool arguments too large ({} bytes, max {MAX_TOOL_ARGS_LEN})",
                    call.arguments.len()
                ),
            );
        }

        let Some(definition) = self.set.get(&call.name) else {
            let available: Vec<&str> = self
                .set
                .definitions()
                .iter()
                .map(|d| d.name.as_str())
                .collect();
            return error_outcome(
                call,
                format!(
                    "unknown tool '{}'; available tools: {}",
                    call.name,
                    available.join(", ")
                ),
            );
        };

        let parsed: Value = match serde_json::from_str(&call.arguments) {
            Ok(value) => value,
            Err(e) => return error_outcome(call, format!("invalid arguments JSON: {e}")),
        };
        let arguments = tool::normalize_arguments(&call.name, parsed);

        let missing = tool::missing_required(definition, &arguments);
        if !missing.is_empty() {
            return error_outcome(
                call,
                format!("missing required parameter(s): {}", missing.join(", ")),
            );
        }

        debug!(tool = call.name, call_id = call.id, "dispatching tool call");

        match call.name.as_str() {
            tool::SEARCH => self.run_search(call, &arguments).await,
            tool::REFLECT => {
                let reflection = arguments
                    .get("reflection")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                ok_outcome(call, format!("Reflection recorded: {reflection}"))
            }
            other => error_outcome(
                call,
                format!("tool '{other}' is handled by the orchestration loop, not dispatched"),
            ),
        }
    }

    /// Runs a search call against the provider.
    async fn run_search(&self, call: &ToolCall, arguments: &Value) -> DispatchOutcome {
        let Some(ref provider) = self.search else {
            return error_outcome(call, "no search provider configured for this loop".to_string());
        };

        let queries: Vec<String> = arguments
            .get("queries")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if queries.is_empty() {
            return error_outcome(call, "queries must be a non-empty list".to_string());
        }

        let max_results = arguments
            .get("max_results_per_query")
            .and_then(Value::as_u64)
            .map_or(self.default_max_results, |n| n as usize);
        let batch = SearchQueryBatch::new(queries, max_results);

        match provider.search(&batch).await {
            Ok(output) => {
                let payload = render_search_observation(&output);
                DispatchOutcome {
                    result: ToolResult {
                        tool_call_id: call.id.clone(),
                        content: payload,
                        is_error: false,
                    },
                    search_results: output.results,
                }
            }
            Err(error) => error_outcome(call, format!("search failed: {error}")),
        }
    }
}

fn ok_outcome(call: &ToolCall, content: String) -> DispatchOutcome {
    DispatchOutcome {
        result: ToolResult {
            tool_call_id: call.id.clone(),
            content,
            is_error: false,
        },
        search_results: Vec::new(),
    }
}

fn error_outcome(call: &ToolCall, content: String) -> DispatchOutcome {
    DispatchOutcome {
        result: ToolResult {
            tool_call_id: call.id.clone(),
            content,
            is_error: true,
        },
        search_results: Vec::new(),
    }
}
