//! Tool declarations, calls, results, and argument normalization.
//!
//! The tool set is fixed per session: workers get `search` and `reflect`;
//! the supervisor gets `reflect`, `delegate_research`, and
//! `research_complete`. Role separation is enforced by handing each loop
//! its restricted [`ToolSet`].
//!
//! Weaker backends drift on argument names (singular `query` for the
//! `queries` list, `thought` for `reflection`). [`normalize_arguments`]
//! reconciles the known aliases before dispatch; parameters still missing
//! afterwards surface as parse-error observations, never as crashes.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Name of the web search tool.
pub const SEARCH: &str = "search";
/// Name of the reflection tool.
pub const REFLECT: &str = "reflect";
/// Name of the supervisor's delegation tool.
pub const DELEGATE_RESEARCH: &str = "delegate_research";
/// Name of the supervisor's termination tool.
pub const RESEARCH_COMPLETE: &str = "research_complete";

/// Alias keys accepted for `reflect.reflection`, in precedence order.
const REFLECT_ALIASES: &[&str] = &["prompt", "thought", "question"];

/// A tool definition that can be sent to an LLM for function-calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match the dispatcher's routing table).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema object describing the tool's parameters.
    pub parameters: Value,
}

/// A tool call requested by the LLM.
///
/// Produced either by a native tool-calling backend or decoded from
/// ReAct text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON-encoded arguments for the tool.
    pub arguments: String,
}

/// The result of executing a tool call. Always fed back to the model as
/// an observation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the tool call this result corresponds to.
    pub tool_call_id: String,
    /// Result content (payload on success, error message on failure).
    pub content: String,
    /// Whether this result represents an error.
    pub is_error: bool,
}

/// A set of tool definitions scoped to an agent role.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    definitions: Vec<ToolDefinition>,
}

impl ToolSet {
    /// Returns the tool definitions in this set.
    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Returns `true` if this set contains no tools.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Returns the number of tools in this set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Looks up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Whether a tool with the given name is in this set.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Tool set for worker researchers: `search` and `reflect`.
    #[must_use]
    pub fn worker() -> Self {
        Self {
            definitions: vec![def_search(), def_reflect()],
        }
    }

    /// Tool set for the supervisor: `reflect`, `delegate_research`,
    /// and `research_complete`.
    #[must_use]
    pub fn supervisor() -> Self {
        Self {
            definitions: vec![def_reflect(), def_delegate_research(), def_research_complete()],
        }
    }
}

// ---------------------------------------------------------------------------
// Tool schema definitions
// ---------------------------------------------------------------------------

/// Defines the `search` tool.
fn def_search() -> ToolDefinition {
    ToolDefinition {
        name: SEARCH.to_string(),
        description: "Run web searches and get back summarized, citable results. \
                       Issue several focused queries at once rather than one broad query."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "queries": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Search queries to execute."
                },
                "max_results_per_query": {
                    "type": "integer",
                    "description": "Maximum results to keep per query."
                }
            },
            "required": ["queries"],
            "additionalProperties": false
        }),
    }
}

/// Defines the `reflect` tool.
fn def_reflect() -> ToolDefinition {
    ToolDefinition {
        name: REFLECT.to_string(),
        description: "Record a strategic reflection on progress so far: what was found, \
                       what is missing, and whether to continue or conclude. Use after \
                       each batch of results."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "reflection": {
                    "type": "string",
                    "description": "Your reflection on findings, gaps, and next steps."
                }
            },
            "required": ["reflection"],
            "additionalProperties": false
        }),
    }
}

/// Defines the `delegate_research` tool.
fn def_delegate_research() -> ToolDefinition {
    ToolDefinition {
        name: DELEGATE_RESEARCH.to_string(),
        description: "Hand a focused sub-question to a dedicated researcher. Emit several \
                       of these in one turn to investigate independent angles in parallel."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "sub_question": {
                    "type": "string",
                    "description": "The self-contained sub-question to research."
                },
                "rationale": {
                    "type": "string",
                    "description": "Why this sub-question matters for the brief."
                }
            },
            "required": ["sub_question"],
            "additionalProperties": false
        }),
    }
}

/// Defines the `research_complete` tool.
fn def_research_complete() -> ToolDefinition {
    ToolDefinition {
        name: RESEARCH_COMPLETE.to_string(),
        description: "Signal that the collected findings answer the brief and research \
                       should stop."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    }
}

// ---------------------------------------------------------------------------
// Argument normalization
// ---------------------------------------------------------------------------

/// Reconciles common argument-name drift for a tool call.
///
/// Rules are per-tool and ordered; unknown tools and non-object argument
/// documents pass through untouched. Normalization is idempotent.
#[must_use]
pub fn normalize_arguments(tool_name: &str, arguments: Value) -> Value {
    let Value::Object(mut map) = arguments else {
        return arguments;
    };

    match tool_name {
        SEARCH => {
            if !map.contains_key("queries")
                && let Some(query) = map.remove("query")
            {
                map.insert("queries".to_string(), query);
            }
            if let Some(queries) = map.remove("queries") {
                map.insert("queries".to_string(), coerce_string_list(queries));
            }
        }
        REFLECT => {
            if !map.contains_key("reflection") {
                for alias in REFLECT_ALIASES {
                    if let Some(value) = map.remove(*alias) {
                        map.insert("reflection".to_string(), coerce_string(value));
                        break;
                    }
                }
            }
        }
        _ => {}
    }

    Value::Object(map)
}

/// Returns the required parameters (per the tool's schema) missing from
/// the argument document. A non-object document is missing everything.
#[must_use]
pub fn missing_required(definition: &ToolDefinition, arguments: &Value) -> Vec<String> {
    let required: Vec<&str> = definition
        .parameters
        .get("required")
        .and_then(Value::as_array)
        .map(|keys| keys.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(map) = arguments.as_object() else {
        return required.iter().map(ToString::to_string).collect();
    };

    required
        .iter()
        .filter(|key| !map.contains_key(**key))
        .map(ToString::to_string)
        .collect()
}

/// Coerces a value into a list of strings: strings wrap into a
/// one-element list, lists keep string elements and stringify the rest,
/// any other scalar stringifies into a one-element list.
fn coerce_string_list(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(coerce_string).collect()),
        Value::String(s) => json!([s]),
        other => json!([stringify(&other)]),
    }
}

/// Coerces a scalar into a string value, leaving strings untouched.
fn coerce_string(value: Value) -> Value {
    match value {
        Value::String(_) => value,
        other => Value::String(stringify(&other)),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
