//! ReAct text protocol codec.
//!
//! Backends without native tool calling are driven through a text wire
//! format with a fixed grammar:
//!
//! ```text
//! Thought: <one-paragraph reasoning>
//! Action: <tool_name>
//! Action Input: <single-line JSON object matching the tool schema>
//! ```
//!
//! or, for finalization:
//!
//! ```text
//! Thought: <…>
//! Final Answer: <free text>
//! ```
//!
//! This module is a codec over that grammar, testable without any model:
//! [`render_preamble`] produces the instruction block, [`encode_call`] /
//! [`encode_final`] emit well-formed replies, and [`decode`] parses a
//! reply back. Encoding then decoding is the identity on the
//! `(name, arguments)` pair for single-line-JSON arguments.

use std::fmt::Write;

use serde_json::Value;

use crate::error::ResearchError;
use crate::model::schema::extract_json;
use crate::tool::ToolDefinition;

/// Observation text sent back after an unparseable reply.
pub const PARSE_RETRY_NUDGE: &str =
    "your last reply was not parseable; reply again using the required format";

/// One decoded step of the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum ReactStep {
    /// The model requested a tool call.
    Call {
        thought: String,
        name: String,
        arguments: Value,
    },
    /// The model finished with a free-text answer.
    Final { thought: String, answer: String },
}

/// Renders the protocol preamble: every registered tool with name,
/// description, and parameter schema, plus the reply grammar mandate.
#[must_use]
pub fn render_preamble(tools: &[ToolDefinition]) -> String {
    let mut out = String::from("You can use tools to make progress.\n\nAvailable Tools:\n");
    for tool in tools {
        let _ = writeln!(out, "- **{}**: {}", tool.name, tool.description);
        if let Some(props) = tool.parameters.get("properties").and_then(Value::as_object) {
            for (param, info) in props {
                let description = info
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let _ = writeln!(out, "  - {param}: {description}");
            }
        }
    }
    out.push_str(
        "\nTo use a tool, reply in this exact format:\n\
         Thought: [Your reasoning about what to do next]\n\
         Action: [Tool name from the list above]\n\
         Action Input: {\"parameter\": \"value\"}\n\n\
         When you have enough information, reply in this format instead:\n\
         Thought: [Your final reasoning]\n\
         Final Answer: [Your complete answer]\n\n\
         IMPORTANT:\n\
         - Always start with \"Thought:\".\n\
         - Use \"Action:\" with the EXACT tool name from the list.\n\
         - Use \"Action Input:\" with valid single-line JSON for the tool's parameters.\n\
         - Call ONE tool per reply.",
    );
    out
}

/// Encodes a tool call as a protocol reply.
#[must_use]
pub fn encode_call(thought: &str, name: &str, arguments: &Value) -> String {
    let arguments = serde_json::to_string(arguments).unwrap_or_else(|_| "{}".to_string());
    format!("Thought: {thought}\nAction: {name}\nAction Input: {arguments}")
}

/// Encodes a final answer as a protocol reply.
#[must_use]
pub fn encode_final(thought: &str, answer: &str) -> String {
    format!("Thought: {thought}\nFinal Answer: {answer}")
}

/// Formats a tool result payload as an observation for the transcript.
#[must_use]
pub fn render_observation(payload: &str) -> String {
    format!("Observation: {payload}")
}

/// Decodes a protocol reply into a [`ReactStep`].
///
/// `Final Answer:` takes precedence over `Action:`; marker matching is
/// case-insensitive. The JSON after `Action Input:` is extracted greedily
/// through the matching closing brace.
///
/// # Errors
///
/// Returns [`ResearchError::ToolParse`] when neither marker is present,
/// the action name is empty, or the action input is not a JSON document.
pub fn decode(reply: &str) -> Result<ReactStep, ResearchError> {
    let thought = extract_thought(reply);

    if let Some(pos) = find_marker(reply, "final answer:") {
        let answer = reply[pos + "final answer:".len()..].trim().to_string();
        return Ok(ReactStep::Final { thought, answer });
    }

    let Some(action_pos) = find_marker(reply, "action:") else {
        return Err(parse_error("no Action or Final Answer found", reply));
    };
    let after_action = &reply[action_pos + "action:".len()..];
    let name = after_action
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    if name.is_empty() {
        return Err(parse_error("empty tool name after Action:", reply));
    }

    let Some(input_pos) = find_marker(after_action, "action input:") else {
        return Err(parse_error("missing Action Input", reply));
    };
    let input_text = &after_action[input_pos + "action input:".len()..];
    let Some(json_text) = extract_json(input_text) else {
        return Err(parse_error("no JSON document after Action Input", reply));
    };
    let arguments: Value = serde_json::from_str(json_text)
        .map_err(|e| parse_error(&format!("invalid Action Input JSON: {e}"), reply))?;

    Ok(ReactStep::Call {
        thought,
        name,
        arguments,
    })
}

/// Extracts the text after `Thought:` up to the next grammar marker.
fn extract_thought(reply: &str) -> String {
    let Some(pos) = find_marker(reply, "thought:") else {
        return String::new();
    };
    let rest = &reply[pos + "thought:".len()..];
    let end = find_marker(rest, "action:")
        .into_iter()
        .chain(find_marker(rest, "final answer:"))
        .min()
        .unwrap_or(rest.len());
    rest[..end].trim().to_string()
}

/// ASCII-case-insensitive marker search. Matching on bytes keeps the
/// returned offset valid for slicing even when the reply contains
/// non-ASCII text (whose lowercase form can differ in byte length).
fn find_marker(haystack: &str, marker: &str) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let marker = marker.as_bytes();
    if marker.is_empty() || haystack.len() < marker.len() {
        return None;
    }
    (0..=haystack.len() - marker.len())
        .find(|&i| haystack[i..i + marker.len()].eq_ignore_ascii_case(marker))
}

fn parse_error(message: &str, content: &str) -> ResearchError {
    ResearchError::ToolParse {
        message: message.to_string(),
        content: content.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_tool_call() {
        let reply = "Thought: I should search for this.\n\
                     Action: search\n\
                     Action Input: {\"queries\": [\"hnsw algorithm\"]}";
        let step = decode(reply).unwrap_or_else(|e| panic!("decode failed: {e}"));
        match step {
            ReactStep::Call {
                thought,
                name,
                arguments,
            } => {
                assert_eq!(thought, "I should search for this.");
                assert_eq!(name, "search");
                assert_eq!(arguments, json!({"queries": ["hnsw algorithm"]}));
            }
            ReactStep::Final { .. } => panic!("expected a tool call"),
        }
    }

    #[test]
    fn test_decode_final_answer() {
        let reply = "Thought: Enough evidence collected.\nFinal Answer: HNSW is a graph index.";
        let step = decode(reply).unwrap_or_else(|e| panic!("decode failed: {e}"));
        assert_eq!(
            step,
            ReactStep::Final {
                thought: "Enough evidence collected.".to_string(),
                answer: "HNSW is a graph index.".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_is_case_insensitive() {
        let reply = "THOUGHT: x\nACTION: reflect\nACTION INPUT: {\"reflection\": \"ok\"}";
        let step = decode(reply).unwrap_or_else(|e| panic!("decode failed: {e}"));
        assert!(matches!(step, ReactStep::Call { name, .. } if name == "reflect"));
    }

    #[test]
    fn test_decode_final_answer_takes_precedence() {
        let reply = "Thought: done\nFinal Answer: the Action: plan worked";
        let step = decode(reply).unwrap_or_else(|e| panic!("decode failed: {e}"));
        assert!(matches!(step, ReactStep::Final { .. }));
    }

    #[test]
    fn test_decode_greedy_json_with_nested_braces() {
        let reply = "Thought: t\nAction: search\n\
                     Action Input: {\"queries\": [\"a {nested} phrase\"]} trailing prose";
        let step = decode(reply).unwrap_or_else(|e| panic!("decode failed: {e}"));
        match step {
            ReactStep::Call { arguments, .. } => {
                assert_eq!(arguments["queries"][0], "a {nested} phrase");
            }
            ReactStep::Final { .. } => panic!("expected a tool call"),
        }
    }

    #[test]
    fn test_decode_malformed_is_parse_error() {
        for reply in [
            "just some text",
            "Thought: hm\nAction: search",
            "Thought: hm\nAction: search\nAction Input: not json",
            "Thought: hm\nAction:\nAction Input: {}",
        ] {
            let err = decode(reply).unwrap_err();
            assert!(matches!(err, ResearchError::ToolParse { .. }), "for {reply:?}");
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let cases = vec![
            ("search", json!({"queries": ["a", "b"], "max_results_per_query": 2})),
            ("reflect", json!({"reflection": "making progress"})),
            ("delegate_research", json!({"sub_question": "what is HNSW?"})),
            ("research_complete", json!({})),
        ];
        for (name, arguments) in cases {
            let encoded = encode_call("thinking", name, &arguments);
            let step = decode(&encoded).unwrap_or_else(|e| panic!("decode failed: {e}"));
            match step {
                ReactStep::Call {
                    name: decoded_name,
                    arguments: decoded_args,
                    ..
                } => {
                    assert_eq!(decoded_name, name);
                    assert_eq!(decoded_args, arguments);
                }
                ReactStep::Final { .. } => panic!("expected a tool call"),
            }
        }
    }

    #[test]
    fn test_encode_final_round_trip() {
        let encoded = encode_final("wrapping up", "HNSW builds layered graphs.");
        let step = decode(&encoded).unwrap_or_else(|e| panic!("decode failed: {e}"));
        assert_eq!(
            step,
            ReactStep::Final {
                thought: "wrapping up".to_string(),
                answer: "HNSW builds layered graphs.".to_string(),
            }
        );
    }

    #[test]
    fn test_preamble_lists_tools_and_grammar() {
        let tools = crate::tool::ToolSet::worker();
        let preamble = render_preamble(tools.definitions());
        assert!(preamble.contains("**search**"));
        assert!(preamble.contains("**reflect**"));
        assert!(preamble.contains("queries"));
        assert!(preamble.contains("Action Input:"));
        assert!(preamble.contains("Final Answer:"));
    }

    #[test]
    fn test_render_observation() {
        assert_eq!(render_observation("3 results"), "Observation: 3 results");
    }
}
