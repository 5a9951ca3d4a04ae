//! JSON document extraction and schema validation for JSON-mode backends.
//!
//! Backends without native structured output reply with free text that is
//! supposed to contain a JSON document. The helpers here locate and
//! extract that document (tolerating markdown fences and surrounding
//! prose) and validate it against the schema subset the engine uses:
//! `type`, `properties`, `required`, `items`, `enum`, `maxLength`,
//! `maxItems`.

use std::fmt::Write;

use serde_json::Value;

/// Strips a leading/trailing markdown code fence if present.
#[must_use]
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```");
    body.trim_end_matches("```").trim()
}

/// Extracts the first balanced JSON document (`{…}` or `[…]`) from text.
///
/// Scans from the first opening brace or bracket, tracking nesting depth
/// and string/escape state, and returns the slice through the matching
/// closer. Returns `None` when no balanced document exists.
#[must_use]
pub fn extract_json(text: &str) -> Option<&str> {
    let text = strip_fences(text);
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Validates a value against the supported schema subset.
///
/// # Errors
///
/// Returns a human-readable description of the first violation, with a
/// JSON-pointer-style path, suitable for feeding back to the model.
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    validate_at(schema, value, "$")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        let ok = match expected {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "null" => value.is_null(),
            other => return Err(format!("{path}: unsupported schema type '{other}'")),
        };
        if !ok {
            return Err(format!("{path}: expected {expected}, got {}", kind_of(value)));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array)
        && !allowed.contains(value)
    {
        return Err(format!("{path}: value not in enum"));
    }

    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64)
        && let Some(s) = value.as_str()
        && s.chars().count() as u64 > max
    {
        return Err(format!("{path}: string longer than {max} characters"));
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(key) {
                    return Err(format!("{path}: missing required property '{key}'"));
                }
            }
        }
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (key, sub_schema) in props {
                if let Some(sub_value) = obj.get(key) {
                    validate_at(sub_schema, sub_value, &format!("{path}.{key}"))?;
                }
            }
        }
    }

    if let Some(arr) = value.as_array() {
        if let Some(max) = schema.get("maxItems").and_then(Value::as_u64)
            && arr.len() as u64 > max
        {
            return Err(format!("{path}: array longer than {max} items"));
        }
        if let Some(item_schema) = schema.get("items") {
            for (i, item) in arr.iter().enumerate() {
                validate_at(item_schema, item, &format!("{path}[{i}]"))?;
            }
        }
    }

    Ok(())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Renders the JSON-mode instruction appended for backends without
/// native structured output: a field-by-field description of the
/// expected document plus the no-prose mandate.
#[must_use]
pub fn render_instruction(schema: &Value) -> String {
    let mut out = String::from(
        "You must respond with a single valid JSON document matching this format, \
         with no surrounding prose and no markdown fences.\n\nRequired JSON format:\n{\n",
    );
    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (name, info) in props {
            let field_type = info.get("type").and_then(Value::as_str).unwrap_or("string");
            let description = info
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let _ = writeln!(out, "  \"{name}\": <{field_type}> - {description}");
        }
    }
    out.push_str(
        "}\n\nRespond ONLY with a JSON document containing actual values for these fields. \
         Do NOT return the schema definition itself.",
    );
    out
}
