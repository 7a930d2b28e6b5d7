// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool-call extraction from accumulated assistant text.
//!
//! The model requests external action with a marker block:
//!
//! ```text
//! <tool_call>
//! search_memories
//! <arg_key>terms</arg_key>
//! <arg_value>["cats", "cat diet"]</arg_value>
//! </tool_call>
//! ```
//!
//! The first non-empty line is either the tool name or a complete
//! `{"name": …, "arguments": {…}}` object.  Argument values may span
//! multiple lines; values that look JSON-shaped are decoded.  A final
//! fallback hunts for the first JSON object anywhere in the block.
//! Parsing never fails hard — an empty name signals failure and is fed
//! back to the model as an error tool result.

use serde_json::{Map, Value};

pub const TOOL_CALL_OPEN: &str = "<tool_call>";
pub const TOOL_CALL_CLOSE: &str = "</tool_call>";

const ARG_KEY_OPEN: &str = "<arg_key>";
const ARG_KEY_CLOSE: &str = "</arg_key>";
const ARG_VALUE_OPEN: &str = "<arg_value>";
const ARG_VALUE_CLOSE: &str = "</arg_value>";

/// A parsed tool invocation.  `name` is empty when parsing failed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// A tool call is considered present iff the closing marker appears.
pub fn contains_tool_call(text: &str) -> bool {
    text.contains(TOOL_CALL_CLOSE)
}

pub fn has_opening_tag(text: &str) -> bool {
    text.contains(TOOL_CALL_OPEN)
}

pub fn parse_tool_call(text: &str) -> ToolInvocation {
    let section = match text
        .split(TOOL_CALL_OPEN)
        .nth(1)
        .and_then(|rest| rest.split(TOOL_CALL_CLOSE).next())
    {
        Some(s) => s,
        None => return ToolInvocation::default(),
    };

    let lines: Vec<&str> = section.trim().lines().collect();
    let mut name = lines.first().map(|l| l.trim().to_string()).unwrap_or_default();
    let mut arguments = Map::new();

    // Single-line JSON form: the whole header is a JSON object.
    if name.starts_with('{') && name.ends_with('}') {
        if let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(&name) {
            if let Some(n) = payload.get("name").and_then(Value::as_str) {
                name = n.to_string();
            }
            if let Some(Value::Object(args)) = payload.get("arguments") {
                arguments.extend(args.clone());
            }
        }
    }

    // Key/value pair form.
    let mut i = 1;
    while i < lines.len() {
        let line = lines[i].trim();
        if line.starts_with(ARG_KEY_OPEN) && line.ends_with(ARG_KEY_CLOSE) {
            let key = &line[ARG_KEY_OPEN.len()..line.len() - ARG_KEY_CLOSE.len()];
            i += 1;
            if i < lines.len() && lines[i].trim().starts_with(ARG_VALUE_OPEN) {
                let current = lines[i].trim();
                let value = if current.ends_with(ARG_VALUE_CLOSE) {
                    current[ARG_VALUE_OPEN.len()..current.len() - ARG_VALUE_CLOSE.len()]
                        .to_string()
                } else {
                    // Multi-line value: collect until a line ending with the
                    // closing marker.
                    let mut value_lines: Vec<String> = Vec::new();
                    let first = &current[ARG_VALUE_OPEN.len()..];
                    if !first.is_empty() {
                        value_lines.push(first.to_string());
                    }
                    i += 1;
                    while i < lines.len() {
                        let current = lines[i];
                        if current.trim_end().ends_with(ARG_VALUE_CLOSE) {
                            let trimmed = current.trim_end();
                            let last = &trimmed[..trimmed.len() - ARG_VALUE_CLOSE.len()];
                            if !last.is_empty() {
                                value_lines.push(last.to_string());
                            }
                            break;
                        }
                        value_lines.push(current.to_string());
                        i += 1;
                    }
                    value_lines.join("\n")
                };
                arguments.insert(key.to_string(), decode_value(value));
                i += 1;
            } else {
                i += 1;
            }
        } else {
            i += 1;
        }
    }

    // Fallback: the first JSON object anywhere in the block.
    if arguments.is_empty() {
        if let Some(payload) = first_json_object(section) {
            if let Some(n) = payload.get("name").and_then(Value::as_str) {
                name = n.to_string();
            }
            if let Some(Value::Object(args)) = payload.get("arguments") {
                arguments = args.clone();
            }
        }
    }

    ToolInvocation { name, arguments }
}

/// A trimmed value that looks JSON-shaped (`{…}` or `[…]`) is decoded;
/// on decode failure the raw string is kept.
fn decode_value(value: String) -> Value {
    let trimmed = value.trim();
    let json_shaped = (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('{') && trimmed.ends_with('}'));
    if json_shaped {
        if let Ok(v) = serde_json::from_str(trimmed) {
            return v;
        }
    }
    Value::String(value)
}

/// Greedy match from the first `{` to the last `}` in the section.
fn first_json_object(section: &str) -> Option<Map<String, Value>> {
    let start = section.find('{')?;
    let end = section.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&section[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Render an invocation in the canonical key/value format.  This is the
/// inverse of [`parse_tool_call`] for well-formed invocations.
pub fn format_tool_call(invocation: &ToolInvocation) -> String {
    let mut out = String::new();
    out.push_str(TOOL_CALL_OPEN);
    out.push('\n');
    out.push_str(&invocation.name);
    out.push('\n');
    for (key, value) in &invocation.arguments {
        out.push_str(&format!("{ARG_KEY_OPEN}{key}{ARG_KEY_CLOSE}\n"));
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out.push_str(&format!("{ARG_VALUE_OPEN}{rendered}{ARG_VALUE_CLOSE}\n"));
    }
    out.push_str(TOOL_CALL_CLOSE);
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
