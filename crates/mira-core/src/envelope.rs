// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Framed event envelopes for the streaming HTTP surface.
//!
//! Every record on the wire is `data: <json>\n\n` with a JSON body that
//! always carries `type`.  The type names are contractual — the HTTP
//! client matches on them string-identically.

use serde_json::{json, Map, Value};

use crate::splitter::{ControlEvent, SplitItem};

/// Contractual event type names.
pub mod event_type {
    pub const ASSISTANT_TOKEN: &str = "assistant_token";
    pub const THINKING_TOKEN: &str = "thinking_token";
    pub const THINKING_COMPLETE: &str = "thinking_complete";
    pub const SUBAGENT_TOKEN: &str = "subagent_token";
    pub const SUBAGENT_THINKING_TOKEN: &str = "subagent_thinking_token";
    pub const SUBAGENT_THINKING_COMPLETE: &str = "subagent_thinking_complete";
    pub const ASSISTANT_TOOL_CALL_START: &str = "assistant_tool_call_start";
    pub const ASSISTANT_TOOL_CALL_END: &str = "assistant_tool_call_end";
    pub const SUBAGENT_TOOL_CALL_START: &str = "subagent_tool_call_start";
    pub const SUBAGENT_TOOL_CALL_END: &str = "subagent_tool_call_end";
    pub const END: &str = "end";
    pub const ERROR: &str = "error";
}

/// One typed record on the output stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    body: Value,
}

impl Envelope {
    pub fn new(event_type: &str) -> Self {
        Self {
            body: json!({"type": event_type}),
        }
    }

    pub fn token(event_type: &str, token: &str) -> Self {
        Self {
            body: json!({"type": event_type, "token": token}),
        }
    }

    pub fn end() -> Self {
        Self::new(event_type::END)
    }

    pub fn error(message: &str) -> Self {
        Self {
            body: json!({"type": event_type::ERROR, "message": message}),
        }
    }

    /// Merge an extra static payload field (existing fields win).
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.body {
            map.entry(key.to_string()).or_insert_with(|| value.into());
        }
        self
    }

    /// Build an envelope from an inline control event: the body is the
    /// event payload with `type` set to the event kind.
    pub fn from_control(event: &ControlEvent, type_name: &str) -> Self {
        let mut map = match &event.payload {
            Value::Object(m) => m.clone(),
            Value::Null => Map::new(),
            other => {
                let mut m = Map::new();
                m.insert("payload".into(), other.clone());
                m
            }
        };
        map.insert("type".into(), Value::String(type_name.to_string()));
        Self {
            body: Value::Object(map),
        }
    }

    pub fn event_type(&self) -> &str {
        self.body["type"].as_str().unwrap_or("")
    }

    pub fn token_text(&self) -> Option<&str> {
        self.body.get("token").and_then(Value::as_str)
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Encode as one framed record.  Encoding is lossy-safe: a body that
    /// fails to serialize degrades to a minimal error envelope instead of
    /// raising.
    pub fn encode(&self) -> String {
        let body = serde_json::to_string(&self.body)
            .unwrap_or_else(|_| r#"{"type":"error","message":"envelope encoding failed"}"#.into());
        format!("data: {body}\n\n")
    }
}

/// Map a split item to an assistant-level envelope.
pub fn assistant_envelope(item: &SplitItem) -> Option<Envelope> {
    match item {
        SplitItem::PlainDelta(s) => Some(Envelope::token(event_type::ASSISTANT_TOKEN, s)),
        SplitItem::ThinkDelta(s) => Some(Envelope::token(event_type::THINKING_TOKEN, s)),
        SplitItem::ThinkComplete => Some(Envelope::new(event_type::THINKING_COMPLETE)),
        SplitItem::Event(ev) => Some(Envelope::from_control(ev, &ev.kind)),
    }
}

/// Map a split item to a subagent-prefixed envelope tagged with the
/// delegated tool's name.
pub fn subagent_envelope(item: &SplitItem, tool_name: &str) -> Option<Envelope> {
    let env = match item {
        SplitItem::PlainDelta(s) => Envelope::token(event_type::SUBAGENT_TOKEN, s),
        SplitItem::ThinkDelta(s) => Envelope::token(event_type::SUBAGENT_THINKING_TOKEN, s),
        SplitItem::ThinkComplete => Envelope::new(event_type::SUBAGENT_THINKING_COMPLETE),
        SplitItem::Event(ev) => Envelope::from_control(ev, &ev.kind),
    };
    Some(env.with_field("tool_name", tool_name))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
