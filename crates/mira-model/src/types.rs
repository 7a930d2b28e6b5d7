// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// One record in the conversation fed to the model.
///
/// Turns are append-only: the orchestrator never mutates a body after it
/// has been pushed onto the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    /// Set if and only if `role == Role::Tool`
    pub tool_name: Option<String>,
    pub text: String,
}

impl Turn {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            tool_name: None,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            tool_name: None,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            tool_name: None,
            text: text.into(),
        }
    }

    pub fn tool(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            tool_name: Some(name.into()),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// A tool schema advertised to the model in the rendered prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

/// Sampling parameters forwarded verbatim to the inference engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub min_p: f32,
    pub repetition_penalty: f32,
    pub repetition_context_size: u32,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            top_p: 0.95,
            top_k: 20,
            min_p: 0.0,
            repetition_penalty: 1.05,
            repetition_context_size: 64,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_turn_carries_name() {
        let t = Turn::tool("search_memories", "result text");
        assert_eq!(t.role, Role::Tool);
        assert_eq!(t.tool_name.as_deref(), Some("search_memories"));
    }

    #[test]
    fn plain_turns_carry_no_tool_name() {
        assert!(Turn::system("s").tool_name.is_none());
        assert!(Turn::user("u").tool_name.is_none());
        assert!(Turn::assistant("a").tool_name.is_none());
    }

    #[test]
    fn role_display_is_lowercase() {
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(Role::Tool.to_string(), "tool");
    }
}
