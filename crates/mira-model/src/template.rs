// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use crate::{Role, ToolSpec, Turn};

/// Prompt-template assembly collaborator.
///
/// The orchestrator re-renders the entire turn list through this seam
/// before every generation; prefix acceleration is the cache's job, not
/// the template's.
pub trait ChatTemplate: Send + Sync {
    fn render(&self, turns: &[Turn], tools: &[ToolSpec]) -> String;

    /// Whether the rendered generation prompt opens a reasoning block
    /// itself, so the model starts emitting thinking content without an
    /// opening `<think>` tag.
    fn requires_think_injection(&self) -> bool {
        false
    }
}

/// ChatML-style template as used by the Qwen family.
///
/// Tool schemas are advertised inside a `<tools>` block of the system
/// turn; tool results arrive as `tool`-roled turns.  When
/// `implicit_reasoning` is set, the generation prompt is pre-filled with
/// an opening `<think>` tag, which is why the splitter must inject the
/// missing tag on the way back out.
pub struct ChatMlTemplate {
    pub implicit_reasoning: bool,
}

impl ChatMlTemplate {
    pub fn new(implicit_reasoning: bool) -> Self {
        Self { implicit_reasoning }
    }
}

impl ChatTemplate for ChatMlTemplate {
    fn render(&self, turns: &[Turn], tools: &[ToolSpec]) -> String {
        let mut out = String::new();

        for (i, turn) in turns.iter().enumerate() {
            out.push_str("<|im_start|>");
            out.push_str(&turn.role.to_string());
            out.push('\n');

            // Tool schemas ride along with the first system turn.
            if i == 0 && turn.role == Role::System && !tools.is_empty() {
                out.push_str(&turn.text);
                out.push_str("\n\n<tools>\n");
                for spec in tools {
                    let line = serde_json::json!({
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.parameters,
                    });
                    out.push_str(&line.to_string());
                    out.push('\n');
                }
                out.push_str("</tools>");
            } else {
                out.push_str(&turn.text);
            }
            out.push_str("<|im_end|>\n");
        }

        out.push_str("<|im_start|>assistant\n");
        if self.implicit_reasoning {
            out.push_str("<think>\n");
        }
        out
    }

    fn requires_think_injection(&self) -> bool {
        self.implicit_reasoning
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ToolSpec {
        ToolSpec {
            name: "search_memories".into(),
            description: "search".into(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn renders_roles_in_order() {
        let t = ChatMlTemplate::new(false);
        let prompt = t.render(
            &[Turn::system("sys"), Turn::user("hi"), Turn::assistant("yo")],
            &[],
        );
        let sys = prompt.find("<|im_start|>system").unwrap();
        let user = prompt.find("<|im_start|>user").unwrap();
        let asst = prompt.find("<|im_start|>assistant\nyo").unwrap();
        assert!(sys < user && user < asst);
    }

    #[test]
    fn ends_with_generation_prompt() {
        let t = ChatMlTemplate::new(false);
        let prompt = t.render(&[Turn::user("hi")], &[]);
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn implicit_reasoning_prefills_think() {
        let t = ChatMlTemplate::new(true);
        let prompt = t.render(&[Turn::user("hi")], &[]);
        assert!(prompt.ends_with("<think>\n"));
        assert!(t.requires_think_injection());
    }

    #[test]
    fn tools_are_embedded_in_system_turn() {
        let t = ChatMlTemplate::new(false);
        let prompt = t.render(&[Turn::system("sys"), Turn::user("q")], &[spec()]);
        assert!(prompt.contains("<tools>"));
        assert!(prompt.contains("search_memories"));
        // Only once, in the system turn.
        assert_eq!(prompt.matches("<tools>").count(), 1);
    }

    #[test]
    fn tool_turns_render_with_tool_role() {
        let t = ChatMlTemplate::new(false);
        let prompt = t.render(
            &[Turn::user("q"), Turn::tool("search_memories", "<tool_call_results>\n\tok\n</tool_call_results>")],
            &[],
        );
        assert!(prompt.contains("<|im_start|>tool\n<tool_call_results>"));
    }
}
