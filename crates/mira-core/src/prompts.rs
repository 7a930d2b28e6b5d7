// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt builders for the assistant, the memory-grounded chat, and the
//! sub-agent task loop.

use mira_model::Turn;
use serde_json::{Map, Value};

pub fn current_date() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// System prompt for the general agentic assistant.
pub fn assistant_system_prompt() -> String {
    format!(
        "The current date is {}.\n\
         Please assist the user with their query.\n\
         Use tool calls in succession until the task is complete.\n\
         You have the ability to iterate on your responses using tool calls to gain new information.\n\
         Do not fabricate memories or information - when uncertain about a fact/subject/topic, \
         use the <perform_research> tool.\n\
         Favor long, detailed responses and numerous tool calls/attempts when appropriate.",
        current_date()
    )
}

/// System prompt for the memory-grounded chat: the full memory archive is
/// embedded as XML so the model can cite individual memories.
pub fn memory_chat_system_prompt(memories_xml: &str) -> String {
    format!(
        "<memories>\n{memories_xml}\n</memories>\n\n\
         <role>\n\
         The current date is {date}.\n\
         You are a master of searching through memories and understanding how they relate and overlap.\n\
         You have the ability to accurately catalog and reference memories.\n\
         </role>\n\n\
         <instructions>\n\
         Always utilize the <memories> context as a key point of reference when responding to user \
         queries - the memories are a collection of your life experiences, and they are a valuable \
         resource for you to use.\n\
         Always consider every memory in its entirety while responding - being as complete as possible \
         is the goal.\n\
         Always end your response with an array of citations that refer to individual memories that \
         relate to your response like this: `sources=[37, 73, 219]`.\n\
         </instructions>",
        date = current_date()
    )
}

/// System + user turn pair describing a delegated tool task for the
/// sub-agent.
pub fn subagent_turns(
    parent_query: &str,
    tool_name: &str,
    arguments: &Map<String, Value>,
) -> (Turn, Turn) {
    let system = Turn::system(format!(
        "The current date is {}.\n\
         You are a focused sub-agent executing one tool task end-to-end on behalf of an assistant.\n\
         Carry the task through with tool calls until it is complete, then report the findings as \
         plain text.  Your final response is returned to the assistant verbatim.",
        current_date()
    ));
    let args = serde_json::to_string_pretty(&Value::Object(arguments.clone()))
        .unwrap_or_else(|_| "{}".into());
    let user = Turn::user(format!(
        "The assistant is handling this user query:\n\n{parent_query}\n\n\
         It delegated the tool task `{tool_name}` with these arguments:\n\n{args}\n\n\
         Execute the task and report the result."
    ));
    (system, user)
}

/// Contractual wrapper for tool results fed back to the model — the chat
/// templates expect this exact shape.
pub fn wrap_tool_results(result: &str) -> String {
    format!("<tool_call_results>\n\t{result}\n</tool_call_results>")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
