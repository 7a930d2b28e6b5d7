// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use mira_model::ToolSpec;
use serde_json::json;

/// Schemas for every dispatchable tool, advertised to the model in the
/// rendered prompt.
pub fn tool_catalog() -> Vec<ToolSpec> {
    let terms_schema = json!({
        "type": "array",
        "items": {"type": "string"},
        "description": "List of SIMPLE search term variations, usually not exceeding three words per term (up to 5 terms)",
        "minItems": 1,
        "maxItems": 5
    });

    vec![
        ToolSpec {
            name: "search_memories".into(),
            description: "When recalling personal facts or details (or explicit memories), \
                          perform a fulltext search on memories using multiple variations of \
                          simple terms (examples: 'cats', 'cat care', 'cat diet', 'cat health')"
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {"terms": terms_schema},
                "required": ["terms"]
            }),
        },
        ToolSpec {
            name: "perform_research".into(),
            description: "When uncertain about a fact/subject/topic, perform a fulltext search \
                          on deeper knowledge using multiple variations of simple terms"
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {"terms": terms_schema},
                "required": ["terms"]
            }),
        },
        ToolSpec {
            name: "get_full_topic_details".into(),
            description: "Get full information about the list of specific topics".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "topic_ids": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Required list of `topic_id`s to get full information about",
                        "minItems": 0,
                        "maxItems": 5
                    }
                },
                "required": ["topic_ids"]
            }),
        },
        ToolSpec {
            name: "save_memory".into(),
            description: "Save a new memory".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "memory_text": {"type": "string", "description": "The text to save as a memory"}
                },
                "required": ["memory_text"]
            }),
        },
        ToolSpec {
            name: "edit_memory".into(),
            description: "Edit a memory".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "memory_id": {"type": "string", "description": "The id of the memory to edit"},
                    "new_memory_text": {"type": "string", "description": "The fully adjusted new text for the memory"}
                },
                "required": ["memory_id", "new_memory_text"]
            }),
        },
        ToolSpec {
            name: "voice_response".into(),
            description: "Generate a voice response".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "The text to generate a voice response for"}
                },
                "required": ["text"]
            }),
        },
        ToolSpec {
            name: "terminal_command".into(),
            description: "Execute a terminal command in a local shell environment".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "The command to execute"}
                },
                "required": ["command"]
            }),
        },
    ]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
