// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::str::FromStr;

/// The fixed set of tools the model may invoke.
///
/// Dispatch matches exhaustively on this enum; a name outside the set
/// parses to [`UnknownTool`] and is reported back to the model as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    SearchMemories,
    PerformResearch,
    GetFullTopicDetails,
    SaveMemory,
    EditMemory,
    VoiceResponse,
    TerminalCommand,
}

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        ToolKind::SearchMemories,
        ToolKind::PerformResearch,
        ToolKind::GetFullTopicDetails,
        ToolKind::SaveMemory,
        ToolKind::EditMemory,
        ToolKind::VoiceResponse,
        ToolKind::TerminalCommand,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::SearchMemories => "search_memories",
            ToolKind::PerformResearch => "perform_research",
            ToolKind::GetFullTopicDetails => "get_full_topic_details",
            ToolKind::SaveMemory => "save_memory",
            ToolKind::EditMemory => "edit_memory",
            ToolKind::VoiceResponse => "voice_response",
            ToolKind::TerminalCommand => "terminal_command",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown tool: {0}")]
pub struct UnknownTool(pub String);

impl FromStr for ToolKind {
    type Err = UnknownTool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| UnknownTool(s.to_string()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
