// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::process::Stdio;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};

use mira_memory::{MemoryStore, ResearchCorpus};
use mira_model::CacheRegistry;

use crate::{terminal, ToolKind};

/// Executes named tools against the collaborator services.
///
/// Every path returns text: execution failures are described in the
/// result string and fed back to the model as a tool turn, never
/// propagated as an error.
pub struct ToolDispatcher {
    memory: Arc<MemoryStore>,
    corpus: Arc<ResearchCorpus>,
    caches: Arc<CacheRegistry>,
    voice_command: String,
    terminal_timeout_secs: u64,
}

impl ToolDispatcher {
    pub fn new(
        memory: Arc<MemoryStore>,
        corpus: Arc<ResearchCorpus>,
        caches: Arc<CacheRegistry>,
    ) -> Self {
        Self {
            memory,
            corpus,
            caches,
            voice_command: "say".into(),
            terminal_timeout_secs: 30,
        }
    }

    pub fn with_voice_command(mut self, command: impl Into<String>) -> Self {
        self.voice_command = command.into();
        self
    }

    pub fn with_terminal_timeout(mut self, secs: u64) -> Self {
        self.terminal_timeout_secs = secs;
        self
    }

    pub async fn dispatch(&self, name: &str, args: &Map<String, Value>) -> String {
        let kind: ToolKind = match name.parse() {
            Ok(k) => k,
            Err(e) => return format!("Error: {e}"),
        };
        info!(tool = %kind, "executing tool");

        match kind {
            ToolKind::SearchMemories => self.search_memories(args),
            ToolKind::PerformResearch => self.perform_research(args),
            ToolKind::GetFullTopicDetails => self.get_full_topic_details(args),
            ToolKind::SaveMemory => self.save_memory(args),
            ToolKind::EditMemory => self.edit_memory(args),
            ToolKind::VoiceResponse => self.voice_response(args),
            ToolKind::TerminalCommand => self.terminal_command(args).await,
        }
    }

    fn search_memories(&self, args: &Map<String, Value>) -> String {
        let terms = match list_arg(args, "terms") {
            Some(t) if !t.is_empty() => t,
            _ => return "Error: `terms` must be a list of 1-5 search terms".into(),
        };
        let memories = match self.memory.search_memories(&terms) {
            Ok(m) => m,
            Err(e) => return format!("Error searching memories: {e}"),
        };
        if memories.is_empty() {
            return "No memories found, try different keywords.".into();
        }
        let mut result = String::new();
        for m in &memories {
            result.push_str(&format!("\nMemory ID: {}\n", m.id));
            result.push_str(&format!("Created: {}\n", m.created_at));
            result.push_str(&format!("Content: {}\n", m.memory));
            if m.has_media {
                result.push_str("[Contains image]\n");
            }
            result.push_str(&"-".repeat(40));
            result.push('\n');
        }
        result
    }

    fn perform_research(&self, args: &Map<String, Value>) -> String {
        let terms = match list_arg(args, "terms") {
            Some(t) if !t.is_empty() => t,
            _ => return "Error: `terms` must be a list of 1-5 search terms".into(),
        };
        match self.corpus.search(&terms) {
            Ok(result) if !result.is_empty() => format!(
                "{result}\n\n\
                 To unlock full topic details, use the `get_full_topic_details(['topic_id'])` \
                 tool for up to 5 of the above topics.\n\n\
                 If these matches aren't useful, simply attempt different keywords in a new \
                 `perform_research` tool call.\n"
            ),
            Ok(_) => "No results found, try different keywords.".into(),
            Err(e) => format!("Error performing research: {e}"),
        }
    }

    fn get_full_topic_details(&self, args: &Map<String, Value>) -> String {
        let topic_ids = match list_arg(args, "topic_ids") {
            Some(ids) if !ids.is_empty() => ids,
            _ => return "Error: `topic_ids` must be a list of up to 5 topic ids".into(),
        };
        match self.corpus.full_articles(&topic_ids) {
            Ok(result) if !result.is_empty() => {
                format!(
                    "{result}\n\nRetrieved full topic details for [{}]",
                    topic_ids.join(", ")
                )
            }
            Ok(_) => "No topic details found.".into(),
            Err(e) => format!("Error fetching topic details: {e}"),
        }
    }

    fn save_memory(&self, args: &Map<String, Value>) -> String {
        let text = match str_arg(args, "memory_text") {
            Some(t) if !t.is_empty() => t,
            _ => return "Error: `memory_text` is required".into(),
        };
        match self.memory.save_memory(text, None) {
            Ok(_) => {
                self.caches.invalidate_memory_caches();
                "Memory saved.".into()
            }
            Err(e) => format!("Error saving memory: {e}"),
        }
    }

    fn edit_memory(&self, args: &Map<String, Value>) -> String {
        let id = match id_arg(args, "memory_id") {
            Some(id) => id,
            None => return "Error: `memory_id` is required".into(),
        };
        let text = match str_arg(args, "new_memory_text") {
            Some(t) if !t.is_empty() => t,
            _ => return "Error: `new_memory_text` is required".into(),
        };
        match self.memory.edit_memory(id, text) {
            Ok(()) => {
                self.caches.invalidate_memory_caches();
                format!("Memory `{id}` edited with new memory text.")
            }
            Err(e) => format!("Error editing memory: {e}"),
        }
    }

    fn voice_response(&self, args: &Map<String, Value>) -> String {
        let text = match str_arg(args, "text") {
            Some(t) if !t.is_empty() => t,
            _ => return "Error: `text` is required".into(),
        };
        // Fire and forget: the speech process outlives the tool call.
        match tokio::process::Command::new(&self.voice_command)
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(_) => "Voice response was successful.".into(),
            Err(e) => {
                warn!(command = %self.voice_command, error = %e, "voice response failed");
                format!("Error producing voice response: {e}")
            }
        }
    }

    async fn terminal_command(&self, args: &Map<String, Value>) -> String {
        let command = match str_arg(args, "command") {
            Some(c) if !c.is_empty() => c,
            _ => return "Error: `command` is required".into(),
        };
        terminal::run(command, self.terminal_timeout_secs).await
    }
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// Accepts either a string id or a bare integer — models emit both.
fn id_arg(args: &Map<String, Value>, key: &str) -> Option<i64> {
    match args.get(key)? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// Accepts an array of strings, or a bare string as a one-element list.
fn list_arg(args: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    match args.get(key)? {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
        ),
        Value::String(s) => Some(vec![s.clone()]),
        _ => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mira_model::CacheKey;
    use serde_json::json;

    fn dispatcher() -> (ToolDispatcher, Arc<MemoryStore>, Arc<CacheRegistry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let corpus = Arc::new(ResearchCorpus::open_in_memory().unwrap());
        corpus
            .insert_article("Rust", "Rust is a systems programming language.")
            .unwrap();
        let caches = Arc::new(CacheRegistry::new(dir.path()).unwrap());
        let d = ToolDispatcher::new(Arc::clone(&memory), corpus, Arc::clone(&caches))
            .with_voice_command("true")
            .with_terminal_timeout(5);
        (d, memory, caches, dir)
    }

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_as_text() {
        let (d, ..) = dispatcher();
        let out = d.dispatch("frobnicate", &Map::new()).await;
        assert_eq!(out, "Error: unknown tool: frobnicate");
    }

    #[tokio::test]
    async fn save_memory_persists_and_confirms() {
        let (d, memory, ..) = dispatcher();
        let out = d
            .dispatch("save_memory", &args(json!({"memory_text": "I adopted a cat"})))
            .await;
        assert_eq!(out, "Memory saved.");
        assert_eq!(memory.recent_memories(1).unwrap()[0].memory, "I adopted a cat");
    }

    #[tokio::test]
    async fn save_memory_invalidates_memory_caches() {
        let (d, _memory, caches, _dir) = dispatcher();
        let key = CacheKey::derive("m", "memory_cache", None);
        {
            let _guard = caches.get_cache(&key).unwrap();
            caches.mark_initialized(&key);
        }
        let _ = d
            .dispatch("save_memory", &args(json!({"memory_text": "x"})))
            .await;
        let guard = caches.get_cache(&key).unwrap();
        assert!(!guard.cache().is_initialized());
    }

    #[tokio::test]
    async fn search_memories_formats_matches() {
        let (d, memory, ..) = dispatcher();
        memory.save_memory("the cat sat", None).unwrap();
        let out = d
            .dispatch("search_memories", &args(json!({"terms": ["cat"]})))
            .await;
        assert!(out.contains("Memory ID: 1"));
        assert!(out.contains("Content: the cat sat"));
        assert!(out.contains(&"-".repeat(40)));
    }

    #[tokio::test]
    async fn search_memories_reports_no_matches() {
        let (d, ..) = dispatcher();
        let out = d
            .dispatch("search_memories", &args(json!({"terms": ["dog"]})))
            .await;
        assert_eq!(out, "No memories found, try different keywords.");
    }

    #[tokio::test]
    async fn perform_research_appends_unlock_hint() {
        let (d, ..) = dispatcher();
        let out = d
            .dispatch("perform_research", &args(json!({"terms": ["rust"]})))
            .await;
        assert!(out.contains("# [1]: Rust"));
        assert!(out.contains("To unlock full topic details"));
    }

    #[tokio::test]
    async fn get_full_topic_details_fetches_article() {
        let (d, ..) = dispatcher();
        use base64::Engine;
        let topic_id = base64::engine::general_purpose::STANDARD.encode("Rust");
        let out = d
            .dispatch("get_full_topic_details", &args(json!({"topic_ids": [topic_id]})))
            .await;
        assert!(out.contains("systems programming language"));
        assert!(out.contains("Retrieved full topic details"));
    }

    #[tokio::test]
    async fn edit_memory_accepts_string_ids() {
        let (d, memory, ..) = dispatcher();
        memory.save_memory("old", None).unwrap();
        let out = d
            .dispatch(
                "edit_memory",
                &args(json!({"memory_id": "1", "new_memory_text": "new"})),
            )
            .await;
        assert_eq!(out, "Memory `1` edited with new memory text.");
        assert_eq!(memory.get_memory(1).unwrap().unwrap().memory, "new");
    }

    #[tokio::test]
    async fn edit_memory_unknown_id_is_text_error() {
        let (d, ..) = dispatcher();
        let out = d
            .dispatch(
                "edit_memory",
                &args(json!({"memory_id": 42, "new_memory_text": "new"})),
            )
            .await;
        assert!(out.contains("Error editing memory"));
    }

    #[tokio::test]
    async fn terminal_blocklist_is_enforced() {
        let (d, ..) = dispatcher();
        let out = d
            .dispatch("terminal_command", &args(json!({"command": "rm -rf /"})))
            .await;
        assert_eq!(out, "Error: Forbidden command pattern detected");
    }

    #[tokio::test]
    async fn terminal_command_runs() {
        let (d, ..) = dispatcher();
        let out = d
            .dispatch("terminal_command", &args(json!({"command": "echo ok"})))
            .await;
        assert!(out.contains("Output:\nok"));
    }

    #[tokio::test]
    async fn voice_response_confirms() {
        let (d, ..) = dispatcher();
        let out = d
            .dispatch("voice_response", &args(json!({"text": "hello"})))
            .await;
        assert_eq!(out, "Voice response was successful.");
    }

    #[tokio::test]
    async fn missing_arguments_are_text_errors() {
        let (d, ..) = dispatcher();
        for (tool, expected) in [
            ("search_memories", "`terms`"),
            ("save_memory", "`memory_text`"),
            ("terminal_command", "`command`"),
        ] {
            let out = d.dispatch(tool, &Map::new()).await;
            assert!(out.contains(expected), "{tool}: {out}");
        }
    }
}
