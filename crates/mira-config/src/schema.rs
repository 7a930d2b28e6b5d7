// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub agentic: AgenticConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Model identifiers forwarded to the inference engine.
///
/// Three distinct models serve three call paths: plain memory chat,
/// the agentic tool-calling loop, and image captioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model used for the memory-grounded chat endpoint
    pub chat_model: String,
    /// Model used for the agentic (tool-calling) loop
    pub agentic_model: String,
    /// Vision model used to caption image memories
    pub image_model: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            chat_model: "qwen2.5-14b-instruct-1m".into(),
            agentic_model: "qwen3-30b-a3b".into(),
            image_model: "qwen2.5-vl-72b-instruct".into(),
        }
    }
}

/// Sampling and budget parameters for the agentic loop.
///
/// Field names follow the environment variable surface
/// (`AGENTIC_TEMP`, `AGENTIC_TOP_P`, …); see [`crate::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub min_p: f32,
    pub repetition_penalty: f32,
    pub repetition_context_size: u32,
    /// Maximum tokens generated per assistant turn
    pub max_tokens: u32,
    /// Upper bound on KV-cache entries the engine may hold for one prompt
    pub max_kv_size: u32,
}

impl Default for AgenticConfig {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            top_p: 0.95,
            top_k: 20,
            min_p: 0.0,
            repetition_penalty: 1.05,
            repetition_context_size: 64,
            max_tokens: 81_920,
            max_kv_size: 256_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_tokens: 100_000,
            temperature: 0.7,
        }
    }
}

/// On-disk locations: memory database, reference corpus, prompt caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub corpus_db_path: PathBuf,
    pub cache_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mira");
        Self {
            db_path: data.join("memories.db"),
            corpus_db_path: data.join("wiki.db"),
            cache_dir: data.join("caches"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3020,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agentic_defaults_match_contract() {
        let a = AgenticConfig::default();
        assert_eq!(a.temperature, 0.6);
        assert_eq!(a.top_p, 0.95);
        assert_eq!(a.top_k, 20);
        assert_eq!(a.min_p, 0.0);
        assert_eq!(a.repetition_penalty, 1.05);
        assert_eq!(a.repetition_context_size, 64);
        assert_eq!(a.max_tokens, 81_920);
        assert_eq!(a.max_kv_size, 256_000);
    }

    #[test]
    fn image_defaults_match_contract() {
        let i = ImageConfig::default();
        assert_eq!(i.max_tokens, 100_000);
        assert_eq!(i.temperature, 0.7);
    }

    #[test]
    fn server_defaults_to_loopback() {
        let s = ServerConfig::default();
        assert_eq!(s.host, "127.0.0.1");
        assert_eq!(s.port, 3020);
    }

    #[test]
    fn storage_paths_share_data_dir() {
        let s = StorageConfig::default();
        assert_eq!(s.db_path.parent(), s.corpus_db_path.parent());
    }
}
