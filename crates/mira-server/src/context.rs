// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use mira_config::Config;
use mira_core::GenerationSettings;
use mira_memory::{MemoryStore, ResearchCorpus};
use mira_model::{CacheRegistry, ChatTemplate, ImageCaptioner, InferenceEngine, SamplerParams};
use mira_tools::ToolDispatcher;

/// Everything the HTTP handlers need, owned in one place and shared as
/// router state.
pub struct AppContext {
    pub config: Config,
    /// Model for the memory-grounded chat endpoint
    pub chat_engine: Arc<dyn InferenceEngine>,
    /// Model for the agentic tool-calling endpoint
    pub agentic_engine: Arc<dyn InferenceEngine>,
    pub captioner: Arc<dyn ImageCaptioner>,
    pub template: Arc<dyn ChatTemplate>,
    pub memory: Arc<MemoryStore>,
    pub corpus: Arc<ResearchCorpus>,
    pub caches: Arc<CacheRegistry>,
    pub dispatcher: Arc<ToolDispatcher>,
}

impl AppContext {
    /// Generation settings derived from the configured agentic knobs.
    pub fn generation_settings(&self) -> GenerationSettings {
        let a = &self.config.agentic;
        GenerationSettings {
            params: SamplerParams {
                temperature: a.temperature,
                top_p: a.top_p,
                top_k: a.top_k,
                min_p: a.min_p,
                repetition_penalty: a.repetition_penalty,
                repetition_context_size: a.repetition_context_size,
            },
            max_tokens: a.max_tokens,
            max_kv_size: a.max_kv_size,
            ..GenerationSettings::default()
        }
    }
}
