// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::cache::PromptCache;
use crate::SamplerParams;

/// Raw text chunks from the model, at arbitrary boundaries.
///
/// Reasoning markers (`<think>`) and tool-call markers (`<tool_call>`)
/// arrive inline in this stream and may straddle chunk boundaries; the
/// orchestrator's splitter is responsible for separating them.
pub type TokenStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// One generation request against a rendered prompt.
#[derive(Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub params: SamplerParams,
    pub max_tokens: u32,
    pub max_kv_size: u32,
    /// Prompt-state cache for prefix reuse.  The caller retains the
    /// registry guard; the engine only shares the cache handle for the
    /// duration of the generation.
    pub cache: Option<Arc<PromptCache>>,
}

impl std::fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("prompt_len", &self.prompt.len())
            .field("max_tokens", &self.max_tokens)
            .field("max_kv_size", &self.max_kv_size)
            .field("cache", &self.cache.as_ref().map(|c| c.key().to_string()))
            .finish()
    }
}

/// The token-generation collaborator.
///
/// Model loading and decoding live behind this seam.  Implementations
/// must serialize concurrent generations on the same underlying model
/// object; callers assume one generation at a time per engine.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Model identifier, used for cache-key derivation and logging.
    fn model_name(&self) -> &str;

    /// Whether this model's chat template opens a reasoning block
    /// implicitly, i.e. the stream begins inside `<think>` without
    /// emitting the opening tag.  Drives the splitter's injection mode.
    fn opens_reasoning_implicitly(&self) -> bool {
        false
    }

    /// Start one generation and return the raw chunk stream.
    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<TokenStream>;
}

/// The vision-captioning collaborator used for image memories.
#[async_trait]
pub trait ImageCaptioner: Send + Sync {
    /// Produce a detailed textual description of the image.  `context`
    /// is the user-supplied memory text accompanying the upload, if any.
    async fn describe(&self, image: &[u8], context: Option<&str>) -> anyhow::Result<String>;
}
