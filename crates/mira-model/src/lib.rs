// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod cache;
mod engine;
pub mod mock;
mod template;
mod types;

pub use cache::{CacheError, CacheGuard, CacheKey, CacheRegistry, CacheState, PromptCache};
pub use engine::{GenerationRequest, ImageCaptioner, InferenceEngine, TokenStream};
pub use template::{ChatMlTemplate, ChatTemplate};
pub use types::{Role, SamplerParams, ToolSpec, Turn};
