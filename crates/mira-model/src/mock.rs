// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{GenerationRequest, ImageCaptioner, InferenceEngine, TokenStream};

/// Deterministic mock engine for tests.  Streams a fixed reply one word
/// at a time.
pub struct MockEngine {
    reply: String,
}

impl MockEngine {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn generate(&self, _req: GenerationRequest) -> anyhow::Result<TokenStream> {
        let chunks: Vec<anyhow::Result<String>> = self
            .reply
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// A pre-scripted engine.  Each `generate` call pops the next chunk
/// sequence from the front of the queue, so tests can specify exact
/// stream shapes — straddled tags, tool calls, multi-round loops —
/// without a model.  Every request is recorded for inspection.
pub struct ScriptedEngine {
    scripts: Mutex<Vec<Vec<String>>>,
    implicit_reasoning: bool,
    pub requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl ScriptedEngine {
    /// The outer `Vec` is the ordered list of generations; the inner
    /// `Vec` is the chunk sequence streamed for that generation.
    pub fn new(scripts: Vec<Vec<&str>>) -> Self {
        Self {
            scripts: Mutex::new(
                scripts
                    .into_iter()
                    .map(|s| s.into_iter().map(String::from).collect())
                    .collect(),
            ),
            implicit_reasoning: false,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Declare that this engine streams reasoning without an opening
    /// `<think>` tag, so the orchestrator enables splitter injection.
    pub fn with_implicit_reasoning(mut self) -> Self {
        self.implicit_reasoning = true;
        self
    }

    /// Number of generations performed so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn model_name(&self) -> &str {
        "scripted-model"
    }

    fn opens_reasoning_implicitly(&self) -> bool {
        self.implicit_reasoning
    }

    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<TokenStream> {
        self.requests.lock().unwrap().push(req);
        let chunks = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                vec!["[no more scripts]".to_string()]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<String>> = chunks.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

/// An engine whose `generate` always fails.  Exercises the
/// infrastructure-error path (`error` envelope, stream close).
pub struct FailingEngine;

#[async_trait]
impl InferenceEngine for FailingEngine {
    fn model_name(&self) -> &str {
        "failing-model"
    }

    async fn generate(&self, _req: GenerationRequest) -> anyhow::Result<TokenStream> {
        anyhow::bail!("model failed to load")
    }
}

/// Captioner returning a fixed description; records what it was asked.
pub struct ScriptedCaptioner {
    description: String,
    pub calls: Arc<Mutex<Vec<(usize, Option<String>)>>>,
}

impl ScriptedCaptioner {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ImageCaptioner for ScriptedCaptioner {
    async fn describe(&self, image: &[u8], context: Option<&str>) -> anyhow::Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((image.len(), context.map(String::from)));
        Ok(self.description.clone())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::SamplerParams;

    fn req() -> GenerationRequest {
        GenerationRequest {
            prompt: "p".into(),
            params: SamplerParams::default(),
            max_tokens: 100,
            max_kv_size: 1000,
            cache: None,
        }
    }

    #[tokio::test]
    async fn mock_streams_reply_in_chunks() {
        let e = MockEngine::new("hello brave world");
        let mut stream = e.generate(req()).await.unwrap();
        let mut text = String::new();
        let mut chunks = 0;
        while let Some(c) = stream.next().await {
            text.push_str(&c.unwrap());
            chunks += 1;
        }
        assert_eq!(text, "hello brave world");
        assert!(chunks > 1);
    }

    #[tokio::test]
    async fn scripted_pops_scripts_in_order() {
        let e = ScriptedEngine::new(vec![vec!["one"], vec!["two"]]);
        for expected in ["one", "two"] {
            let mut stream = e.generate(req()).await.unwrap();
            let chunk = stream.next().await.unwrap().unwrap();
            assert_eq!(chunk, expected);
        }
        assert_eq!(e.calls(), 2);
    }

    #[tokio::test]
    async fn scripted_fallback_when_exhausted() {
        let e = ScriptedEngine::new(vec![]);
        let mut stream = e.generate(req()).await.unwrap();
        let chunk = stream.next().await.unwrap().unwrap();
        assert!(chunk.contains("no more scripts"));
    }

    #[tokio::test]
    async fn scripted_records_requests() {
        let e = ScriptedEngine::new(vec![vec!["x"]]);
        let _ = e.generate(req()).await.unwrap();
        let reqs = e.requests.lock().unwrap();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].prompt, "p");
    }

    #[tokio::test]
    async fn failing_engine_errors() {
        assert!(FailingEngine.generate(req()).await.is_err());
    }
}
