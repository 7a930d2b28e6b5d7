// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agentic streaming orchestrator.
//!
//! Drives one conversation turn: render the prompt, stream the model,
//! split reasoning from plain content, detect and dispatch tool calls,
//! feed results back as tool turns, and repeat until the model answers
//! without a tool call.  In `Streaming` mode every delta becomes an
//! envelope on the output channel; in `Collect` mode deltas and tool
//! events are published to a sub-agent's queues and only the final text
//! is returned.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use mira_model::{
    CacheKey, CacheRegistry, ChatTemplate, GenerationRequest, InferenceEngine, SamplerParams, Turn,
};
use mira_tools::{tool_catalog, ToolDispatcher};

use crate::envelope::{assistant_envelope, event_type, Envelope};
use crate::prompts::wrap_tool_results;
use crate::splitter::{ControlEvent, SplitItem, StreamItem, TagSplitter};
use crate::toolcall::{contains_tool_call, has_opening_tag, parse_tool_call, ToolInvocation};

/// Best-effort deadline when joining a sub-agent worker after the client
/// has disconnected.
const WORKER_JOIN_DEADLINE: Duration = Duration::from_secs(5);

pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Envelope> + Send>>;

/// Generation knobs for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub params: SamplerParams,
    pub max_tokens: u32,
    pub max_kv_size: u32,
    /// Safety valve on the generate → tool → generate loop
    pub max_rounds: u32,
    /// Save the cache to disk when the turn succeeds.  Sub-agents turn
    /// this off: their cache is released on completion instead.
    pub persist_cache: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            params: SamplerParams::default(),
            max_tokens: 81_920,
            max_kv_size: 256_000,
            max_rounds: 24,
            persist_cache: true,
        }
    }
}

/// Result of dispatching one tool call.
///
/// When `stream` is present (sub-agent path) it must be drained before
/// `result` resolves — the result supplier joins the worker.
pub struct ToolOutcome {
    pub stream: Option<EnvelopeStream>,
    pub result: ResultHandle,
}

impl ToolOutcome {
    pub fn ready(text: impl Into<String>) -> Self {
        Self {
            stream: None,
            result: ResultHandle::Ready(text.into()),
        }
    }
}

/// Deferred textual result of a tool dispatch.
pub enum ResultHandle {
    Ready(String),
    Join(tokio::task::JoinHandle<String>),
}

impl ResultHandle {
    pub async fn resolve(self) -> String {
        match self {
            ResultHandle::Ready(text) => text,
            ResultHandle::Join(handle) => handle
                .await
                .unwrap_or_else(|e| format!("Error: tool worker failed: {e}")),
        }
    }

    /// Best-effort join used on the disconnect path: give the worker a
    /// deadline, then let it finish detached.
    pub async fn resolve_within(self, deadline: Duration) -> Option<String> {
        match self {
            ResultHandle::Ready(text) => Some(text),
            ResultHandle::Join(handle) => tokio::time::timeout(deadline, handle)
                .await
                .ok()
                .and_then(Result::ok),
        }
    }
}

/// Maps a parsed invocation to an executing tool.
///
/// The assistant orchestrator uses the sub-agent handler; sub-agents use
/// the direct handler, which caps the recursion depth at one.
#[async_trait]
pub trait ToolCallHandler: Send + Sync {
    async fn handle(&self, invocation: &ToolInvocation, parent_query: &str) -> ToolOutcome;
}

/// Synchronous dispatch against the tool dispatcher, no sub-agent.
pub struct DirectHandler {
    dispatcher: Arc<ToolDispatcher>,
}

impl DirectHandler {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl ToolCallHandler for DirectHandler {
    async fn handle(&self, invocation: &ToolInvocation, _parent_query: &str) -> ToolOutcome {
        let text = self
            .dispatcher
            .dispatch(&invocation.name, &invocation.arguments)
            .await;
        ToolOutcome::ready(text)
    }
}

/// Where the orchestrator's output goes.
pub enum OutputMode {
    /// Emit envelopes to the HTTP consumer.  A failed send means the
    /// client disconnected: cease iteration and wind down.
    Streaming(mpsc::Sender<Envelope>),
    /// Publish deltas and tool events onto a sub-agent's queues; the
    /// final text is the return value of `run`.
    Collect {
        tokens: mpsc::Sender<SplitItem>,
        events: mpsc::Sender<ControlEvent>,
    },
}

pub struct Orchestrator {
    engine: Arc<dyn InferenceEngine>,
    template: Arc<dyn ChatTemplate>,
    caches: Arc<CacheRegistry>,
    handler: Arc<dyn ToolCallHandler>,
    settings: GenerationSettings,
    turns: Vec<Turn>,
    query: String,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        template: Arc<dyn ChatTemplate>,
        caches: Arc<CacheRegistry>,
        handler: Arc<dyn ToolCallHandler>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            engine,
            template,
            caches,
            handler,
            settings,
            turns: Vec::new(),
            query: String::new(),
        }
    }

    /// Seed the conversation with a system prompt and the user query.
    pub fn with_conversation(mut self, system_prompt: String, query: String) -> Self {
        self.turns = vec![Turn::system(system_prompt), Turn::user(query.clone())];
        self.query = query;
        self
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Run the loop to completion.  Returns the final plain text of the
    /// assistant's answer (possibly partial if the consumer went away).
    pub async fn run(&mut self, cache_key: CacheKey, mode: OutputMode) -> anyhow::Result<String> {
        let guard = match self.caches.get_cache(&cache_key) {
            Ok(g) => g,
            Err(e) => {
                let _ = self.emit(&mode, Envelope::error(&e.to_string())).await;
                return Err(e).context("cache acquisition failed");
            }
        };
        let catalog = tool_catalog();
        let inject =
            self.engine.opens_reasoning_implicitly() || self.template.requires_think_injection();
        let mut rounds = 0u32;
        let mut last_text = String::new();

        let final_text = loop {
            rounds += 1;
            if rounds > self.settings.max_rounds {
                warn!(rounds, "tool-call round budget exhausted, ending turn");
                break last_text;
            }

            let prompt = self.template.render(&self.turns, &catalog);
            let request = GenerationRequest {
                prompt,
                params: self.settings.params,
                max_tokens: self.settings.max_tokens,
                max_kv_size: self.settings.max_kv_size,
                cache: Some(guard.cache()),
            };
            let mut stream = match self.engine.generate(request).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = self
                        .emit(&mode, Envelope::error("model generation failed"))
                        .await;
                    return Err(e).context("model generation failed");
                }
            };

            let mut splitter = TagSplitter::new(inject);
            let mut plain = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = self.emit(&mode, Envelope::error("model stream failed")).await;
                        return Err(e).context("model stream failed");
                    }
                };
                for item in splitter.push(StreamItem::Chunk(chunk)) {
                    if !self.forward(&mode, item, &mut plain).await {
                        info!("consumer gone, aborting turn");
                        return Ok(plain);
                    }
                }
            }
            for item in splitter.finish() {
                if !self.forward(&mode, item, &mut plain).await {
                    info!("consumer gone, aborting turn");
                    return Ok(plain);
                }
            }

            let clean = plain.trim().to_string();
            debug!(round = rounds, chars = clean.len(), "turn text accumulated");

            // The response is final when no tool-call marker remains.
            if !contains_tool_call(&clean) {
                self.turns.push(Turn::assistant(clean.clone()));
                break clean;
            }

            self.turns.push(Turn::assistant(clean.clone()));
            last_text = clean.clone();

            if !has_opening_tag(&clean) {
                warn!("tool call missing opening tag, feeding error back to the model");
                self.turns.push(Turn::tool(
                    "error",
                    wrap_tool_results(
                        "Tool call syntax error: the opening <tool_call> tag is missing. \
                         Please check syntax and retry.",
                    ),
                ));
                continue;
            }

            let invocation = parse_tool_call(&clean);
            if invocation.name.is_empty() {
                warn!("tool call parsing failed, feeding error back to the model");
                self.turns.push(Turn::tool(
                    "error",
                    wrap_tool_results("Tool call parsing error. Please check syntax."),
                ));
                continue;
            }
            info!(tool = %invocation.name, "dispatching tool call");

            if !self.announce(&mode, true, &invocation.name).await {
                return Ok(clean);
            }

            let outcome = self.handler.handle(&invocation, &self.query).await;
            let ToolOutcome { stream, result } = outcome;
            if let Some(mut inline) = stream {
                while let Some(envelope) = inline.next().await {
                    if !self.emit(&mode, envelope).await {
                        info!("consumer gone during sub-agent, joining worker");
                        drop(inline);
                        let _ = result.resolve_within(WORKER_JOIN_DEADLINE).await;
                        return Ok(clean);
                    }
                }
            }
            let result_text = result.resolve().await;
            debug!(tool = %invocation.name, chars = result_text.len(), "tool result ready");

            self.turns
                .push(Turn::tool(&invocation.name, wrap_tool_results(&result_text)));

            if !self.announce(&mode, false, &invocation.name).await {
                return Ok(clean);
            }
        };

        self.caches.mark_initialized(&cache_key);
        if self.settings.persist_cache {
            if let Err(e) = self.caches.save_cache(&cache_key) {
                warn!(key = %cache_key, error = %e, "failed to persist prompt cache");
            }
        }

        // `end` is the last envelope of the response.
        let _ = self.emit(&mode, Envelope::end()).await;
        Ok(final_text)
    }

    /// Forward one split item, accumulating plain text.  Returns false
    /// when the consumer is gone.
    async fn forward(&self, mode: &OutputMode, item: SplitItem, plain: &mut String) -> bool {
        if let SplitItem::PlainDelta(s) = &item {
            plain.push_str(s);
        }
        match mode {
            OutputMode::Streaming(tx) => match assistant_envelope(&item) {
                Some(envelope) => tx.send(envelope).await.is_ok(),
                None => true,
            },
            OutputMode::Collect { tokens, .. } => tokens.send(item).await.is_ok(),
        }
    }

    /// Emit a control envelope (tool start/end, error, end).
    async fn emit(&self, mode: &OutputMode, envelope: Envelope) -> bool {
        match mode {
            OutputMode::Streaming(tx) => tx.send(envelope).await.is_ok(),
            // In collect mode errors and end markers surface through the
            // returned result text instead.
            OutputMode::Collect { .. } => true,
        }
    }

    /// Announce a tool-call boundary.  In streaming mode this is an
    /// assistant-level envelope; in collect mode it is a control event on
    /// the sub-agent's event queue.
    async fn announce(&self, mode: &OutputMode, start: bool, tool_name: &str) -> bool {
        match mode {
            OutputMode::Streaming(tx) => {
                let event_type = if start {
                    event_type::ASSISTANT_TOOL_CALL_START
                } else {
                    event_type::ASSISTANT_TOOL_CALL_END
                };
                tx.send(Envelope::new(event_type).with_field("tool_name", tool_name))
                    .await
                    .is_ok()
            }
            OutputMode::Collect { events, .. } => {
                let kind = if start {
                    "tool_call_start"
                } else {
                    "tool_call_end"
                };
                events
                    .send(ControlEvent::new(kind, json!({"tool_name": tool_name})))
                    .await
                    .is_ok()
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults_match_generation_contract() {
        let s = GenerationSettings::default();
        assert_eq!(s.max_tokens, 81_920);
        assert_eq!(s.max_kv_size, 256_000);
        assert!(s.persist_cache);
    }

    #[tokio::test]
    async fn ready_result_resolves_immediately() {
        assert_eq!(ResultHandle::Ready("ok".into()).resolve().await, "ok");
    }

    #[tokio::test]
    async fn join_result_resolves_worker_output() {
        let handle = tokio::spawn(async { "worker output".to_string() });
        assert_eq!(ResultHandle::Join(handle).resolve().await, "worker output");
    }

    #[tokio::test]
    async fn panicked_worker_becomes_error_text() {
        let handle = tokio::spawn(async { panic!("boom") });
        let text = ResultHandle::Join(handle).resolve().await;
        assert!(text.starts_with("Error: tool worker failed"));
    }

    #[tokio::test]
    async fn resolve_within_gives_up_after_deadline() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            "late".to_string()
        });
        let out = ResultHandle::Join(handle)
            .resolve_within(Duration::from_millis(20))
            .await;
        assert!(out.is_none());
    }
}
