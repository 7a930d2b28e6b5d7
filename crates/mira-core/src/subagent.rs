// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Sub-agent execution of delegated tool calls.
//!
//! The handler spawns a second orchestrator on a worker task, running in
//! collect mode with its own conversation and its own cache key.  Two
//! queues carry the worker's output back: split deltas on the token
//! queue, tool start/end markers on the event queue.  The returned
//! outcome stream multiplexes both into subagent-prefixed envelopes; the
//! result handle joins the worker for the final text.  Recursion stops
//! at depth one — the sub-agent is always built with the direct handler.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use mira_model::{CacheKey, CacheRegistry, ChatTemplate, InferenceEngine};
use mira_tools::ToolDispatcher;

use crate::envelope::{event_type, subagent_envelope, Envelope};
use crate::orchestrator::{
    DirectHandler, GenerationSettings, Orchestrator, OutputMode, ResultHandle, ToolCallHandler,
    ToolOutcome,
};
use crate::prompts::subagent_turns;
use crate::splitter::ControlEvent;
use crate::toolcall::ToolInvocation;

const TOKEN_QUEUE_DEPTH: usize = 256;
const EVENT_QUEUE_DEPTH: usize = 64;

/// Delegates every tool call to a sub-agent that executes the task
/// end-to-end with direct tool access.
pub struct SubAgentHandler {
    engine: Arc<dyn InferenceEngine>,
    template: Arc<dyn ChatTemplate>,
    caches: Arc<CacheRegistry>,
    dispatcher: Arc<ToolDispatcher>,
    settings: GenerationSettings,
}

impl SubAgentHandler {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        template: Arc<dyn ChatTemplate>,
        caches: Arc<CacheRegistry>,
        dispatcher: Arc<ToolDispatcher>,
        settings: GenerationSettings,
    ) -> Self {
        // Sub-agent caches are transient: released on completion, never
        // persisted.
        let settings = GenerationSettings {
            persist_cache: false,
            ..settings
        };
        Self {
            engine,
            template,
            caches,
            dispatcher,
            settings,
        }
    }
}

#[async_trait]
impl ToolCallHandler for SubAgentHandler {
    async fn handle(&self, invocation: &ToolInvocation, parent_query: &str) -> ToolOutcome {
        let (token_tx, mut token_rx) = mpsc::channel(TOKEN_QUEUE_DEPTH);
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        // A distinct key (tool name included) keeps the sub-agent's
        // prompt state from colliding with the parent's.
        let cache_key = CacheKey::derive(
            self.engine.model_name(),
            "subagent",
            Some(&invocation.name),
        );

        let (system, user) = subagent_turns(parent_query, &invocation.name, &invocation.arguments);
        let mut worker_orchestrator = Orchestrator::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.template),
            Arc::clone(&self.caches),
            Arc::new(DirectHandler::new(Arc::clone(&self.dispatcher))),
            self.settings.clone(),
        )
        .with_conversation(system.text, user.text);

        info!(tool = %invocation.name, %cache_key, "spawning sub-agent");

        let caches = Arc::clone(&self.caches);
        let worker_key = cache_key.clone();
        let worker = tokio::spawn(async move {
            let result = worker_orchestrator
                .run(
                    worker_key.clone(),
                    OutputMode::Collect {
                        tokens: token_tx,
                        events: event_tx,
                    },
                )
                .await;
            // Release on completion: delete from memory and disk.
            caches.release_cache(&worker_key, true);
            match result {
                Ok(text) => text,
                Err(e) => format!("Error: sub-agent failed: {e}"),
            }
        });

        let tool_name = invocation.name.clone();
        let stream = async_stream::stream! {
            // The queues drain until the worker is gone: both senders live
            // inside the worker task, so channel closure doubles as the
            // liveness signal.  Tokens are drained preferentially so a
            // queued-up delta backlog is flushed before a later control
            // event overtakes it.
            loop {
                let envelope = tokio::select! {
                    biased;
                    Some(item) = token_rx.recv() => subagent_envelope(&item, &tool_name),
                    Some(event) = event_rx.recv() => Some(control_envelope(&event, &tool_name)),
                    else => break,
                };
                if let Some(envelope) = envelope {
                    yield envelope;
                }
            }
            debug!(tool = %tool_name, "sub-agent queues drained");
        };

        ToolOutcome {
            stream: Some(Box::pin(stream)),
            result: ResultHandle::Join(worker),
        }
    }
}

/// Map a sub-agent control event onto the subagent-prefixed envelope
/// type, tagging it with the delegated tool's name.
fn control_envelope(event: &ControlEvent, tool_name: &str) -> Envelope {
    let type_name = match event.kind.as_str() {
        "tool_call_start" => event_type::SUBAGENT_TOOL_CALL_START,
        "tool_call_end" => event_type::SUBAGENT_TOOL_CALL_END,
        other => other,
    };
    Envelope::from_control(event, type_name).with_field("tool_name", tool_name)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
