// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! HTTP handlers: two long-lived SSE chat endpoints driving the
//! orchestrator, plus the memory CRUD surface.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use mira_core::{prompts, DirectHandler, Envelope, Orchestrator, OutputMode, SubAgentHandler};
use mira_memory::MemoryError;
use mira_model::CacheKey;

use crate::AppContext;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/recent_memories/", get(recent_memories))
        .route("/api/search_memories/", get(search_memories))
        .route("/api/memories_agent_chat/", get(memories_agent_chat))
        .route("/api/agent_chat/", get(agent_chat))
        .route("/api/save_memory/", post(save_memory))
        .route("/api/delete_memory/", delete(delete_memory))
        .route("/api/edit_memory/", patch(edit_memory))
        .with_state(ctx)
}

// ─── Memory endpoints ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RecentParams {
    limit: Option<u32>,
}

async fn recent_memories(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<RecentParams>,
) -> Response {
    match ctx.memory.recent_memories(params.limit.unwrap_or(5)) {
        Ok(memories) => Json(json!({"memories": memories})).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn search_memories(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let terms: Vec<String> = params
        .into_iter()
        .filter(|(key, _)| key == "search")
        .map(|(_, value)| value)
        .collect();
    if terms.is_empty() {
        return bad_request("at least one `search` term is required");
    }
    match ctx.memory.search_memories(&terms) {
        Ok(memories) => Json(json!({"memories": memories})).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Deserialize)]
struct SaveMemoryBody {
    memory_text: Option<String>,
    memory_image_base64: Option<String>,
}

async fn save_memory(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<SaveMemoryBody>,
) -> Response {
    let text = body.memory_text.filter(|t| !t.is_empty());
    let image = body.memory_image_base64.filter(|i| !i.is_empty());

    if let Some(image) = image {
        // The payload may carry a `data:<mime>;base64,` prefix.
        let encoded = match image.split_once(',') {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest.to_string(),
            _ => image,
        };
        let bytes = match BASE64.decode(encoded.as_bytes()) {
            Ok(b) => b,
            Err(e) => return bad_request(&format!("invalid base64 image data: {e}")),
        };
        // Captioning is slow; run it in the background and return now.
        tokio::spawn(process_image_memory(ctx, bytes, text));
        return success();
    }

    if let Some(text) = text {
        return match ctx.memory.save_memory(&text, None) {
            Ok(_) => {
                ctx.caches.invalidate_memory_caches();
                success()
            }
            Err(e) => internal_error(e),
        };
    }

    bad_request("one of `memory_text` or `memory_image_base64` is required")
}

/// Background ingestion of an image memory: caption, persist, invalidate.
async fn process_image_memory(ctx: Arc<AppContext>, bytes: Vec<u8>, context_text: Option<String>) {
    let description = match ctx.captioner.describe(&bytes, context_text.as_deref()).await {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "image captioning failed, dropping image memory");
            return;
        }
    };
    let final_memory = match &context_text {
        Some(text) => format!("{text}\n\nImage: {description}"),
        None => format!("Image: {description}"),
    };
    match ctx.memory.save_memory(&final_memory, Some(&bytes)) {
        Ok(id) => {
            info!(id, "image memory saved");
            ctx.caches.invalidate_memory_caches();
        }
        Err(e) => warn!(error = %e, "failed to save image memory"),
    }
}

#[derive(Deserialize)]
struct DeleteBody {
    memory_id: i64,
}

async fn delete_memory(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<DeleteBody>,
) -> Response {
    match ctx.memory.delete_memory(body.memory_id) {
        Ok(()) => {
            ctx.caches.invalidate_memory_caches();
            success()
        }
        Err(e) => internal_error(e),
    }
}

#[derive(Deserialize)]
struct EditBody {
    id: Option<i64>,
    memory: Option<String>,
}

async fn edit_memory(State(ctx): State<Arc<AppContext>>, Json(body): Json<EditBody>) -> Response {
    let (id, memory) = match (body.id, body.memory.filter(|m| !m.is_empty())) {
        (Some(id), Some(memory)) => (id, memory),
        _ => return bad_request("Both id and memory are required"),
    };
    match ctx.memory.edit_memory(id, &memory) {
        Ok(()) => {
            ctx.caches.invalidate_memory_caches();
            success()
        }
        Err(e @ MemoryError::NotFound(_)) => bad_request(&e.to_string()),
        Err(e) => internal_error(e),
    }
}

// ─── Chat endpoints ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatParams {
    query: String,
}

/// Agentic chat: the assistant delegates tool calls to sub-agents.
async fn agent_chat(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<ChatParams>,
) -> Response {
    let settings = ctx.generation_settings();
    let handler = Arc::new(SubAgentHandler::new(
        Arc::clone(&ctx.agentic_engine),
        Arc::clone(&ctx.template),
        Arc::clone(&ctx.caches),
        Arc::clone(&ctx.dispatcher),
        settings.clone(),
    ));
    let orchestrator = Orchestrator::new(
        Arc::clone(&ctx.agentic_engine),
        Arc::clone(&ctx.template),
        Arc::clone(&ctx.caches),
        handler,
        settings,
    )
    .with_conversation(prompts::assistant_system_prompt(), params.query);
    let key = CacheKey::derive(ctx.agentic_engine.model_name(), "assistant", None);
    stream_chat(orchestrator, key)
}

/// Memory-grounded chat: the full memory archive is embedded in the
/// system prompt and tools run directly.
async fn memories_agent_chat(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<ChatParams>,
) -> Response {
    let memories_xml = match ctx.memory.memories_xml() {
        Ok(xml) => xml,
        Err(e) => return internal_error(e),
    };
    let settings = ctx.generation_settings();
    let orchestrator = Orchestrator::new(
        Arc::clone(&ctx.chat_engine),
        Arc::clone(&ctx.template),
        Arc::clone(&ctx.caches),
        Arc::new(DirectHandler::new(Arc::clone(&ctx.dispatcher))),
        settings,
    )
    .with_conversation(prompts::memory_chat_system_prompt(&memories_xml), params.query);
    let key = CacheKey::derive(ctx.chat_engine.model_name(), "memory_cache", None);
    stream_chat(orchestrator, key)
}

/// Spawn the orchestrator and stream its envelopes as a long-lived
/// `text/event-stream` response.  Dropping the connection drops the
/// receiver, which the orchestrator observes as a failed send.
fn stream_chat(mut orchestrator: Orchestrator, key: CacheKey) -> Response {
    let (tx, mut rx) = mpsc::channel::<Envelope>(256);
    tokio::spawn(async move {
        match orchestrator.run(key, OutputMode::Streaming(tx)).await {
            Ok(_) => info!("chat turn complete"),
            Err(e) => warn!(error = %e, "chat turn failed"),
        }
    });

    let body = async_stream::stream! {
        while let Some(envelope) = rx.recv().await {
            yield Ok::<Bytes, Infallible>(Bytes::from(envelope.encode()));
        }
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .expect("static response parts are valid")
}

// ─── Response helpers ────────────────────────────────────────────────────────

fn success() -> Response {
    Json(json!({"success": true})).into_response()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"success": false, "error": message})),
    )
        .into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"success": false, "error": e.to_string()})),
    )
        .into_response()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use mira_memory::{MemoryStore, ResearchCorpus};
    use mira_model::mock::{ScriptedCaptioner, ScriptedEngine};
    use mira_model::{CacheRegistry, ChatMlTemplate};
    use mira_tools::ToolDispatcher;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_ctx(chat_script: Vec<Vec<&str>>) -> (Arc<AppContext>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let corpus = Arc::new(ResearchCorpus::open_in_memory().unwrap());
        let caches = Arc::new(CacheRegistry::new(dir.path()).unwrap());
        let dispatcher = Arc::new(
            ToolDispatcher::new(Arc::clone(&memory), Arc::clone(&corpus), Arc::clone(&caches))
                .with_voice_command("true")
                .with_terminal_timeout(5),
        );
        let engine = Arc::new(ScriptedEngine::new(chat_script));
        let ctx = AppContext {
            config: mira_config::Config::default(),
            chat_engine: Arc::clone(&engine) as _,
            agentic_engine: engine as _,
            captioner: Arc::new(ScriptedCaptioner::new("a red bicycle against a wall")),
            template: Arc::new(ChatMlTemplate::new(false)),
            memory,
            corpus,
            caches,
            dispatcher,
        };
        (Arc::new(ctx), dir)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn recent_memories_defaults_to_five() {
        let (ctx, _dir) = test_ctx(vec![]);
        for i in 0..8 {
            ctx.memory.save_memory(&format!("m{i}"), None).unwrap();
        }
        let response = router(Arc::clone(&ctx))
            .oneshot(Request::get("/api/recent_memories/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["memories"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn search_memories_accepts_repeated_terms() {
        let (ctx, _dir) = test_ctx(vec![]);
        ctx.memory.save_memory("the cat sat", None).unwrap();
        ctx.memory.save_memory("a dog barked", None).unwrap();
        let response = router(Arc::clone(&ctx))
            .oneshot(
                Request::get("/api/search_memories/?search=cat&search=dog")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["memories"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn save_text_memory_persists() {
        let (ctx, _dir) = test_ctx(vec![]);
        let response = router(Arc::clone(&ctx))
            .oneshot(json_request(
                "POST",
                "/api/save_memory/",
                json!({"memory_text": "remember me"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);
        assert_eq!(ctx.memory.recent_memories(1).unwrap()[0].memory, "remember me");
    }

    #[tokio::test]
    async fn save_memory_requires_some_payload() {
        let (ctx, _dir) = test_ctx(vec![]);
        let response = router(ctx)
            .oneshot(json_request("POST", "/api/save_memory/", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn save_image_memory_returns_immediately_and_captions_in_background() {
        let (ctx, _dir) = test_ctx(vec![]);
        let image = BASE64.encode(b"fake png bytes");
        let response = router(Arc::clone(&ctx))
            .oneshot(json_request(
                "POST",
                "/api/save_memory/",
                json!({
                    "memory_text": "from my ride",
                    "memory_image_base64": format!("data:image/png;base64,{image}")
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The captioning pipeline runs in the background.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let saved = &ctx.memory.recent_memories(1).unwrap()[0];
        assert!(saved.memory.starts_with("from my ride\n\nImage: a red bicycle"));
        assert!(saved.has_media);
    }

    #[tokio::test]
    async fn save_image_memory_rejects_bad_base64() {
        let (ctx, _dir) = test_ctx(vec![]);
        let response = router(ctx)
            .oneshot(json_request(
                "POST",
                "/api/save_memory/",
                json!({"memory_image_base64": "data:image/png;base64,@@not-base64@@"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_memory_removes_row() {
        let (ctx, _dir) = test_ctx(vec![]);
        let id = ctx.memory.save_memory("doomed", None).unwrap();
        let response = router(Arc::clone(&ctx))
            .oneshot(json_request(
                "DELETE",
                "/api/delete_memory/",
                json!({"memory_id": id}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(ctx.memory.get_memory(id).unwrap().is_none());
    }

    #[tokio::test]
    async fn edit_memory_requires_both_fields() {
        let (ctx, _dir) = test_ctx(vec![]);
        let response = router(ctx)
            .oneshot(json_request("PATCH", "/api/edit_memory/", json!({"id": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn edit_memory_rewrites_text() {
        let (ctx, _dir) = test_ctx(vec![]);
        let id = ctx.memory.save_memory("old", None).unwrap();
        let response = router(Arc::clone(&ctx))
            .oneshot(json_request(
                "PATCH",
                "/api/edit_memory/",
                json!({"id": id, "memory": "new"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.memory.get_memory(id).unwrap().unwrap().memory, "new");
    }

    #[tokio::test]
    async fn edit_memory_unknown_id_is_400() {
        let (ctx, _dir) = test_ctx(vec![]);
        let response = router(ctx)
            .oneshot(json_request(
                "PATCH",
                "/api/edit_memory/",
                json!({"id": 99, "memory": "x"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn agent_chat_streams_envelopes_ending_with_end() {
        let (ctx, _dir) = test_ctx(vec![vec!["Hello ", "world."]]);
        let response = router(ctx)
            .oneshot(
                Request::get("/api/agent_chat/?query=hi")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(r#""type":"assistant_token""#));
        let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert!(frames.last().unwrap().contains(r#""type":"end""#));
    }

    #[tokio::test]
    async fn memories_agent_chat_streams_with_memory_scoped_cache() {
        let (ctx, dir) = test_ctx(vec![vec!["You adopted a cat."]]);
        ctx.memory.save_memory("adopted a cat", None).unwrap();
        let response = router(Arc::clone(&ctx))
            .oneshot(
                Request::get("/api/memories_agent_chat/?query=what+did+I+do")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("You adopted a cat."));

        // The memory chat persisted a memory-scoped cache.
        let files: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|f| f.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(files.iter().any(|f| f.contains("_memory_cache")), "{files:?}");
    }

    #[tokio::test]
    async fn chat_requires_a_query() {
        let (ctx, _dir) = test_ctx(vec![]);
        let response = router(ctx)
            .oneshot(Request::get("/api/agent_chat/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
