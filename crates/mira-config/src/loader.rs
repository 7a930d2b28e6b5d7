// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::{Config, ServerConfig, StorageConfig};

/// Read one environment variable, falling back to `default` when the
/// variable is unset.  A set-but-unparseable value is reported and the
/// default is used — a typo in the environment must not take the
/// service down.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, "unparseable environment override, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_path_or(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

/// Build the configuration from environment variables.
///
/// Every knob has a default; the service starts with an empty
/// environment.  Variable names are part of the deployment contract:
///
/// - `CHAT_MODEL_NAME`, `AGENTIC_MODEL_NAME`, `IMAGE_MODEL_NAME`
/// - `AGENTIC_TEMP`, `AGENTIC_TOP_P`, `AGENTIC_TOP_K`, `AGENTIC_MIN_P`,
///   `AGENTIC_REPETITION_PENALTY`, `AGENTIC_REPETITION_CONTEXT_SIZE`,
///   `AGENTIC_MAX_TOKENS`, `AGENTIC_MAX_KV_SIZE`
/// - `IMAGE_MAX_TOKENS`, `IMAGE_TEMP`
/// - `MIRA_DB_PATH`, `MIRA_WIKI_DB_PATH`, `MIRA_CACHE_DIR`,
///   `MIRA_HOST`, `MIRA_PORT`
pub fn from_env() -> Config {
    let mut config = Config::default();

    config.models.chat_model = env_or("CHAT_MODEL_NAME", config.models.chat_model);
    config.models.agentic_model = env_or("AGENTIC_MODEL_NAME", config.models.agentic_model);
    config.models.image_model = env_or("IMAGE_MODEL_NAME", config.models.image_model);

    config.agentic.temperature = env_or("AGENTIC_TEMP", config.agentic.temperature);
    config.agentic.top_p = env_or("AGENTIC_TOP_P", config.agentic.top_p);
    config.agentic.top_k = env_or("AGENTIC_TOP_K", config.agentic.top_k);
    config.agentic.min_p = env_or("AGENTIC_MIN_P", config.agentic.min_p);
    config.agentic.repetition_penalty =
        env_or("AGENTIC_REPETITION_PENALTY", config.agentic.repetition_penalty);
    config.agentic.repetition_context_size = env_or(
        "AGENTIC_REPETITION_CONTEXT_SIZE",
        config.agentic.repetition_context_size,
    );
    config.agentic.max_tokens = env_or("AGENTIC_MAX_TOKENS", config.agentic.max_tokens);
    config.agentic.max_kv_size = env_or("AGENTIC_MAX_KV_SIZE", config.agentic.max_kv_size);

    config.image.max_tokens = env_or("IMAGE_MAX_TOKENS", config.image.max_tokens);
    config.image.temperature = env_or("IMAGE_TEMP", config.image.temperature);

    let StorageConfig {
        db_path,
        corpus_db_path,
        cache_dir,
    } = config.storage;
    config.storage = StorageConfig {
        db_path: env_path_or("MIRA_DB_PATH", db_path),
        corpus_db_path: env_path_or("MIRA_WIKI_DB_PATH", corpus_db_path),
        cache_dir: env_path_or("MIRA_CACHE_DIR", cache_dir),
    };

    let ServerConfig { host, port } = config.server;
    config.server = ServerConfig {
        host: env_or("MIRA_HOST", host),
        port: env_or("MIRA_PORT", port),
    };

    config
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
