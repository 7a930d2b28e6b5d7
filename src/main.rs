// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use mira_memory::{MemoryStore, ResearchCorpus};
use mira_model::mock::{MockEngine, ScriptedCaptioner};
use mira_model::{CacheRegistry, ChatMlTemplate, ImageCaptioner, InferenceEngine};
use mira_server::AppContext;
use mira_tools::ToolDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = mira_config::from_env();

    match cli.command {
        Some(Commands::ShowConfig) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        Some(Commands::Serve { host, port }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
        }
        None => {}
    }

    let memory = Arc::new(
        MemoryStore::open(&config.storage.db_path)
            .with_context(|| format!("opening {}", config.storage.db_path.display()))?,
    );
    let corpus = Arc::new(
        ResearchCorpus::open(&config.storage.corpus_db_path)
            .with_context(|| format!("opening {}", config.storage.corpus_db_path.display()))?,
    );
    let caches = Arc::new(CacheRegistry::new(&config.storage.cache_dir)?);
    let dispatcher = Arc::new(ToolDispatcher::new(
        Arc::clone(&memory),
        Arc::clone(&corpus),
        Arc::clone(&caches),
    ));

    let ctx = AppContext {
        chat_engine: build_engine(&config.models.chat_model),
        agentic_engine: build_engine(&config.models.agentic_model),
        captioner: build_captioner(&config.models.image_model),
        template: Arc::new(ChatMlTemplate::new(false)),
        memory,
        corpus,
        caches,
        dispatcher,
        config,
    };

    mira_server::serve(Arc::new(ctx)).await
}

/// Token generation is an external collaborator behind the
/// `InferenceEngine` seam.  Link the engine for the deployed model here;
/// until one is linked, the echo engine keeps the service drivable.
fn build_engine(model_name: &str) -> Arc<dyn InferenceEngine> {
    warn!(model = model_name, "no inference engine linked, using the echo engine");
    Arc::new(MockEngine::new(
        "Mira is running without an inference engine. \
         Link one behind the InferenceEngine seam to chat.",
    ))
}

fn build_captioner(model_name: &str) -> Arc<dyn ImageCaptioner> {
    warn!(model = model_name, "no vision model linked, using a static captioner");
    Arc::new(ScriptedCaptioner::new("(no vision model linked)"))
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("MIRA_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
