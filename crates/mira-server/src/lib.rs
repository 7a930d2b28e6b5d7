// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod context;
mod routes;

pub use context::AppContext;
pub use routes::router;

use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;

/// Bind and serve the HTTP surface until shutdown.
pub async fn serve(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "mira listening");
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}
