//! `sleuthd` — the sleuth enrichment HTTP server.
//!
//! Endpoints:
//! - `POST /api/enrich` — run a research request, returns an EnrichmentResult
//! - `GET  /api/health` — liveness and version

use std::sync::Arc;

use sleuth_config::AppConfig;
use sleuth_runtime::Services;

mod api;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {e:#}");
            std::process::exit(1);
        }
    };

    // Infrastructure failures at start-up are fatal; everything recoverable
    // is handled per-request.
    let services = match Services::from_config(config.clone()) {
        Ok(services) => services,
        Err(e) => {
            tracing::error!("failed to initialise services: {e:#}");
            std::process::exit(1);
        }
    };
    tracing::info!(
        model = %config.llm.model,
        search = %config.search.provider,
        "sleuth services initialised"
    );

    let app = api::router(Arc::new(services));
    let bind = &config.server.bind;
    tracing::info!("sleuthd listening on {bind}");

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
