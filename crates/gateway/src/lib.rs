//! HTTP API gateway for Parley.
//!
//! Endpoints:
//!
//! - `GET    /health`                        — liveness probe
//! - `POST   /conversations`                 — create (optionally with a
//!   first message and documents to ground on)
//! - `GET    /conversations`                 — list the caller's
//!   conversations
//! - `GET    /conversations/{id}`            — conversation with full
//!   turn history
//! - `DELETE /conversations/{id}`            — delete, cleaning up
//!   orphaned documents
//! - `POST   /conversations/{id}/messages`   — send a message, get the
//!   assistant reply
//! - `POST   /documents`                     — multipart PDF upload
//! - `POST   /documents/link`                — link a document to a
//!   conversation
//!
//! Callers identify themselves with the `X-User-Id` header; there is no
//! credential check behind it. Built on Axum.

pub mod routes;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use parley_config::AppConfig;
use parley_context::ContextWindow;
use parley_engine::{Engine, EngineSettings};
use parley_providers::{OpenAiCompatEmbedder, OpenAiCompatProvider};
use parley_retrieval::{Chunker, DocumentIngestor};
use parley_storage::Store;
use tower_http::cors::CorsLayer;
use tracing::info;

pub use routes::{AppState, build_router};

/// Uploads are capped at 10 MB.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let store = Store::open(&config.storage.db_path).await?;
    let api_key = config.model.api_key.clone().unwrap_or_default();

    let model = Arc::new(OpenAiCompatProvider::new(
        "openai-compat",
        &config.model.base_url,
        &api_key,
        &config.model.name,
    ));
    let embedder = Arc::new(OpenAiCompatEmbedder::new(
        "openai-compat",
        &config.model.base_url,
        &api_key,
        &config.model.embedding_model,
        OpenAiCompatEmbedder::DEFAULT_DIMENSION,
    ));

    let window = ContextWindow::for_model(config.model.max_model_tokens, config.model.safety_fraction);
    let engine = Engine::new(
        store.clone(),
        model,
        embedder.clone(),
        window,
        EngineSettings::from_config(&config),
    );

    let chunker = Chunker::new(config.retrieval.chunk_size, config.retrieval.overlap)?;
    let ingestor = DocumentIngestor::new(
        store.clone(),
        embedder,
        chunker,
        &config.storage.upload_dir,
    );

    let state = Arc::new(AppState {
        engine,
        ingestor,
        store,
    });

    let app = build_router(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
