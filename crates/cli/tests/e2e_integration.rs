//! End-to-end integration tests for the Parley backend.
//!
//! These exercise the full pipeline through the gateway router with a
//! scripted model provider: conversation lifecycle, document grounding,
//! context injection, and failure surfacing.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use parley_config::AppConfig;
use parley_context::ContextWindow;
use parley_core::{Document, EmbeddingProvider, Fragment, ModelError, ProcessingStatus, Role};
use parley_engine::{Engine, EngineSettings};
use parley_gateway::{AppState, build_router};
use parley_providers::{HashEmbedder, MockModelProvider};
use parley_retrieval::{Chunker, DocumentIngestor};
use parley_storage::Store;

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    app: Router,
    store: Store,
    model: Arc<MockModelProvider>,
}

async fn harness(model: MockModelProvider) -> Harness {
    let store = Store::in_memory().await.unwrap();
    let model = Arc::new(model);
    let embedder = Arc::new(HashEmbedder::new(8));

    let engine = Engine::new(
        store.clone(),
        model.clone(),
        embedder.clone(),
        ContextWindow::new(26214),
        EngineSettings::from_config(&AppConfig::default()),
    );
    let ingestor = DocumentIngestor::new(
        store.clone(),
        embedder,
        Chunker::with_defaults(),
        std::env::temp_dir().join("parley-e2e-tests"),
    );

    let app = build_router(Arc::new(AppState {
        engine,
        ingestor,
        store: store.clone(),
    }));

    Harness { app, store, model }
}

fn json_request(method: &str, uri: &str, user: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("X-User-Id", user)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("X-User-Id", user)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Seed a fully processed document the way ingestion would leave it.
async fn ready_document(store: &Store, user: &str, content: &str) -> Document {
    store.ensure_user(user).await.unwrap();
    let doc = Document::new(user, "handbook.pdf", "/tmp/handbook.pdf");
    store.create_document(&doc).await.unwrap();

    let embedding = HashEmbedder::new(8).embed(content).await.unwrap();
    store
        .insert_fragments(&[Fragment::new(doc.id.clone(), content, embedding, 0)])
        .await
        .unwrap();
    store
        .set_document_status(&doc.id, ProcessingStatus::Ready)
        .await
        .unwrap();
    doc
}

// ── E2E: Open conversation lifecycle ─────────────────────────────────────

#[tokio::test]
async fn e2e_open_chat_full_lifecycle() {
    let h = harness(
        MockModelProvider::new()
            .then_reply("Hello! How can I help?")
            .then_reply("Rust is a systems programming language."),
    )
    .await;

    // Create with a first message.
    let response = h
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/conversations",
            "alice",
            serde_json::json!({"mode": "open", "message": "Hi, tell me about Rust"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    let conv_id = body["conversation"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["reply"]["content"], "Hello! How can I help?");
    assert_eq!(body["conversation"]["title"], "Hi, tell me about Rust");

    // Second exchange.
    let response = h
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/conversations/{conv_id}/messages"),
            "alice",
            serde_json::json!({"content": "Go on"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(
        body["assistant_turn"]["content"],
        "Rust is a systems programming language."
    );
    assert_eq!(body["grounded"], false);

    // Full history: user, assistant, user, assistant, in sequence order.
    let response = h
        .app
        .clone()
        .oneshot(get_request(&format!("/conversations/{conv_id}"), "alice"))
        .await
        .unwrap();
    let body = json_body(response).await;
    let turns = body["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 4);
    for (i, turn) in turns.iter().enumerate() {
        assert_eq!(turn["sequence_number"], (i + 1) as i64);
    }
    assert_eq!(turns[0]["role"], "user");
    assert_eq!(turns[3]["role"], "assistant");

    // Usage accumulated across both replies (10 tokens each from the mock).
    assert_eq!(body["conversation"]["token_count"], 20);

    // Listing shows it; deletion removes it.
    let response = h
        .app
        .clone()
        .oneshot(get_request("/conversations", "alice"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["conversations"].as_array().unwrap().len(), 1);

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/conversations/{conv_id}"))
                .header("X-User-Id", "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = h
        .app
        .oneshot(get_request("/conversations", "alice"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert!(body["conversations"].as_array().unwrap().is_empty());
}

// ── E2E: Grounded conversations ──────────────────────────────────────────

#[tokio::test]
async fn e2e_grounded_chat_injects_document_context() {
    let h = harness(MockModelProvider::always("Per the handbook, yes.")).await;
    let doc = ready_document(
        &h.store,
        "alice",
        "Employees accrue 25 vacation days per year.",
    )
    .await;

    let response = h
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/conversations",
            "alice",
            serde_json::json!({"mode": "grounded", "document_ids": [doc.id.0]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    let conv_id = body["conversation"]["id"].as_str().unwrap().to_string();

    let response = h
        .app
        .oneshot(json_request(
            "POST",
            &format!("/conversations/{conv_id}/messages"),
            "alice",
            serde_json::json!({"content": "How many vacation days do I get?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["grounded"], true);

    // The model saw the fragment as an extra system message.
    let messages = h.model.last_messages();
    assert!(
        messages
            .iter()
            .any(|m| m.role == Role::System && m.content.contains("25 vacation days"))
    );
}

#[tokio::test]
async fn e2e_pending_upload_attaches_to_next_grounded_conversation() {
    let h = harness(MockModelProvider::always("Noted.")).await;
    let doc = ready_document(&h.store, "alice", "Quarterly revenue grew 12 percent.").await;
    h.store.add_pending_upload("alice", &doc.id).await.unwrap();

    // First grounded conversation claims the pending upload.
    let response = h
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/conversations",
            "alice",
            serde_json::json!({"mode": "grounded", "message": "Summarize the report"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["reply"]["content"], "Noted.");

    let messages = h.model.last_messages();
    assert!(
        messages
            .iter()
            .any(|m| m.role == Role::System && m.content.contains("Quarterly revenue"))
    );

    // A second grounded conversation starts with no documents.
    let response = h
        .app
        .oneshot(json_request(
            "POST",
            "/conversations",
            "alice",
            serde_json::json!({"mode": "grounded", "message": "Summarize the report"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let messages = h.model.last_messages();
    assert!(
        !messages
            .iter()
            .any(|m| m.content.contains("Quarterly revenue"))
    );
}

// ── E2E: Failure surfacing ───────────────────────────────────────────────

#[tokio::test]
async fn e2e_model_outage_is_service_unavailable() {
    let h = harness(MockModelProvider::new().then_fail(ModelError::ServerError {
        status_code: 502,
        message: "bad gateway".into(),
    }))
    .await;

    let response = h
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/conversations",
            "alice",
            serde_json::json!({"mode": "open"}),
        ))
        .await
        .unwrap();
    let body = json_body(response).await;
    let conv_id = body["conversation"]["id"].as_str().unwrap().to_string();

    let response = h
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/conversations/{conv_id}/messages"),
            "alice",
            serde_json::json!({"content": "Hello?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(h.model.calls(), 3);

    // The user turn survived the outage.
    let response = h
        .app
        .oneshot(get_request(&format!("/conversations/{conv_id}"), "alice"))
        .await
        .unwrap();
    let body = json_body(response).await;
    let turns = body["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0]["role"], "user");
}

// ── E2E: Configuration ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_config_toml_roundtrip() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    let rendered = toml::to_string_pretty(&config).expect("Config should serialize");
    let reparsed: AppConfig = toml::from_str(&rendered).expect("Config should parse back");

    assert_eq!(reparsed.model.name, config.model.name);
    assert_eq!(reparsed.gateway.port, config.gateway.port);
    assert_eq!(reparsed.retrieval.chunk_size, config.retrieval.chunk_size);
    assert_eq!(
        reparsed.model.context_budget(),
        config.model.context_budget()
    );
}
