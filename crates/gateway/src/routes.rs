//! Route handlers and the HTTP error mapping.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Multipart, Path, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use parley_core::{
    Conversation, ConversationId, ConversationMode, Document, DocumentId, EngineError,
    RetrievalError, StorageError, Turn,
};
use parley_engine::Engine;
use parley_retrieval::DocumentIngestor;
use parley_storage::Store;

/// Shared state for all routes.
pub struct AppState {
    pub engine: Engine,
    pub ingestor: DocumentIngestor,
    pub store: Store,
}

pub type SharedState = Arc<AppState>;

/// Build the router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/conversations",
            post(create_conversation_handler).get(list_conversations_handler),
        )
        .route(
            "/conversations/{id}",
            get(get_conversation_handler).delete(delete_conversation_handler),
        )
        .route("/conversations/{id}/messages", post(send_message_handler))
        .route("/documents", post(upload_document_handler))
        .route("/documents/link", post(link_document_handler))
        .with_state(state)
}

// ── Auth ──────────────────────────────────────────────────────────────────

/// The calling user, taken from the `X-User-Id` header. Identification,
/// not authentication: there is no credential behind it.
pub struct UserId(pub String);

impl<S> axum::extract::FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or(ApiError::Unauthorized)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    NotFound(String),
    BadRequest(String),
    ModelUnavailable(String),
    Internal(String),
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Missing X-User-Id header".to_string(),
            ),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::ModelUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ConversationNotFound(id) => {
                Self::NotFound(format!("Conversation not found: {id}"))
            }
            EngineError::ModelUnavailable { .. } => Self::ModelUnavailable(e.to_string()),
            EngineError::ModelRejected(_) => Self::Internal(e.to_string()),
            EngineError::Storage(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<RetrievalError> for ApiError {
    fn from(e: RetrievalError) -> Self {
        match e {
            RetrievalError::UnsupportedFormat(_) => Self::BadRequest(e.to_string()),
            _ => Self::Internal(e.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        Self::Internal(e.to_string())
    }
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateConversationRequest {
    #[serde(default = "default_mode")]
    mode: ConversationMode,
    /// Optional first message; if present the response carries the reply.
    #[serde(default)]
    message: Option<String>,
    /// Documents to ground on (grounded mode only).
    #[serde(default)]
    document_ids: Vec<String>,
}

fn default_mode() -> ConversationMode {
    ConversationMode::Open
}

#[derive(Serialize, Deserialize)]
struct CreateConversationResponse {
    conversation: Conversation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply: Option<Turn>,
}

#[derive(Serialize, Deserialize)]
struct ConversationListResponse {
    conversations: Vec<Conversation>,
}

#[derive(Serialize, Deserialize)]
struct ConversationDetailResponse {
    conversation: Conversation,
    turns: Vec<Turn>,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    content: String,
}

#[derive(Serialize, Deserialize)]
struct SendMessageResponse {
    user_turn: Turn,
    assistant_turn: Turn,
    grounded: bool,
}

#[derive(Serialize, Deserialize)]
struct UploadResponse {
    document: Document,
}

#[derive(Deserialize)]
struct LinkDocumentRequest {
    conversation_id: String,
    document_id: String,
}

// ── Handlers ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Load a conversation, treating another user's as nonexistent.
async fn owned_conversation(
    state: &AppState,
    user_id: &str,
    id: &ConversationId,
) -> Result<Conversation, ApiError> {
    match state.store.get_conversation(id).await? {
        Some(conv) if conv.user_id == user_id => Ok(conv),
        _ => Err(ApiError::NotFound(format!("Conversation not found: {id}"))),
    }
}

async fn create_conversation_handler(
    State(state): State<SharedState>,
    UserId(user_id): UserId,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<CreateConversationResponse>), ApiError> {
    let document_ids: Vec<DocumentId> = payload
        .document_ids
        .iter()
        .map(|s| DocumentId::from(s))
        .collect();

    let conversation = state
        .engine
        .create_conversation(&user_id, payload.mode, &document_ids)
        .await?;

    let reply = match payload.message.as_deref().map(str::trim) {
        Some(message) if !message.is_empty() => {
            let exchange = state.engine.send_message(&conversation.id, message).await?;
            Some(exchange.assistant_turn)
        }
        _ => None,
    };

    // Re-read so the response carries the derived title and usage.
    let conversation = state
        .store
        .get_conversation(&conversation.id)
        .await?
        .unwrap_or(conversation);

    Ok((
        StatusCode::CREATED,
        Json(CreateConversationResponse {
            conversation,
            reply,
        }),
    ))
}

async fn list_conversations_handler(
    State(state): State<SharedState>,
    UserId(user_id): UserId,
) -> Result<Json<ConversationListResponse>, ApiError> {
    let conversations = state.engine.list_conversations(&user_id).await?;
    Ok(Json(ConversationListResponse { conversations }))
}

async fn get_conversation_handler(
    State(state): State<SharedState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetailResponse>, ApiError> {
    let id = ConversationId(id);
    owned_conversation(&state, &user_id, &id).await?;

    let (conversation, turns) = state.engine.history(&id).await?;
    Ok(Json(ConversationDetailResponse {
        conversation,
        turns,
    }))
}

async fn delete_conversation_handler(
    State(state): State<SharedState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = ConversationId(id);
    owned_conversation(&state, &user_id, &id).await?;

    state.engine.delete_conversation(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn send_message_handler(
    State(state): State<SharedState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Message content is empty".into()));
    }

    let id = ConversationId(id);
    owned_conversation(&state, &user_id, &id).await?;

    let exchange = state.engine.send_message(&id, content).await?;
    Ok(Json(SendMessageResponse {
        user_turn: exchange.user_turn,
        assistant_turn: exchange.assistant_turn,
        grounded: exchange.grounded,
    }))
}

async fn upload_document_handler(
    State(state): State<SharedState>,
    UserId(user_id): UserId,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut filename: Option<String> = None;
    let mut bytes: Option<axum::body::Bytes> = None;
    let mut conversation_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Could not read upload: {e}")))?,
                );
            }
            Some("conversation_id") => {
                conversation_id = Some(field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("Could not read conversation_id: {e}"))
                })?);
            }
            _ => {}
        }
    }

    let filename = filename.ok_or_else(|| ApiError::BadRequest("Missing 'file' field".into()))?;
    let bytes = bytes.ok_or_else(|| ApiError::BadRequest("Missing 'file' field".into()))?;

    let document = state.ingestor.ingest(&user_id, &filename, &bytes).await?;

    match conversation_id {
        Some(conv_id) => {
            let conv_id = ConversationId(conv_id);
            owned_conversation(&state, &user_id, &conv_id).await?;
            state.store.link_document(&conv_id, &document.id).await?;
        }
        // No conversation yet: the document waits for the next grounded
        // conversation this user creates.
        None => state.store.add_pending_upload(&user_id, &document.id).await?,
    }

    info!(user = %user_id, document = %document.id, "Document uploaded");
    Ok((StatusCode::CREATED, Json(UploadResponse { document })))
}

async fn link_document_handler(
    State(state): State<SharedState>,
    UserId(user_id): UserId,
    Json(payload): Json<LinkDocumentRequest>,
) -> Result<StatusCode, ApiError> {
    let conv_id = ConversationId(payload.conversation_id);
    owned_conversation(&state, &user_id, &conv_id).await?;

    let doc_id = DocumentId(payload.document_id);
    match state.store.get_document(&doc_id).await? {
        Some(doc) if doc.user_id == user_id => {}
        _ => return Err(ApiError::NotFound(format!("Document not found: {doc_id}"))),
    }

    state.store.link_document(&conv_id, &doc_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use parley_config::AppConfig;
    use parley_context::ContextWindow;
    use parley_engine::EngineSettings;
    use parley_providers::{HashEmbedder, MockModelProvider};
    use parley_retrieval::Chunker;
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let store = Store::in_memory().await.unwrap();
        let embedder = Arc::new(HashEmbedder::new(4));

        let engine = Engine::new(
            store.clone(),
            Arc::new(MockModelProvider::always("Hello!")),
            embedder.clone(),
            ContextWindow::new(26214),
            EngineSettings::from_config(&AppConfig::default()),
        );
        let ingestor = DocumentIngestor::new(
            store.clone(),
            embedder,
            Chunker::with_defaults(),
            std::env::temp_dir().join("parley-gateway-tests"),
        );

        build_router(Arc::new(AppState {
            engine,
            ingestor,
            store,
        }))
    }

    fn request(method: &str, uri: &str, user: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("X-User-Id", user);
        }
        match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = test_app().await;
        let response = app
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_user_header_is_unauthorized() {
        let app = test_app().await;
        let response = app
            .oneshot(request("GET", "/conversations", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_with_first_message_and_fetch_history() {
        let app = test_app().await;

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/conversations",
                Some("alice"),
                Some(serde_json::json!({"mode": "open", "message": "Hi there"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = json_body(response).await;
        assert_eq!(body["reply"]["content"], "Hello!");
        let conv_id = body["conversation"]["id"].as_str().unwrap().to_string();
        // Title was derived from the first message.
        assert_eq!(body["conversation"]["title"], "Hi there");

        let response = app
            .oneshot(request(
                "GET",
                &format!("/conversations/{conv_id}"),
                Some("alice"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["turns"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn send_message_roundtrip() {
        let app = test_app().await;

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/conversations",
                Some("alice"),
                Some(serde_json::json!({"mode": "open"})),
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        let conv_id = body["conversation"]["id"].as_str().unwrap().to_string();
        assert!(body["reply"].is_null());

        let response = app
            .oneshot(request(
                "POST",
                &format!("/conversations/{conv_id}/messages"),
                Some("alice"),
                Some(serde_json::json!({"content": "How are you?"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["assistant_turn"]["content"], "Hello!");
        assert_eq!(body["grounded"], false);
    }

    #[tokio::test]
    async fn empty_message_is_bad_request() {
        let app = test_app().await;

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/conversations",
                Some("alice"),
                Some(serde_json::json!({"mode": "open"})),
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        let conv_id = body["conversation"]["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(request(
                "POST",
                &format!("/conversations/{conv_id}/messages"),
                Some("alice"),
                Some(serde_json::json!({"content": "   "})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let app = test_app().await;
        let response = app
            .oneshot(request(
                "GET",
                "/conversations/does-not-exist",
                Some("alice"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_users_conversation_is_hidden() {
        let app = test_app().await;

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/conversations",
                Some("alice"),
                Some(serde_json::json!({"mode": "open"})),
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        let conv_id = body["conversation"]["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(request(
                "GET",
                &format!("/conversations/{conv_id}"),
                Some("bob"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_then_fetch_is_not_found() {
        let app = test_app().await;

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/conversations",
                Some("alice"),
                Some(serde_json::json!({"mode": "open"})),
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        let conv_id = body["conversation"]["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/conversations/{conv_id}"),
                Some("alice"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(request(
                "GET",
                &format!("/conversations/{conv_id}"),
                Some("alice"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    fn multipart_request(user: &str, filename: &str, content: &str) -> Request<Body> {
        let boundary = "XPARLEYBOUNDARY";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             {content}\r\n\
             --{boundary}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/documents")
            .header("X-User-Id", user)
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn non_pdf_upload_is_bad_request() {
        let app = test_app().await;
        let response = app
            .oneshot(multipart_request("alice", "notes.txt", "plain text"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unreadable_pdf_is_internal_error() {
        let app = test_app().await;
        let response = app
            .oneshot(multipart_request("alice", "broken.pdf", "not a pdf"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn link_unknown_document_is_not_found() {
        let app = test_app().await;

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/conversations",
                Some("alice"),
                Some(serde_json::json!({"mode": "grounded"})),
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        let conv_id = body["conversation"]["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(request(
                "POST",
                "/documents/link",
                Some("alice"),
                Some(serde_json::json!({
                    "conversation_id": conv_id,
                    "document_id": "missing-doc",
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
