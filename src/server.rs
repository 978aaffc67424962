//! JSON HTTP API for document upload and question answering.
//!
//! All state is shared through [`AppState`]: the configuration, the
//! in-memory [`DocumentStore`], and a [`ModelGateway`] trait object so
//! tests can run the full router against a scripted model.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/upload` | Multipart upload (`file` field); extract + chunk + store |
//! | `GET`  | `/api/documents` | List stored documents |
//! | `GET`  | `/api/document/{id}` | Document metadata plus extracted units |
//! | `POST` | `/api/ask` | Answer a question against one document |
//! | `POST` | `/api/ask/all` | Answer a question against every stored document |
//! | `POST` | `/api/ask/stream` | Streamed answer over SSE (`token` / `done` events) |
//! | `GET`  | `/api/models` | Models available on the Ollama runtime |
//! | `GET`  | `/api/health` | Server liveness and runtime reachability |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unsupported_format` (400),
//! `file_too_large` (413), `corrupt_file` (422), `not_found` (404),
//! `model_unavailable` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser frontend
//! can be served from a different origin during development.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::answer::{self, NO_CONTEXT_ANSWER};
use crate::config::Config;
use crate::extract::ExtractError;
use crate::gateway::{ModelGateway, OllamaGateway};
use crate::ingest::{ingest_file, IngestReceipt};
use crate::models::{
    Answer, Chunk, Confidence, ConversationTurn, DocumentSummary, FileType, Reference, TextUnit,
};
use crate::score::rank_chunks;
use crate::store::DocumentStore;

/// Shared application state passed to all route handlers via Axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<DocumentStore>,
    gateway: Arc<dyn ModelGateway>,
}

/// Starts the HTTP server with the production Ollama gateway.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let gateway = Arc::new(OllamaGateway::new(&config.ollama)?);
    run_server_with_gateway(config, gateway).await
}

/// Like [`run_server`], but with a caller-supplied gateway, for embedding
/// a non-Ollama runtime. Tests bypass the listener and drive
/// [`build_router`] directly.
pub async fn run_server_with_gateway(
    config: &Config,
    gateway: Arc<dyn ModelGateway>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = build_router(config.clone(), gateway);

    info!("askdoc listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds the full router with a fresh document store.
pub fn build_router(config: Config, gateway: Arc<dyn ModelGateway>) -> Router {
    // Leave headroom above the configured file limit so oversized uploads
    // reach our own check and get the 413 body instead of a bare rejection.
    let body_limit = (config.storage.max_file_size_bytes() as usize).saturating_add(1024 * 1024);

    let state = AppState {
        config: Arc::new(config),
        store: Arc::new(DocumentStore::new()),
        gateway,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/upload", post(handle_upload))
        .route("/api/documents", get(handle_list_documents))
        .route("/api/document/{id}", get(handle_get_document))
        .route("/api/ask", post(handle_ask))
        .route("/api/ask/all", post(handle_ask_all))
        .route("/api/ask/stream", post(handle_ask_stream))
        .route("/api/models", get(handle_models))
        .route("/api/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn file_too_large(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::PAYLOAD_TOO_LARGE,
        code: "file_too_large".to_string(),
        message: message.into(),
    }
}

fn model_unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "model_unavailable".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Maps pipeline errors onto the HTTP error contract. Extraction failures
/// carry a typed [`ExtractError`] in the chain; gateway failures are
/// recognized by the Ollama connection wording.
fn classify_error(err: anyhow::Error) -> AppError {
    if let Some(extract) = err.downcast_ref::<ExtractError>() {
        return match extract {
            ExtractError::UnsupportedFormat(msg) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "unsupported_format".to_string(),
                message: msg.clone(),
            },
            ExtractError::Corrupt(msg) => AppError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                code: "corrupt_file".to_string(),
                message: msg.clone(),
            },
        };
    }

    let msg = format!("{:#}", err);
    if msg.contains("Ollama") {
        model_unavailable(msg)
    } else if msg.contains("not found") {
        not_found(msg)
    } else {
        error!(error = %msg, "unclassified request error");
        internal(msg)
    }
}

// ============ POST /api/upload ============

/// Handler for `POST /api/upload`.
///
/// Expects a multipart body with a `file` field carrying a filename. The
/// file is extracted, chunked, and stored synchronously; the receipt is
/// returned once the document is queryable.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestReceipt>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("file field is missing a filename"))?;
        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) if is_body_limit_error(&e) => {
                return Err(file_too_large(format!(
                    "file exceeds the {} MB limit",
                    state.config.storage.max_file_size_mb
                )));
            }
            Err(e) => return Err(bad_request(format!("failed to read upload: {}", e))),
        };

        if data.is_empty() {
            return Err(bad_request("uploaded file is empty"));
        }
        let limit = state.config.storage.max_file_size_bytes();
        if data.len() as u64 > limit {
            return Err(file_too_large(format!(
                "file exceeds the {} MB limit",
                state.config.storage.max_file_size_mb
            )));
        }

        let receipt = ingest_file(&state.config, &state.store, &filename, &data)
            .await
            .map_err(classify_error)?;
        return Ok(Json(receipt));
    }

    Err(bad_request("multipart field 'file' is required"))
}

/// A multipart read that trips the outer body limit carries a length-limit
/// error in its source chain; anything else is a malformed body.
fn is_body_limit_error(err: &axum::extract::multipart::MultipartError) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(inner) = source {
        if inner.to_string().contains("length limit") {
            return true;
        }
        source = inner.source();
    }
    false
}

// ============ GET /api/documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentSummary>,
}

async fn handle_list_documents(State(state): State<AppState>) -> Json<DocumentListResponse> {
    Json(DocumentListResponse {
        documents: state.store.list(),
    })
}

// ============ GET /api/document/{id} ============

/// Full document view: summary fields plus the extracted units the frontend
/// highlights against.
#[derive(Serialize)]
struct DocumentDetailResponse {
    doc_id: String,
    filename: String,
    file_type: FileType,
    chunks_count: usize,
    text_data: Vec<TextUnit>,
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentDetailResponse>, AppError> {
    let doc = state
        .store
        .get(&id)
        .ok_or_else(|| not_found(format!("document not found: {}", id)))?;
    Ok(Json(DocumentDetailResponse {
        doc_id: doc.id.clone(),
        filename: doc.filename.clone(),
        file_type: doc.file_type,
        chunks_count: doc.chunks.len(),
        text_data: doc.units.clone(),
    }))
}

// ============ POST /api/ask ============

#[derive(Deserialize)]
struct AskRequest {
    /// Required for `/api/ask` and `/api/ask/stream`; ignored by `/api/ask/all`.
    #[serde(default)]
    doc_id: Option<String>,
    question: String,
    /// Model name; falls back to `[ollama].default_model`.
    #[serde(default)]
    model: Option<String>,
    /// Prior turns, oldest first. Not persisted server-side.
    #[serde(default)]
    context: Vec<ConversationTurn>,
}

impl AskRequest {
    fn validated_question(&self) -> Result<&str, AppError> {
        let question = self.question.trim();
        if question.is_empty() {
            return Err(bad_request("question must not be empty"));
        }
        Ok(question)
    }
}

fn requested_model<'a>(state: &'a AppState, request: &'a AskRequest) -> &'a str {
    request
        .model
        .as_deref()
        .unwrap_or(&state.config.ollama.default_model)
}

/// Chunks for a single-document ask; 404 when the id is unknown.
fn chunks_for_doc(state: &AppState, request: &AskRequest) -> Result<Vec<Chunk>, AppError> {
    let doc_id = request
        .doc_id
        .as_deref()
        .ok_or_else(|| bad_request("doc_id is required"))?;
    let doc = state
        .store
        .get(doc_id)
        .ok_or_else(|| not_found(format!("document not found: {}", doc_id)))?;
    Ok(doc.chunks.clone())
}

/// Runs the rank-then-compose pipeline over the given candidate chunks.
async fn answer_over_chunks(
    state: &AppState,
    request: &AskRequest,
    chunks: &[Chunk],
) -> Result<Json<Answer>, AppError> {
    let question = request.validated_question()?;
    let model = requested_model(state, request);

    let ranked = rank_chunks(
        state.gateway.as_ref(),
        question,
        chunks,
        model,
        &state.config.retrieval,
    )
    .await
    .map_err(classify_error)?;

    let answer = answer::compose(
        state.gateway.as_ref(),
        question,
        &ranked,
        &request.context,
        model,
        &state.config.answer,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(answer))
}

/// Handler for `POST /api/ask`: answer a question against one document.
async fn handle_ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<Answer>, AppError> {
    request.validated_question()?;
    let chunks = chunks_for_doc(&state, &request)?;
    answer_over_chunks(&state, &request, &chunks).await
}

/// Handler for `POST /api/ask/all`: answer a question against every stored
/// document's chunks at once.
async fn handle_ask_all(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<Answer>, AppError> {
    request.validated_question()?;
    if state.store.is_empty() {
        return Err(bad_request("no documents have been uploaded"));
    }
    let chunks: Vec<Chunk> = state
        .store
        .all()
        .iter()
        .flat_map(|doc| doc.chunks.iter().cloned())
        .collect();
    answer_over_chunks(&state, &request, &chunks).await
}

// ============ POST /api/ask/stream ============

type SseStream = Sse<KeepAliveStream<BoxStream<'static, Result<Event, Infallible>>>>;

fn token_event(token: &str) -> Event {
    Event::default()
        .event("token")
        .data(serde_json::json!({ "token": token }).to_string())
}

fn done_event(answer: &str, references: &[Reference], confidence: Confidence) -> Event {
    Event::default().event("done").data(
        serde_json::json!({
            "answer": answer,
            "references": references,
            "confidence": confidence,
        })
        .to_string(),
    )
}

fn error_event(message: &str) -> Event {
    Event::default()
        .event("error")
        .data(serde_json::json!({ "message": message }).to_string())
}

/// Handler for `POST /api/ask/stream`.
///
/// Ranking runs to completion before the response starts; the composed
/// answer then streams as `token` events, closed by a single `done` event
/// carrying the references and confidence for the accumulated text. If the
/// client disconnects, the channel send fails and the forwarding task drops
/// the gateway stream, closing the upstream connection.
async fn handle_ask_stream(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<SseStream, AppError> {
    let question = request.validated_question()?.to_string();
    let chunks = chunks_for_doc(&state, &request)?;
    let model = requested_model(&state, &request).to_string();

    let ranked = rank_chunks(
        state.gateway.as_ref(),
        &question,
        &chunks,
        &model,
        &state.config.retrieval,
    )
    .await
    .map_err(classify_error)?;

    if ranked.is_empty() {
        let events = vec![
            Ok(token_event(NO_CONTEXT_ANSWER)),
            Ok(done_event(NO_CONTEXT_ANSWER, &[], Confidence::Low)),
        ];
        let stream = futures::stream::iter(events).boxed();
        return Ok(Sse::new(stream).keep_alive(KeepAlive::default()));
    }

    let mut tokens = answer::compose_stream(
        state.gateway.as_ref(),
        &question,
        &ranked,
        &request.context,
        &model,
    )
    .await
    .map_err(classify_error)?;

    let options = state.config.answer.clone();
    let (tx, rx) = futures::channel::mpsc::unbounded::<Event>();

    tokio::spawn(async move {
        let mut full = String::new();
        while let Some(item) = tokens.next().await {
            match item {
                Ok(token) => {
                    full.push_str(&token);
                    if tx.unbounded_send(token_event(&token)).is_err() {
                        // Client gone; dropping the stream closes upstream.
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.unbounded_send(error_event(&e.to_string()));
                    return;
                }
            }
        }
        let (references, confidence) = answer::finish(&ranked, &full, &options);
        let _ = tx.unbounded_send(done_event(&full, &references, confidence));
    });

    let stream = rx.map(Ok::<_, Infallible>).boxed();
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============ GET /api/models ============

#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<String>,
}

/// Handler for `GET /api/models`. A gateway failure maps to 502 so the
/// frontend can tell "runtime down" apart from "no models pulled".
async fn handle_models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, AppError> {
    let models = state
        .gateway
        .list_models()
        .await
        .map_err(classify_error)?;
    Ok(Json(ModelsResponse { models }))
}

// ============ GET /api/health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
    /// `"connected"` when the Ollama runtime answered a listing probe.
    ollama: String,
}

/// Handler for `GET /api/health`. Always 200; runtime reachability is
/// reported in the body rather than the status code.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ollama = if state.gateway.health().await {
        "connected"
    } else {
        "disconnected"
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ollama: ollama.to_string(),
    })
}
