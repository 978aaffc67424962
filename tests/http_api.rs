//! HTTP surface tests: the router is exercised in-process against a
//! scripted model gateway (handler-level via tower::ServiceExt), covering
//! the upload/ask round trip, the error contract, and SSE event framing.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use askdoc::config::Config;
use askdoc::gateway::{ModelGateway, TokenStream};
use askdoc::server::build_router;

/// Rates every relevance prompt 8 and answers compose prompts with the
/// concatenated token script; `generate_stream` replays the tokens one by
/// one. `reachable: false` fails every call with the Ollama wording.
struct CannedGateway {
    answer_tokens: Vec<String>,
    reachable: bool,
}

impl CannedGateway {
    fn new(tokens: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            answer_tokens: tokens.iter().map(|t| t.to_string()).collect(),
            reachable: true,
        })
    }

    fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            answer_tokens: Vec::new(),
            reachable: false,
        })
    }

    fn connection_refused() -> anyhow::Error {
        anyhow!("Ollama connection error (is Ollama running at http://localhost:11434?): connection refused")
    }
}

#[async_trait]
impl ModelGateway for CannedGateway {
    async fn list_models(&self) -> Result<Vec<String>> {
        if !self.reachable {
            return Err(Self::connection_refused());
        }
        Ok(vec!["llama2".to_string()])
    }

    async fn generate(&self, _model: &str, prompt: &str) -> Result<String> {
        if !self.reachable {
            return Err(Self::connection_refused());
        }
        if prompt.contains("scale of 0-10") {
            Ok("8".to_string())
        } else {
            Ok(self.answer_tokens.concat())
        }
    }

    async fn generate_stream(&self, _model: &str, _prompt: &str) -> Result<TokenStream> {
        if !self.reachable {
            return Err(Self::connection_refused());
        }
        let tokens = self.answer_tokens.clone();
        Ok(Box::pin(futures::stream::iter(
            tokens.into_iter().map(Ok::<_, anyhow::Error>),
        )))
    }
}

fn test_router(dir: &std::path::Path, gateway: Arc<dyn ModelGateway>) -> Router {
    let mut config = Config::default();
    config.storage.upload_dir = dir.to_path_buf();
    build_router(config, gateway)
}

/// 30 lines of filler with the fact under test in the second 15-line window.
fn meeting_notes() -> Vec<u8> {
    let mut lines: Vec<String> = (1..=30)
        .map(|i| format!("Filler line {} with routine notes.", i))
        .collect();
    lines[19] = "The meeting is on Tuesday at 10am in room 4.".to_string();
    lines.join("\n").into_bytes()
}

const BOUNDARY: &str = "askdoc-test-boundary";

fn multipart_upload(filename: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\r\n",
            filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn upload(router: &Router, filename: &str, bytes: &[u8]) -> serde_json::Value {
    let response = router
        .clone()
        .oneshot(multipart_upload(filename, bytes))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn upload_list_and_ask_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(
        dir.path(),
        CannedGateway::new(&["The meeting is on Tuesday at 10am; ", "see Lines 16-30."]),
    );

    let receipt = upload(&router, "notes.txt", &meeting_notes()).await;
    let doc_id = receipt["doc_id"].as_str().unwrap().to_string();
    assert_eq!(receipt["filename"], "notes.txt");
    assert!(receipt["chunks_count"].as_u64().unwrap() >= 1);

    let listing = body_json(router.clone().oneshot(get("/api/documents")).await.unwrap()).await;
    assert_eq!(listing["documents"][0]["doc_id"], doc_id.as_str());

    let detail = body_json(
        router
            .clone()
            .oneshot(get(&format!("/api/document/{}", doc_id)))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(detail["filename"], "notes.txt");
    assert_eq!(detail["file_type"], "txt");
    assert!(!detail["text_data"].as_array().unwrap().is_empty());

    let response = router
        .clone()
        .oneshot(json_post(
            "/api/ask",
            serde_json::json!({"doc_id": doc_id, "question": "When is the meeting?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let answer = body_json(response).await;
    assert!(answer["answer"].as_str().unwrap().contains("Tuesday"));
    assert_eq!(answer["references"][0]["metadata"]["lines"], "16-30");
    assert_eq!(answer["confidence"], "medium");
}

#[tokio::test]
async fn unknown_document_returns_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(dir.path(), CannedGateway::new(&["irrelevant"]));

    let response = router
        .oneshot(json_post(
            "/api/ask",
            serde_json::json!({"doc_id": "no-such-doc", "question": "anything?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn empty_question_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(dir.path(), CannedGateway::new(&["irrelevant"]));

    let response = router
        .oneshot(json_post(
            "/api/ask",
            serde_json::json!({"doc_id": "x", "question": "   "}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn unsupported_and_corrupt_uploads_are_classified() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(dir.path(), CannedGateway::new(&["irrelevant"]));

    let response = router
        .clone()
        .oneshot(multipart_upload("photo.png", b"\x89PNG"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "unsupported_format");

    let response = router
        .clone()
        .oneshot(multipart_upload("broken.docx", b"not a zip archive"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "corrupt_file");
}

#[tokio::test]
async fn oversized_uploads_get_file_too_large() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.upload_dir = dir.path().to_path_buf();
    config.storage.max_file_size_mb = 1;
    let router = build_router(config, CannedGateway::new(&["irrelevant"]));

    // Between the configured limit and the router's body-limit headroom:
    // read succeeds, the explicit size check rejects.
    let big = vec![b'a'; 1024 * 1024 + 512 * 1024];
    let response = router
        .clone()
        .oneshot(multipart_upload("big.txt", &big))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "file_too_large");

    // Beyond the headroom: the body limit trips mid-read and must still
    // surface as file_too_large, not bad_request.
    let bigger = vec![b'a'; 3 * 1024 * 1024];
    let response = router
        .clone()
        .oneshot(multipart_upload("bigger.txt", &bigger))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "file_too_large");
}

#[tokio::test]
async fn unreachable_runtime_maps_to_model_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(dir.path(), CannedGateway::unreachable());

    // Upload needs no model calls and must still work.
    let receipt = upload(&router, "notes.txt", &meeting_notes()).await;
    let doc_id = receipt["doc_id"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(json_post(
            "/api/ask",
            serde_json::json!({"doc_id": doc_id, "question": "When is the meeting?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "model_unavailable");

    let models = router.clone().oneshot(get("/api/models")).await.unwrap();
    assert_eq!(models.status(), StatusCode::BAD_GATEWAY);

    let health = body_json(router.clone().oneshot(get("/api/health")).await.unwrap()).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["ollama"], "disconnected");
}

#[tokio::test]
async fn health_reports_connected_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(dir.path(), CannedGateway::new(&["irrelevant"]));

    let health = body_json(router.oneshot(get("/api/health")).await.unwrap()).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["ollama"], "connected");
}

#[tokio::test]
async fn ask_stream_emits_token_and_done_events() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(
        dir.path(),
        CannedGateway::new(&["The meeting is on Tuesday at 10am; ", "see Lines 16-30."]),
    );

    let receipt = upload(&router, "notes.txt", &meeting_notes()).await;
    let doc_id = receipt["doc_id"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(json_post(
            "/api/ask/stream",
            serde_json::json!({"doc_id": doc_id, "question": "When is the meeting?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.contains("event: token"));
    assert!(text.contains("Tuesday"));
    let done = text
        .split("event: done")
        .nth(1)
        .expect("stream must end with a done event");
    assert!(done.contains("\"lines\":\"16-30\""));
    assert!(done.contains("\"confidence\":\"medium\""));
}
