//! Shared fixtures for the end-to-end HTTP tests.
//!
//! Every [`TestBoard`] is a fresh in-memory database plus a temporary media
//! directory, wired together exactly as the binary does it.

use actix_web::http::header;
use actix_web::test::TestRequest;
use actix_web::web;
use base64::Engine;
use pk_api::handlers::AppState;
use pk_auth_simple::SimpleAuthProvider;
use pk_core::BoardService;
use pk_db_sqlite::SqliteBoardRepo;
use pk_storage_local::LocalMediaStore;
use serde_json::json;
use tempfile::TempDir;

pub const BOUNDARY: &str = "pikyak-test-boundary";
const DEFAULT_UPLOAD_LIMIT: usize = 1024 * 1024;
const DEFAULT_MEDIA_PREFIX: &str = "/images";

/// A smallest-possible PNG header; enough for format sniffing.
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x06\0\0\0";

pub struct TestBoard {
    pub state: web::Data<AppState>,
    pub media_url_prefix: String,
    pub media: TempDir,
}

impl TestBoard {
    pub async fn new() -> Self {
        Self::with_upload_limit(DEFAULT_UPLOAD_LIMIT).await
    }

    pub async fn with_upload_limit(max_upload_bytes: usize) -> Self {
        Self::build(max_upload_bytes, DEFAULT_MEDIA_PREFIX).await
    }

    pub async fn with_media_prefix(media_url_prefix: &str) -> Self {
        Self::build(DEFAULT_UPLOAD_LIMIT, media_url_prefix).await
    }

    async fn build(max_upload_bytes: usize, media_url_prefix: &str) -> Self {
        let media = tempfile::tempdir().expect("temp media dir");
        let repo = SqliteBoardRepo::new("sqlite::memory:")
            .await
            .expect("in-memory database");
        let store = LocalMediaStore::new(media.path().to_path_buf(), media_url_prefix.to_string());
        let service = BoardService::new(
            Box::new(repo),
            Box::new(store),
            Box::new(SimpleAuthProvider::new()),
        );

        Self {
            state: web::Data::new(AppState {
                service,
                max_upload_bytes,
            }),
            media_url_prefix: media_url_prefix.to_string(),
            media,
        }
    }

    pub async fn promote(&self, username: &str) {
        self.state
            .service
            .set_moderator(username, true)
            .await
            .expect("promote moderator");
    }
}

/// Builds the full application service for a board.
#[macro_export]
macro_rules! test_app {
    ($board:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data($board.state.clone())
                .configure(|cfg| pk_api::configure_routes(cfg, &$board.media_url_prefix)),
        )
        .await
    };
}

pub fn password_for(username: &str) -> String {
    format!("{username}-secret")
}

pub fn basic(username: &str, password: &str) -> (header::HeaderName, String) {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    (header::AUTHORIZATION, format!("Basic {token}"))
}

/// Adds `username`'s standard credentials to a request.
pub fn as_user(req: TestRequest, username: &str) -> TestRequest {
    req.insert_header(basic(username, &password_for(username)))
}

pub fn register(username: &str) -> TestRequest {
    as_user(TestRequest::put().uri(&format!("/users/{username}")), username)
        .set_json(json!({ "device_token": format!("token-{username}") }))
}

pub fn multipart_body(field: &str, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// `POST uri` with a multipart body carrying `data` under `field`.
pub fn upload_field(uri: &str, field: &str, data: &[u8]) -> TestRequest {
    TestRequest::post()
        .uri(uri)
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(multipart_body(field, "upload.png", data))
}

/// Posts a PNG as `username`, starting a conversation or replying to one.
pub fn post_image(username: &str, conversation_id: Option<i64>) -> TestRequest {
    let uri = match conversation_id {
        Some(id) => format!("/conversations/{id}"),
        None => "/conversations".to_string(),
    };
    as_user(upload_field(&uri, "image", PNG), username)
}

pub fn vote(username: &str, uri: &str, value: i64) -> TestRequest {
    as_user(TestRequest::put().uri(uri), username).set_json(json!({ "value": value }))
}
