//! Common test utilities.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use editor_files::{AppState, Config};

pub const BOUNDARY: &str = "editor-files-test-boundary";

/// Scratch workspace: a data directory for the endpoints to operate on and an
/// assets directory with a small shell template.
pub struct Workspace {
    pub temp_dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("data")).unwrap();
        std::fs::create_dir(temp_dir.path().join("assets")).unwrap();
        std::fs::write(
            temp_dir.path().join("assets").join("index.html"),
            "<title>$page_title</title><script>var sep = \"${separator}\"; var cost = \"$5\";</script>",
        )
        .unwrap();
        std::fs::write(
            temp_dir.path().join("assets").join("app.js"),
            "console.log(\"editor\");",
        )
        .unwrap();
        Self { temp_dir }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn data(&self) -> PathBuf {
        self.root().join("data")
    }

    pub fn data_path(&self, name: &str) -> String {
        self.data().join(name).display().to_string()
    }

    pub fn config(&self) -> Config {
        Config {
            listen_ip: "127.0.0.1".to_string(),
            port: 0,
            page_title: "Test Editor".to_string(),
            assets_dir: self.root().join("assets"),
            ..Config::default()
        }
    }

    pub fn app(&self) -> Router {
        test_app(self.config())
    }
}

/// Create a test app for `config`.
pub fn test_app(config: Config) -> Router {
    let state = AppState::new(config).unwrap();
    editor_files::routes::app(state)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8(self.body.to_vec()).unwrap()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn content_type(&self) -> &str {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
    }
}

pub async fn send(app: Router, request: Request<Body>) -> TestResponse {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn get(app: Router, uri: &str) -> TestResponse {
    send(
        app,
        Request::builder()
            .uri(uri)
            .method(Method::GET)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

/// GET `uri` with a single percent-encoded query parameter.
pub async fn get_query(app: Router, uri: &str, key: &str, value: &str) -> TestResponse {
    get(app, &format!("{}?{}={}", uri, key, urlencoding::encode(value))).await
}

/// POST an urlencoded form and decode the JSON envelope.
pub async fn post_form(app: Router, uri: &str, fields: &[(&str, &str)]) -> Value {
    let body = fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let response = send(
        app,
        Request::builder()
            .uri(uri)
            .method(Method::POST)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap(),
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.content_type(), "text/json");
    response.json()
}

/// Multipart body with a `path` field and a `file` field.
pub fn multipart_body(dir: &str, file_name: &str, contents: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"path\"\r\n\r\n{dir}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn post_upload(app: Router, body: Vec<u8>) -> Value {
    let response = send(
        app,
        Request::builder()
            .uri("/api/upload")
            .method(Method::POST)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap(),
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    response.json()
}

/// POST a multipart upload sent as a stream of `chunks`, declaring
/// `content_length` only when given.
pub async fn post_upload_stream(
    app: Router,
    chunks: Vec<Bytes>,
    content_length: Option<u64>,
) -> Value {
    let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
    let mut builder = Request::builder()
        .uri("/api/upload")
        .method(Method::POST)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(length) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    let response = send(app, builder.body(Body::from_stream(stream)).unwrap()).await;
    assert_eq!(response.status, StatusCode::OK);
    response.json()
}

/// Split `body` into `size`-byte chunks.
pub fn chunked(body: Vec<u8>, size: usize) -> Vec<Bytes> {
    body.chunks(size).map(Bytes::copy_from_slice).collect()
}
