//! HTTP API tests against a real temp-dir storage backend.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat};
use tower::ServiceExt;

use asset_core::{Config, DedupRegistry, PipelineContext, SizeSpecs, StorageOptions, WorkerPool};

use crate::http;

struct TestServer {
    app: Router,
    ctx: PipelineContext,
    _root: tempfile::TempDir,
}

fn test_config(root: &Path, auth_token: Option<&str>, processing_timeout_secs: u64) -> Config {
    Config {
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        processing_timeout_secs,
        socket_kill_timeout_secs: processing_timeout_secs + 2,
        thread_pool_size: Some(4),
        upload_limit_bytes: 1024 * 1024,
        sizes: SizeSpecs::parse("64:50%").unwrap(),
        formats: HashMap::from([
            ("png".to_string(), vec!["webp".to_string()]),
            ("*".to_string(), vec!["jpg".to_string()]),
        ]),
        auth_header: auth_token.map(|t| format!("Bearer {t}")),
        storage: StorageOptions::Fs {
            data_dir: root.join("data"),
            temp_dir: root.join("scratch"),
        },
    }
}

fn server_with(config: impl FnOnce(&Path) -> Config) -> TestServer {
    let root = tempfile::tempdir().unwrap();
    let config = Arc::new(config(root.path()));
    let storage = asset_core::storage::create(&config.storage);
    storage.init().unwrap();
    let ctx = PipelineContext {
        pool: Arc::new(WorkerPool::new(config.thread_pool_size())),
        config,
        storage,
        registry: Arc::new(DedupRegistry::new()),
    };
    TestServer {
        app: http::router(ctx.clone()),
        ctx,
        _root: root,
    }
}

fn server() -> TestServer {
    server_with(|root| test_config(root, None, 8))
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 7])
    }));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    auth: Option<&str>,
    body: Vec<u8>,
) -> Response {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        request = request.header(header::AUTHORIZATION, auth);
    }
    app.clone()
        .oneshot(request.body(Body::from(body)).unwrap())
        .await
        .unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let server = server();
    let response = send(&server.app, Method::POST, "/api/other", None, vec![]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "error.not_found");
}

#[tokio::test]
async fn test_wrong_method_is_405() {
    let server = server();
    let response = send(
        &server.app,
        Method::GET,
        "/api/upload?filename=a.png",
        None,
        vec![],
    )
    .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body_json(response).await["error"], "error.method_not_allowed");
}

#[tokio::test]
async fn test_missing_filename_is_400() {
    let server = server();
    let response = send(&server.app, Method::POST, "/api/upload", None, png_bytes(8, 8)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "error.missing_filename");
}

#[tokio::test]
async fn test_auth_required_when_configured() {
    let server = server_with(|root| test_config(root, Some("sekrit"), 8));
    let uri = "/api/upload?filename=a.png";

    let response = send(&server.app, Method::POST, uri, None, png_bytes(8, 8)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "error.unauthorized");

    let response = send(
        &server.app,
        Method::POST,
        uri,
        Some("Bearer wrong"),
        png_bytes(8, 8),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &server.app,
        Method::POST,
        uri,
        Some("Bearer sekrit"),
        png_bytes(100, 100),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let server = server_with(|root| Config {
        upload_limit_bytes: 1024,
        ..test_config(root, None, 8)
    });
    let response = send(
        &server.app,
        Method::POST,
        "/api/upload?filename=a.png",
        None,
        vec![0u8; 4096],
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["error"], "error.payload_too_large");
}

#[tokio::test]
async fn test_undecodable_body_is_invalid_image() {
    let server = server();
    let response = send(
        &server.app,
        Method::POST,
        "/api/upload?filename=a.png",
        None,
        b"not an image".to_vec(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "error.invalid_image");
}

#[tokio::test]
async fn test_upload_roundtrip() {
    let server = server();
    let uri = "/api/upload?filename=Some%20Photo.png";
    let bytes = png_bytes(300, 200);

    let response = send(&server.app, Method::POST, uri, None, bytes.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let first = body_json(response).await;

    assert_eq!(first["hash"].as_str().unwrap().len(), 32);
    assert_eq!(first["filename"], "Some_Photo");
    assert_eq!(first["is_new"], true);
    assert_eq!(first["original"]["width"], 300);
    assert_eq!(first["original"]["height"], 200);
    assert_eq!(first["original"]["formats"][0], "png");

    let widths: Vec<u64> = first["variants"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["width"].as_u64().unwrap())
        .collect();
    assert_eq!(widths, vec![75, 150, 300]);
    for variant in first["variants"].as_array().unwrap() {
        assert_eq!(variant["formats"][0], "jpg");
        assert_eq!(variant["formats"][1], "webp");
    }

    // Same bytes again: answered from storage, identical except is_new.
    let response = send(&server.app, Method::POST, uri, None, bytes).await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = body_json(response).await;
    assert_eq!(second["is_new"], false);
    let mut expected = first.clone();
    expected["is_new"] = serde_json::Value::Bool(false);
    assert_eq!(second, expected);

    assert!(server.ctx.registry.is_empty());
}

#[tokio::test]
async fn test_processing_timeout_responds_503_but_still_commits() {
    // A zero deadline times out before any pipeline work lands.
    let server = server_with(|root| test_config(root, None, 0));
    let bytes = png_bytes(640, 480);

    let response = send(
        &server.app,
        Method::POST,
        "/api/upload?filename=slow.png",
        None,
        bytes.clone(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"], "error.processing_timed_out");

    // The pipeline keeps running and commits; a retry with a sane deadline
    // is a cache hit.
    let retry_ctx = PipelineContext {
        config: Arc::new(test_config(server._root.path(), None, 8)),
        ..server.ctx.clone()
    };
    let retry_app = http::router(retry_ctx);
    let response = send(
        &retry_app,
        Method::POST,
        "/api/upload?filename=slow.png",
        None,
        bytes,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await;
    assert_eq!(record["is_new"], false);
}
