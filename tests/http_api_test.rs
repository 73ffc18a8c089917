//! HTTP boundary tests: routing, the session header, and the uniform
//! error envelope.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use mwshell::server::build_app;
use mwshell::{Config, MemoryStore, ShellService};
use serde_json::{json, Value};
use tower::ServiceExt;

const SESSION_HEADER: &str = "x-mws-session-id";

fn app() -> Router {
    let config = Config {
        quota_num_collections: None,
        ratelimit_quota: 100_000,
        ..Config::default()
    };
    build_app(ShellService::new(Arc::new(MemoryStore::new()), config))
}

/// Percent-encodes a JSON payload for the `q` query parameter.
fn encode_q(value: &Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len() * 3);
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("request failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body read failed");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is not JSON")
    };
    (status, body)
}

fn get(uri: &str, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(session) = session {
        builder = builder.header(SESSION_HEADER, session);
    }
    builder.body(Body::empty()).unwrap()
}

fn with_json(method: Method, uri: &str, session: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(SESSION_HEADER, session)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn create_resource(app: &Router, session: &str) -> String {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/mws/")
        .header(SESSION_HEADER, session)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    body["res_id"].as_str().expect("res_id missing").to_string()
}

#[tokio::test]
async fn test_create_resource_is_idempotent_per_session() {
    let app = app();
    let first = create_resource(&app, "s1").await;
    let second = create_resource(&app, "s1").await;
    assert_eq!(first, second);

    let other = create_resource(&app, "s2").await;
    assert_ne!(first, other);
}

#[tokio::test]
async fn test_insert_find_roundtrip_over_http() {
    let app = app();
    let res_id = create_resource(&app, "s1").await;

    let uri = format!("/mws/{}/db/widgets/insert", res_id);
    let (status, body) = send(
        &app,
        with_json(
            Method::POST,
            &uri,
            "s1",
            json!({"document": {"name": "x"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"].as_array().unwrap().len(), 1);

    let q = encode_q(&json!({"query": {"name": "x"}}));
    let uri = format!("/mws/{}/db/widgets/find?q={}", res_id, q);
    let (status, body) = send(&app, get(&uri, Some("s1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["cursor_id"], json!(0));
    assert_eq!(body["result"][0]["name"], json!("x"));
}

#[tokio::test]
async fn test_missing_session_yields_401_envelope() {
    let app = app();
    let res_id = create_resource(&app, "s1").await;

    let uri = format!("/mws/{}/db/widgets/find", res_id);
    let (status, body) = send(&app, get(&uri, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], json!(401));
    assert!(body["reason"].is_string());
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_foreign_session_yields_403_envelope() {
    let app = app();
    let res_id = create_resource(&app, "s1").await;
    let _other = create_resource(&app, "s2").await;

    let uri = format!("/mws/{}/db/widgets/find", res_id);
    let (status, body) = send(&app, get(&uri, Some("s2"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], json!(403));
}

#[tokio::test]
async fn test_invalid_get_json_yields_400_with_detail() {
    let app = app();
    let res_id = create_resource(&app, "s1").await;

    let uri = format!("/mws/{}/db/widgets/find?q=%7Bnot-json", res_id);
    let (status, body) = send(&app, get(&uri, Some("s1"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!(400));
    assert_eq!(body["reason"], json!("Error parsing JSON data"));
    assert_eq!(body["detail"], json!("Invalid GET parameter data"));
}

#[tokio::test]
async fn test_insert_without_document_is_400() {
    let app = app();
    let res_id = create_resource(&app, "s1").await;

    let uri = format!("/mws/{}/db/widgets/insert", res_id);
    let (status, body) = send(
        &app,
        with_json(Method::POST, &uri, "s1", json!({"wrong": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["reason"],
        json!("'document' argument not found in the insert request.")
    );
}

#[tokio::test]
async fn test_collection_lifecycle_over_http() {
    let app = app();
    let res_id = create_resource(&app, "s1").await;

    let uri = format!("/mws/{}/db/things/insert", res_id);
    send(
        &app,
        with_json(Method::POST, &uri, "s1", json!({"document": {"v": 1}})),
    )
    .await;

    let uri = format!("/mws/{}/db/getCollectionNames", res_id);
    let (status, body) = send(&app, get(&uri, Some("s1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], json!(["things"]));

    let uri = format!("/mws/{}/db/things/drop", res_id);
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(&uri)
        .header(SESSION_HEADER, "s1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let uri = format!("/mws/{}/db/getCollectionNames", res_id);
    let (_, body) = send(&app, get(&uri, Some("s1"))).await;
    assert_eq!(body["result"], json!([]));
}

#[tokio::test]
async fn test_keep_alive_returns_no_content() {
    let app = app();
    let res_id = create_resource(&app, "s1").await;

    let uri = format!("/mws/{}/keep-alive", res_id);
    let request = Request::builder()
        .method(Method::POST)
        .uri(&uri)
        .header(SESSION_HEADER, "s1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_responses_are_not_cacheable() {
    let app = app();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/mws/")
                .header(SESSION_HEADER, "s1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );
    assert_eq!(response.headers().get(header::EXPIRES).unwrap(), "0");
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = app();
    let (status, body) = send(&app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("healthy"));
}
