//! Unit tests for the API extractors

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tokio_tutor_chat_api::api::{ApiJson, ExtractConversation};
use tower::ServiceExt;

#[derive(Deserialize, Debug)]
struct Ping {
    text: String,
}

fn app() -> Router {
    Router::new()
        .route(
            "/conversations/:id",
            get(|ExtractConversation(id): ExtractConversation| async move { id }),
        )
        .route(
            "/ping",
            post(|ApiJson(ping): ApiJson<Ping>| async move { Json(ping.text) }),
        )
}

async fn call(request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_extract_conversation_trims() {
    let (status, body) = call(
        Request::builder()
            .uri("/conversations/%20c1%20")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"c1");
}

#[tokio::test]
async fn test_extract_conversation_blank_is_rejected() {
    let (status, body) = call(
        Request::builder()
            .uri("/conversations/%20%20")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["message"], "Conversation ID cannot be empty");
}

#[tokio::test]
async fn test_api_json_accepts_valid_body() {
    let (status, body) = call(
        Request::builder()
            .method("POST")
            .uri("/ping")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"text":"pong"}"#))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, br#""pong""#);
}

#[tokio::test]
async fn test_api_json_missing_field() {
    let (status, body) = call(
        Request::builder()
            .method("POST")
            .uri("/ping")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["status"], "error");
    assert!(error["message"].as_str().unwrap().contains("text"));
}

#[tokio::test]
async fn test_api_json_requires_content_type() {
    let (status, body) = call(
        Request::builder()
            .method("POST")
            .uri("/ping")
            .body(Body::from(r#"{"text":"pong"}"#))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["status"], "error");
}
