//! Health Check API Tests

use axum::body::to_bytes;
use axum::http::StatusCode;
use uuid::Uuid;

use crate::common::*;

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Test basic health check endpoint returns 200 OK with the connection count
#[tokio::test]
async fn test_health_check_returns_ok() {
    // Arrange
    let app = TestApp::spawn().await;
    let _ws = app.connect_as(Uuid::new_v4()).await;
    app.wait_for_connections(1).await;

    // Act
    let response = app.get("/health").await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["connections"], 1);
}

/// Liveness does not depend on Redis or the hub
#[tokio::test]
async fn test_liveness_probe() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let response = app.get("/health/live").await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "alive");
}

/// Readiness fails while Redis is unreachable but still reports the hub
#[tokio::test]
async fn test_readiness_without_redis_is_unavailable() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let response = app.get("/health/ready").await;

    // Assert
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = json_body(response).await;
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["checks"]["redis"]["status"], "unhealthy");
    assert_eq!(json["checks"]["hub"]["status"], "healthy");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    // Arrange
    let app = TestApp::spawn().await;
    let _ws = app.connect_as(Uuid::new_v4()).await;
    app.wait_for_connections(1).await;

    // Act
    let response = app.get("/metrics").await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("realtime_websocket_total_connections"));
    assert!(text.contains("realtime_websocket_active_connections"));
}
