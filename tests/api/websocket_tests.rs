//! WebSocket API Tests
//!
//! Handshake, subscription management and fan-out over real sockets.

use futures::SinkExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;

use crate::common::*;

#[tokio::test]
async fn test_auth_success_registers_connection() {
    // Arrange
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();

    // Act
    let _ws = app.connect_as(user).await;

    // Assert
    app.wait_for_connections(1).await;
}

#[tokio::test]
async fn test_invalid_token_is_rejected() {
    // Arrange
    let app = TestApp::spawn().await;
    let mut ws = app.connect().await;

    // Act
    send_json(
        &mut ws,
        json!({"type": "AUTH_REQUEST", "data": {"token": "not-a-jwt"}}),
    )
    .await;

    // Assert
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "AUTH_ERROR");
    assert_eq!(reply["data"]["message"], "Invalid token");
    expect_closed(&mut ws).await;
    assert_eq!(app.hub.stats().await.unwrap().connections, 0);
}

#[tokio::test]
async fn test_first_frame_must_be_auth_request() {
    // Arrange
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let mut ws = app.connect().await;

    // Act
    send_json(&mut ws, subscribe(user, &[Uuid::new_v4()])).await;

    // Assert
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "AUTH_ERROR");
    assert_eq!(reply["data"]["message"], "Invalid auth message");
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_auth_request_without_token_is_invalid_data() {
    // Arrange
    let app = TestApp::spawn().await;
    let mut ws = app.connect().await;

    // Act
    send_json(&mut ws, json!({"type": "AUTH_REQUEST", "data": {}})).await;

    // Assert
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "AUTH_ERROR");
    assert_eq!(reply["data"]["message"], "Invalid auth data");
}

#[tokio::test]
async fn test_auth_timeout_closes_connection() {
    // Arrange
    let app = TestApp::spawn_with(|settings| settings.websocket.auth_timeout_secs = 1).await;

    // Act
    let mut ws = app.connect().await;

    // Assert
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "AUTH_ERROR");
    assert_eq!(reply["data"]["message"], "Failed to read auth message");
    expect_closed(&mut ws).await;
    assert_eq!(app.hub.stats().await.unwrap().connections, 0);
}

/// Subscribe over the socket, then receive a bus event for that channel.
#[tokio::test]
async fn test_subscribed_client_receives_channel_event() {
    // Arrange
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let channel = Uuid::new_v4();
    let mut ws = app.connect_as(user).await;

    send_json(&mut ws, subscribe(user, &[channel])).await;
    app.wait_for_subscribers(channel, 1).await;

    // Act
    let event = message_created(channel, "hello");
    app.publish(event.clone()).await;

    // Assert
    let received = recv_json(&mut ws).await;
    assert_eq!(received, event);
}

/// A client subscribed elsewhere receives nothing.
#[tokio::test]
async fn test_event_for_other_channel_is_not_delivered() {
    // Arrange
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let subscribed = Uuid::new_v4();
    let other = Uuid::new_v4();
    let mut ws = app.connect_as(user).await;

    send_json(&mut ws, subscribe(user, &[subscribed])).await;
    app.wait_for_subscribers(subscribed, 1).await;

    // Act
    app.publish(message_created(other, "not for you")).await;

    // Assert
    assert_eq!(try_recv_json(&mut ws, QUIET).await, None);
}

/// After a disconnect, broadcasts to the old channel reach nobody and the
/// hub keeps serving.
#[tokio::test]
async fn test_disconnect_cleans_up_subscriptions() {
    // Arrange
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let channel = Uuid::new_v4();
    let mut ws = app.connect_as(user).await;

    send_json(&mut ws, subscribe(user, &[channel])).await;
    app.wait_for_subscribers(channel, 1).await;

    // Act
    ws.close(None).await.unwrap();
    app.wait_for_subscribers(channel, 0).await;
    app.publish(message_created(channel, "anyone there?")).await;

    // Assert
    app.wait_for_connections(0).await;
    let stats = app.hub.stats().await.unwrap();
    assert_eq!(stats.channels, 0);
}

#[tokio::test]
async fn test_every_subscriber_receives_in_order() {
    // Arrange
    let app = TestApp::spawn().await;
    let channel = Uuid::new_v4();
    let mut sockets = Vec::new();
    for _ in 0..3 {
        let user = Uuid::new_v4();
        let mut ws = app.connect_as(user).await;
        send_json(&mut ws, subscribe(user, &[channel])).await;
        sockets.push(ws);
    }
    app.wait_for_subscribers(channel, 3).await;

    // Act
    let events: Vec<_> = (0..5)
        .map(|i| message_created(channel, &format!("message {i}")))
        .collect();
    for event in &events {
        app.publish(event.clone()).await;
    }

    // Assert
    for ws in &mut sockets {
        for event in &events {
            assert_eq!(&recv_json(ws).await, event);
        }
    }
}

#[tokio::test]
async fn test_reconnect_replaces_previous_connection() {
    // Arrange
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let channel = Uuid::new_v4();
    let mut first = app.connect_as(user).await;
    send_json(&mut first, subscribe(user, &[channel])).await;
    app.wait_for_subscribers(channel, 1).await;

    // Act
    let mut second = app.connect_as(user).await;

    // Assert
    expect_closed(&mut first).await;
    app.wait_for_subscribers(channel, 0).await;
    app.wait_for_connections(1).await;

    send_json(&mut second, subscribe(user, &[channel])).await;
    app.wait_for_subscribers(channel, 1).await;

    let event = message_created(channel, "to the new session");
    app.publish(event.clone()).await;
    assert_eq!(recv_json(&mut second).await, event);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    // Arrange
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let keep = Uuid::new_v4();
    let leave = Uuid::new_v4();
    let mut ws = app.connect_as(user).await;
    send_json(&mut ws, subscribe(user, &[keep, leave])).await;
    app.wait_for_subscribers(leave, 1).await;

    // Act
    send_json(&mut ws, unsubscribe(user, &[leave])).await;
    app.wait_for_subscribers(leave, 0).await;
    app.publish(message_created(leave, "gone")).await;
    let kept = message_created(keep, "still here");
    app.publish(kept.clone()).await;

    // Assert
    assert_eq!(recv_json(&mut ws).await, kept);
}

#[tokio::test]
async fn test_bus_can_subscribe_connected_user() {
    // Arrange
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let channel = Uuid::new_v4();
    let mut ws = app.connect_as(user).await;
    app.wait_for_connections(1).await;

    // Act
    app.publish(subscribe(user, &[channel])).await;
    app.wait_for_subscribers(channel, 1).await;
    let event = message_created(channel, "joined by the server");
    app.publish(event.clone()).await;

    // Assert
    assert_eq!(recv_json(&mut ws).await, event);
}

#[tokio::test]
async fn test_client_cannot_subscribe_another_user() {
    // Arrange
    let app = TestApp::spawn().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let channel = Uuid::new_v4();
    let mut alice_ws = app.connect_as(alice).await;
    let _bob_ws = app.connect_as(bob).await;
    app.wait_for_connections(2).await;

    // Act
    send_json(&mut alice_ws, subscribe(bob, &[channel])).await;
    send_json(&mut alice_ws, subscribe(alice, &[channel])).await;

    // Assert: the hub processes in order, so once alice is in, bob's
    // request has already been handled.
    app.wait_for_subscribers(channel, 1).await;
    tokio::time::sleep(QUIET).await;
    assert_eq!(app.hub.subscriber_count(&channel), 1);
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() {
    // Arrange
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let channel = Uuid::new_v4();
    let mut ws = app.connect_as(user).await;

    // Act
    ws.send(tokio_tungstenite::tungstenite::Message::Text("{not json".into()))
        .await
        .unwrap();
    send_json(&mut ws, json!({"type": "TYPING_START", "data": {}})).await;
    send_json(&mut ws, subscribe(user, &[channel])).await;

    // Assert
    app.wait_for_subscribers(channel, 1).await;
    let event = message_created(channel, "still connected");
    app.publish(event.clone()).await;
    assert_eq!(recv_json(&mut ws).await, event);
}

#[tokio::test]
async fn test_hub_shutdown_closes_connections() {
    // Arrange
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let mut ws = app.connect_as(user).await;
    app.wait_for_connections(1).await;

    // Act
    app.hub.shutdown();

    // Assert
    expect_closed(&mut ws).await;
    assert!(app.hub.stats().await.is_err());
}

#[tokio::test]
async fn test_client_that_never_answers_pings_is_dropped() {
    // Arrange
    let app = TestApp::spawn_with(|settings| {
        settings.websocket.pong_wait_secs = 2;
        settings.websocket.ping_period_secs = 1;
    })
    .await;
    let user = Uuid::new_v4();

    // Act: never poll the socket again, so no pong goes back
    let _ws = app.connect_as(user).await;

    // Assert
    app.wait_for_connections(1).await;
    app.wait_for_connections(0).await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    // Arrange
    let app = TestApp::spawn_with(|settings| {
        settings.websocket.max_message_size = 1024;
        settings.websocket.max_frame_size = 1024;
    })
    .await;
    let user = Uuid::new_v4();
    let mut ws = app.connect_as(user).await;
    app.wait_for_connections(1).await;

    // Act
    let oversized = "x".repeat(8 * 1024);
    ws.send(tokio_tungstenite::tungstenite::Message::Text(oversized.into()))
        .await
        .unwrap();

    // Assert
    expect_closed(&mut ws).await;
    app.wait_for_connections(0).await;
}
