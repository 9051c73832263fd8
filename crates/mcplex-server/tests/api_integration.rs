// ABOUTME: Integration tests for the mcplex-server HTTP endpoints and transports
// ABOUTME: Exercises health, SSE and callback routes via the axum test client and real listeners
//
// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mcplex::http::callback_receiver_routes;
use mcplex::types::{ErrorKind, SessionId};
use mcplex::config::DEFAULT_CALLBACK_RECEIVER_PATH;
use mcplex::{
    CallbackClientTransport, ClientSession, CloseReason, HttpConfig, SessionConfig,
    SseClientTransport, Transport, TransportEvent, TransportOptions, TransportRegistry,
};
use reqwest::Url;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use mcplex_server::protocol::SERVER_NAME;
use mcplex_server::router;
use mcplex_server::state::{ServerState, SharedState};

fn test_state() -> SharedState {
    Arc::new(ServerState::new(HttpConfig::default()))
}

/// Build a POST request with a raw body
fn post_raw(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .expect("build request")
}

/// Build a POST request from a JSON body
fn post_json(uri: &str, body: &Value) -> Request<Body> {
    post_raw(uri, serde_json::to_vec(body).expect("serialize"))
}

/// Send a request and parse the response body as JSON
async fn send_and_parse(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("send request");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect")
        .to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Read SSE body frames until one complete event is buffered; returns (event, data)
async fn next_sse_event(body: &mut Body, buffer: &mut String) -> (String, String) {
    loop {
        if let Some(end) = buffer.find("\n\n") {
            let block: String = buffer.drain(..end + 2).collect();
            let mut event = String::from("message");
            let mut data = Vec::new();
            for line in block.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    event = value.trim_start().to_owned();
                } else if let Some(value) = line.strip_prefix("data:") {
                    data.push(value.trim_start().to_owned());
                }
            }
            if data.is_empty() {
                continue;
            }
            return (event, data.join("\n"));
        }

        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("frame");
        if let Ok(bytes) = frame.into_data() {
            buffer.push_str(std::str::from_utf8(&bytes).expect("utf8"));
        }
    }
}

async fn wait_for_sessions(state: &SharedState, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.session_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session count reached");
}

async fn serve_on_random_port(app: axum::Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move { axum::serve(listener, app).await });
    addr
}

fn initialize_params() -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {},
        "clientInfo": {"name": "integration", "version": "0.0.1"}
    })
}

// ============================================================================
// Health Endpoint
// ============================================================================

#[tokio::test]
async fn health_reports_ok_and_session_count() {
    let app = router::build(test_state());
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build request");

    let (status, json) = send_and_parse(app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["sessions"], 0);
    assert!(json["version"].is_string());
}

// ============================================================================
// SSE Binding
// ============================================================================

#[tokio::test]
async fn post_to_unknown_sse_session_is_404() {
    let app = router::build(test_state());
    let (status, json) = send_and_parse(
        app,
        post_json("/sse/nope", &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["type"], "session_not_found");
}

#[tokio::test]
async fn sse_session_announces_endpoint_and_answers_posts() {
    let state = test_state();
    let app = router::build(Arc::clone(&state));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/sse").body(Body::empty()).expect("build request"))
        .await
        .expect("open stream");
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    assert!(content_type.starts_with("text/event-stream"), "got {content_type}");

    let mut body = response.into_body();
    let mut buffer = String::new();
    let (event, endpoint) = next_sse_event(&mut body, &mut buffer).await;
    assert_eq!(event, "endpoint");
    assert!(endpoint.starts_with("/sse/"), "endpoint {endpoint}");
    assert_eq!(state.session_count(), 1);

    let (status, _) = send_and_parse(
        app.clone(),
        post_json(
            &endpoint,
            &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": initialize_params()}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (event, data) = next_sse_event(&mut body, &mut buffer).await;
    assert_eq!(event, "message");
    let reply: Value = serde_json::from_str(&data).expect("reply json");
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["serverInfo"]["name"], SERVER_NAME);

    let (status, json) = send_and_parse(app.clone(), post_raw(&endpoint, "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["type"], "invalid_request_error");

    drop(body);
    wait_for_sessions(&state, 0).await;

    let (status, _) = send_and_parse(
        app,
        post_json(&endpoint, &json!({"jsonrpc": "2.0", "id": 2, "method": "ping"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn requests_before_initialize_are_rejected() {
    let state = test_state();
    let app = router::build(Arc::clone(&state));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/sse").body(Body::empty()).expect("build request"))
        .await
        .expect("open stream");
    let mut body = response.into_body();
    let mut buffer = String::new();
    let (_, endpoint) = next_sse_event(&mut body, &mut buffer).await;

    let (status, _) = send_and_parse(
        app,
        post_json(&endpoint, &json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, data) = next_sse_event(&mut body, &mut buffer).await;
    let reply: Value = serde_json::from_str(&data).expect("reply json");
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"]["code"], mcplex::message::INVALID_REQUEST);
}

#[tokio::test]
async fn sse_client_round_trip_over_real_listener() {
    let state = test_state();
    let addr = serve_on_random_port(router::build(Arc::clone(&state))).await;

    let transport = SseClientTransport::new(
        Url::parse(&format!("http://{addr}/sse")).expect("url"),
        reqwest::Client::new(),
        TransportOptions::default(),
    );
    let inbound = transport
        .connect(SessionId::generate())
        .await
        .expect("connect");
    let session = ClientSession::start(
        transport,
        inbound,
        SessionConfig::default().with_request_timeout(Duration::from_secs(5)),
        CancellationToken::new(),
    );

    let result = session.initialize(initialize_params()).await.expect("initialize");
    assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
    session.ping().await.expect("ping");

    let err = session.request("tools/list", None).await.expect_err("unknown");
    assert_eq!(err.kind, ErrorKind::Protocol);

    session.close().await.expect("close");
    wait_for_sessions(&state, 0).await;
}

#[tokio::test]
async fn server_close_reaches_sse_client_as_peer_disconnect() {
    let state = test_state();
    let addr = serve_on_random_port(router::build(Arc::clone(&state))).await;

    let transport = SseClientTransport::new(
        Url::parse(&format!("http://{addr}/sse")).expect("url"),
        reqwest::Client::new(),
        TransportOptions::default(),
    );
    let mut inbound = transport
        .connect(SessionId::generate())
        .await
        .expect("connect");
    wait_for_sessions(&state, 1).await;

    let registry = &state.context().registry;
    let server_id = registry.session_ids().pop().expect("server session");
    let server_transport = registry.try_get(server_id.as_str()).expect("server transport");
    server_transport
        .close(&CancellationToken::new())
        .await
        .expect("server close");

    let event = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .expect("event in time");
    assert_eq!(event, Some(TransportEvent::Closed(CloseReason::PeerDisconnect)));
    assert!(transport.is_closed());
    assert!(registry.is_empty());

    let err = transport
        .send_outgoing(
            &mcplex::Message::notification("late", None),
            &CancellationToken::new(),
        )
        .await
        .expect_err("closed");
    assert_eq!(err.kind, ErrorKind::Closed);
}

// ============================================================================
// Callback Binding
// ============================================================================

#[tokio::test]
async fn malformed_callback_envelope_is_400() {
    let app = router::build(test_state());
    let (status, json) = send_and_parse(app, post_raw("/callback", "[]")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn first_contact_without_callback_url_is_400() {
    let app = router::build(test_state());
    let (status, json) = send_and_parse(
        app,
        post_json(
            "/callback",
            &json!({"message": {"jsonrpc": "2.0", "id": 1, "method": "initialize"}}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"]["message"]
        .as_str()
        .unwrap_or_default()
        .contains("callbackUrl"));
}

#[tokio::test]
async fn callback_to_unknown_session_is_404() {
    let app = router::build(test_state());
    let (status, _) = send_and_parse(
        app,
        post_json(
            "/callback",
            &json!({"sessionId": "missing", "message": {"jsonrpc": "2.0", "method": "x"}}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn callback_client_round_trip_over_real_listeners() {
    let state = test_state();
    let server_addr = serve_on_random_port(router::build(Arc::clone(&state))).await;

    let client_registry = Arc::new(TransportRegistry::new());
    let receiver_addr = serve_on_random_port(callback_receiver_routes(
        Arc::clone(&client_registry),
        DEFAULT_CALLBACK_RECEIVER_PATH,
    ))
    .await;

    let transport = CallbackClientTransport::new(
        Url::parse(&format!("http://{server_addr}/callback")).expect("url"),
        format!("http://{receiver_addr}{DEFAULT_CALLBACK_RECEIVER_PATH}"),
        reqwest::Client::new(),
        TransportOptions::default().with_registry(Arc::clone(&client_registry)),
    );
    let inbound = transport
        .connect(SessionId::generate())
        .await
        .expect("connect");
    let session = ClientSession::start(
        Arc::clone(&transport) as Arc<dyn Transport>,
        inbound,
        SessionConfig::default().with_request_timeout(Duration::from_secs(5)),
        CancellationToken::new(),
    );

    let result = session.initialize(initialize_params()).await.expect("initialize");
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert!(transport.server_session().is_some());
    assert_eq!(state.session_count(), 1);

    session.ping().await.expect("ping");

    session.close().await.expect("close");
    wait_for_sessions(&state, 0).await;
    assert!(client_registry.is_empty());
}
