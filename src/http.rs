// ABOUTME: Axum routes for the SSE and callback bindings on both server and client side
// ABOUTME: Creates transports for new sessions and routes follow-up requests through the registry
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use reqwest::Url;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{HttpConfig, TransportOptions};
use crate::message::Message;
use crate::registry::TransportRegistry;
use crate::session::{self, MessageHandler};
use crate::transport::callback::{CallbackAccepted, CallbackEnvelope, CallbackServerTransport};
use crate::transport::stream::SseServerTransport;
use crate::transport::{Inbound, Transport};
use crate::types::{ErrorKind, SessionId, TransportError};

/// Shared context handle for the server routes
pub type SharedContext = Arc<ServerContext>;

/// Everything the server routes need to open and route sessions
pub struct ServerContext {
    /// Session lookup for follow-up requests
    pub registry: Arc<TransportRegistry>,
    /// Handler every session dispatches to
    pub handler: Arc<dyn MessageHandler>,
    /// Paths and timing
    pub config: HttpConfig,
    /// Client used by callback transports to reach their peers
    pub client: reqwest::Client,
    /// Parent of every session's cancellation token
    pub shutdown: CancellationToken,
}

impl ServerContext {
    /// Create a context with a fresh registry, HTTP client and shutdown token
    pub fn new(handler: Arc<dyn MessageHandler>, config: HttpConfig) -> Self {
        Self {
            registry: Arc::new(TransportRegistry::new()),
            handler,
            config,
            client: reqwest::Client::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an existing registry
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<TransportRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Use an existing shutdown token
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn transport_options(&self) -> TransportOptions {
        TransportOptions::default()
            .with_registry(Arc::clone(&self.registry))
            .with_close_timeout(self.config.close_timeout)
    }

    /// Hand a connected transport to a background session
    fn spawn_session(&self, transport: Arc<dyn Transport>, inbound: Inbound) {
        tokio::spawn(session::serve(
            transport,
            inbound,
            Arc::clone(&self.handler),
            self.shutdown.child_token(),
        ));
    }
}

// ============================================================================
// Routers
// ============================================================================

/// Build the server-side transport routes
///
/// Routes (paths from [`HttpConfig`]):
/// - `GET <sse_path>` — Open an SSE session
/// - `POST <sse_path>/{session_id}` — Submit one message to an SSE session
/// - `POST <callback_path>` — Callback envelope (first contact or follow-up)
pub fn server_routes(ctx: SharedContext) -> Router {
    let sse_path = ctx.config.sse_path.clone();
    let callback_path = ctx.config.callback_path.clone();
    Router::new()
        .route(&sse_path, get(accept_stream))
        .route(&format!("{sse_path}/{{session_id}}"), post(ingest_stream))
        .route(&callback_path, post(accept_callback))
        .with_state(ctx)
}

/// Build the client-side route that receives callback posts
///
/// `POST <path>/{session_id}` delivers the body to the client transport
/// registered under that id.
pub fn callback_receiver_routes(registry: Arc<TransportRegistry>, path: &str) -> Router {
    let path = path.trim_end_matches('/');
    Router::new()
        .route(&format!("{path}/{{session_id}}"), post(receive_callback))
        .with_state(registry)
}

// ============================================================================
// Handlers
// ============================================================================

/// Handle GET on the SSE path: create, connect and serve a new stream session
async fn accept_stream(State(ctx): State<SharedContext>) -> Response {
    let session_id = SessionId::generate();
    let endpoint = ctx.config.sse_endpoint(session_id.as_str());
    let (transport, frames) = SseServerTransport::new(endpoint, ctx.transport_options());

    let inbound = match transport.connect(session_id.clone()).await {
        Ok(inbound) => inbound,
        Err(e) => return transport_error_response(&e),
    };
    ctx.spawn_session(transport, inbound);
    info!(session_id = %session_id, "SSE session opened");

    let events = frames.map(|frame| Ok::<_, Infallible>(frame.into_event()));
    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(ctx.config.keep_alive))
        .into_response()
}

/// Handle POST on an SSE session endpoint
async fn ingest_stream(
    State(ctx): State<SharedContext>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Response {
    ingest_into(&ctx.registry, &session_id, &body, &ctx.shutdown).await
}

/// Handle POST of a callback envelope
async fn accept_callback(State(ctx): State<SharedContext>, body: Bytes) -> Response {
    let envelope: CallbackEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                &format!("Invalid callback envelope: {e}"),
            );
        }
    };
    if let Err(e) = envelope.message.validate() {
        return transport_error_response(&e);
    }

    if let Some(session_id) = envelope.session_id {
        let Some(transport) = ctx.registry.try_get(session_id.as_str()) else {
            return unknown_session(session_id.as_str());
        };
        return match transport.ingest(envelope.message, &ctx.shutdown).await {
            Ok(()) => StatusCode::ACCEPTED.into_response(),
            Err(e) => transport_error_response(&e),
        };
    }

    let Some(callback_url) = envelope.callback_url else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "First contact requires callbackUrl",
        );
    };
    let callback_url = match Url::parse(&callback_url) {
        Ok(url) => url,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                &format!("Invalid callbackUrl {callback_url:?}: {e}"),
            );
        }
    };

    let session_id = SessionId::generate();
    let transport = CallbackServerTransport::new(
        callback_url.clone(),
        ctx.client.clone(),
        ctx.transport_options(),
    );
    let inbound = match transport.connect(session_id.clone()).await {
        Ok(inbound) => inbound,
        Err(e) => return transport_error_response(&e),
    };
    ctx.spawn_session(Arc::clone(&transport) as Arc<dyn Transport>, inbound);
    info!(session_id = %session_id, callback_url = %callback_url, "Callback session opened");

    if let Err(e) = transport.ingest(envelope.message, &ctx.shutdown).await {
        return transport_error_response(&e);
    }
    (StatusCode::OK, Json(CallbackAccepted { session_id })).into_response()
}

/// Handle a server post arriving at a callback client
async fn receive_callback(
    State(registry): State<Arc<TransportRegistry>>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Response {
    ingest_into(&registry, &session_id, &body, &CancellationToken::new()).await
}

async fn ingest_into(
    registry: &TransportRegistry,
    session_id: &str,
    body: &[u8],
    cancel: &CancellationToken,
) -> Response {
    let Some(transport) = registry.try_get(session_id) else {
        return unknown_session(session_id);
    };
    let message = match Message::decode_slice(body) {
        Ok(message) => message,
        Err(e) => return transport_error_response(&e),
    };

    match transport.ingest(message, cancel).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => transport_error_response(&e),
    }
}

// ============================================================================
// Error Responses
// ============================================================================

/// JSON error body returned by the transport routes
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail within an [`ErrorResponse`]
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Error message
    pub message: String,
    /// Error type
    #[serde(rename = "type")]
    pub error_type: String,
}

impl ErrorResponse {
    /// Build an error response with the given type and message
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                error_type: error_type.into(),
            },
        }
    }
}

/// Map a transport error kind to an HTTP status and error type
pub const fn status_for(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::Decode => (StatusCode::BAD_REQUEST, "invalid_request_error"),
        ErrorKind::Closed => (StatusCode::GONE, "session_closed"),
        ErrorKind::NotConnected => (StatusCode::CONFLICT, "session_not_connected"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
    }
}

fn transport_error_response(err: &TransportError) -> Response {
    let (status, error_type) = status_for(err.kind);
    if status.is_server_error() {
        error!(kind = ?err.kind, message = %err.message, "Transport error");
    } else {
        debug!(kind = ?err.kind, message = %err.message, "Rejected transport request");
    }
    error_response(status, error_type, &err.message)
}

fn unknown_session(session_id: &str) -> Response {
    debug!(session_id, "Unknown session");
    error_response(
        StatusCode::NOT_FOUND,
        "session_not_found",
        &format!("Unknown session: {session_id}"),
    )
}

fn error_response(status: StatusCode, error_type: &str, message: &str) -> Response {
    (status, Json(ErrorResponse::new(error_type, message))).into_response()
}
