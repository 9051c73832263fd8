// ABOUTME: Axum router combining the health check with the mcplex transport routes
// ABOUTME: Mounts SSE session, SSE message and callback envelope endpoints
//
// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use mcplex::http;

use crate::health;
use crate::state::SharedState;

/// Build the application router with all endpoints
///
/// Routes (transport paths from the configured `HttpConfig`):
/// - `GET /health` — Liveness and session count
/// - `GET /sse` — Open an SSE session
/// - `POST /sse/{session_id}` — Submit a message to an SSE session
/// - `POST /callback` — Callback envelope
pub fn build(state: SharedState) -> Router {
    let transports = http::server_routes(Arc::clone(state.context()));
    Router::new()
        .route("/health", get(health::handle))
        .with_state(state)
        .merge(transports)
}
