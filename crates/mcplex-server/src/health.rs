// ABOUTME: GET /health handler reporting liveness and open session count
// ABOUTME: Always HTTP 200 while the process serves requests
//
// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 dravr.ai

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::protocol::SERVER_VERSION;
use crate::state::SharedState;

/// Body of GET /health
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "ok"
    pub status: &'static str,
    /// Sessions currently registered
    pub sessions: usize,
    /// Server version
    pub version: &'static str,
}

/// Handle GET /health
pub async fn handle(State(state): State<SharedState>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        sessions: state.session_count(),
        version: SERVER_VERSION,
    };
    (StatusCode::OK, Json(resp))
}
