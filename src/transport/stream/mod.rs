// ABOUTME: Server-Sent-Events binding: one long-lived event stream plus separate POSTs
// ABOUTME: Exposes the server half, the client half and the SSE frame parser
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

mod client;
pub mod frame;
mod server;

pub use client::SseClientTransport;
pub use server::{SseEventStream, SseFrame, SseServerTransport};

/// SSE event announcing the URL the peer must POST messages to
pub const ENDPOINT_EVENT: &str = "endpoint";

/// SSE event carrying one JSON-RPC message
pub const MESSAGE_EVENT: &str = "message";

/// SSE event sent right before the server ends the stream
pub const CLOSE_EVENT: &str = "close";
