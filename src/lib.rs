// ABOUTME: MCP transport and session-multiplexing library for JSON-RPC peers
// ABOUTME: Re-exports the Transport trait, its pipe/SSE/callback bindings, registry and session drivers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # mcplex — MCP Transports
//!
//! Moves Model Context Protocol JSON-RPC messages between a processor and a
//! remote peer over one of three bindings, all behind the same
//! [`Transport`](transport::Transport) trait:
//!
//! - **Pipe** — newline-delimited JSON over stdin/stdout or a spawned child
//! - **Stream** — one Server-Sent-Events response plus separate POSTs
//! - **Callback** — two HTTP POST channels, one owned by each side
//!
//! HTTP requests that arrive independently of the request that opened their
//! session are routed through a [`TransportRegistry`]. Sessions read
//! [`TransportEvent`](transport::TransportEvent)s from the channel returned by
//! `connect` and reply through `send_outgoing`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mcplex::config::{PipeCommand, SessionConfig, TransportOptions};
//! use mcplex::session::ClientSession;
//! use mcplex::transport::pipe::PipeTransport;
//! use mcplex::transport::Transport;
//! use mcplex::types::{SessionId, TransportError};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), TransportError> {
//! let transport = PipeTransport::spawn(&PipeCommand::new("my-mcp-server"), TransportOptions::default())?;
//! let inbound = transport.connect(SessionId::generate()).await?;
//! let session = ClientSession::start(transport, inbound, SessionConfig::default(), CancellationToken::new());
//! session.initialize(serde_json::json!({"protocolVersion": "2024-11-05"})).await?;
//! session.ping().await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`types`] — Error type and session identifiers
//! - [`message`] — JSON-RPC envelope, error codes and validation
//! - [`config`] — Transport, HTTP and session configuration
//! - [`transport`] — `Transport` trait and the pipe, stream and callback bindings
//! - [`registry`] — Session-id to transport lookup
//! - [`session`] — Server dispatch loop and client request correlation
//! - [`http`] — Axum routes for the HTTP bindings

/// Core types: errors and session identifiers
pub mod types;

/// Transport, HTTP and session configuration
pub mod config;
/// Axum routes for the SSE and callback bindings
pub mod http;
/// JSON-RPC message envelope
pub mod message;
/// Child-process spawning for pipe transports
pub(crate) mod process;
/// Concurrent session registry
pub mod registry;
/// Session drivers and the message handler trait
pub mod session;
/// Transport trait and bindings
pub mod transport;

pub use config::{HttpConfig, PipeCommand, SessionConfig, TransportOptions};
pub use message::{JsonRpcError, Message, MessageKind};
pub use registry::TransportRegistry;
pub use session::{serve, ClientSession, MessageHandler};
pub use transport::callback::{CallbackClientTransport, CallbackServerTransport};
pub use transport::pipe::PipeTransport;
pub use transport::stream::{SseClientTransport, SseServerTransport};
pub use transport::{CloseReason, Inbound, Transport, TransportEvent};
pub use types::{ErrorKind, SessionId, TransportError};
