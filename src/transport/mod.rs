// ABOUTME: Transport abstraction shared by the pipe, stream (SSE) and callback bindings
// ABOUTME: Defines the Transport trait, inbound event channel and cancellation helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

pub mod callback;
mod lifecycle;
pub mod pipe;
pub mod stream;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::message::Message;
use crate::types::{SessionId, TransportError};

pub(crate) use lifecycle::Lifecycle;

/// Transport layer for MCP JSON-RPC message exchange
///
/// Implementations move messages over one physical binding (a pipe, an SSE
/// stream, or a pair of HTTP callback channels). Inbound messages are pushed
/// onto the channel returned by [`connect`](Transport::connect) rather than
/// handed to a callback, so a session replying from inside its receive loop
/// can never re-enter the transport's reader.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Session this transport is bound to (None before `connect`)
    fn session_id(&self) -> Option<SessionId>;

    /// Whether the transport has closed; never reverts to false
    fn is_closed(&self) -> bool;

    /// Bind to a session id and start receiving
    ///
    /// Must be called exactly once. Transports built with a registry add
    /// themselves to it here.
    async fn connect(&self, session_id: SessionId) -> Result<Inbound, TransportError>;

    /// Serialize and transmit one message to the peer
    ///
    /// Concurrent callers are serialized so frames never interleave and
    /// messages reach the peer in send order.
    async fn send_outgoing(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;

    /// Deliver one message received from the peer to the bound session
    ///
    /// A `disconnect` notification closes the transport instead.
    async fn ingest(&self, message: Message, cancel: &CancellationToken)
        -> Result<(), TransportError>;

    /// Close the transport; later calls are no-ops
    async fn close(&self, cancel: &CancellationToken) -> Result<(), TransportError>;
}

// ============================================================================
// Inbound Events
// ============================================================================

/// Why a transport closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by local request or cancellation
    Local,
    /// Peer sent a disconnect notification or dropped its connection
    PeerDisconnect,
    /// Input stream reached end of file
    EndOfStream,
    /// Underlying I/O failed
    Failed(String),
}

impl CloseReason {
    /// Whether the peer should be told about this close
    pub const fn notifies_peer(&self) -> bool {
        !matches!(self, Self::PeerDisconnect)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::PeerDisconnect => write!(f, "peer_disconnect"),
            Self::EndOfStream => write!(f, "end_of_stream"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Item delivered to the session that owns a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One decoded message from the peer
    Message(Message),
    /// The transport closed; emitted exactly once, always last
    Closed(CloseReason),
}

/// Receiving half handed out by [`Transport::connect`]
#[derive(Debug)]
pub struct Inbound {
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Inbound {
    pub(crate) const fn new(events: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self { events }
    }

    /// Wait for the next event; None once the transport is gone
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// Run `operation` unless `cancel` fires first
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    what: &str,
    operation: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(TransportError::cancelled(what)),
        result = operation => result,
    }
}

/// Run a best-effort shutdown step bounded by `limit` and `cancel`
pub(crate) async fn bounded<T>(
    cancel: &CancellationToken,
    limit: Duration,
    what: &str,
    operation: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    cancellable(cancel, what, async {
        tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| TransportError::timeout(format!("{what} timed out after {limit:?}")))?
    })
    .await
}

/// POST a JSON body and require a 2xx status
pub(crate) async fn post_json<B: serde::Serialize + Sync>(
    client: &reqwest::Client,
    url: &reqwest::Url,
    body: &B,
) -> Result<reqwest::Response, TransportError> {
    let response = client
        .post(url.clone())
        .json(body)
        .send()
        .await
        .map_err(|e| TransportError::peer_unreachable(url.as_str(), e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::peer_unreachable(
            url.as_str(),
            format!("HTTP {status}"),
        ));
    }
    Ok(response)
}
