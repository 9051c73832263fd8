// ABOUTME: Session drivers that own a transport: server-side dispatch loop and client-side correlation
// ABOUTME: Gates requests on the initialize handshake and matches responses to requests by id
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # Sessions
//!
//! A session is the logical conversation with one peer over exactly one
//! [`Transport`]. [`serve`] drives the server side: it reads the transport's
//! inbound events, enforces the `initialize` handshake and hands requests to a
//! [`MessageHandler`]. [`ClientSession`] drives the client side: it allocates
//! request ids and resolves each response to the caller that is waiting for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::message::{Message, MessageKind, INVALID_REQUEST, METHOD_NOT_FOUND};
use crate::transport::{cancellable, CloseReason, Inbound, Transport, TransportEvent};
use crate::types::TransportError;

/// Handshake request that opens a session
pub const INITIALIZE_METHOD: &str = "initialize";

/// Liveness request answered before and after the handshake
pub const PING_METHOD: &str = "ping";

/// Notification a client sends once it has processed the initialize result
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

/// Processes decoded messages for a session
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one request or notification
    ///
    /// Returns the response to send back, or `None` when there is nothing to
    /// send (notifications).
    async fn handle(&self, message: Message) -> Option<Message>;
}

// ============================================================================
// Server-side Driver
// ============================================================================

/// Drive a server-side session until its transport closes
///
/// Cancelling `cancel` closes the transport; the function still waits for the
/// resulting `Closed` event and returns its reason.
pub async fn serve(
    transport: Arc<dyn Transport>,
    mut inbound: Inbound,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) -> CloseReason {
    let session_id = transport
        .session_id()
        .map_or_else(|| "-".to_owned(), |id| id.to_string());
    info!(session_id = %session_id, "Session started");

    let mut initialized = false;
    let mut closing = false;
    let mut in_flight = JoinSet::new();

    let reason = loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled(), if !closing => {
                closing = true;
                if let Err(e) = transport.close(&CancellationToken::new()).await {
                    warn!(session_id = %session_id, error = %e, "Session close failed");
                }
                continue;
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => continue,
            event = inbound.recv() => event,
        };

        let message = match event {
            Some(TransportEvent::Message(message)) => message,
            Some(TransportEvent::Closed(reason)) => break reason,
            None => break CloseReason::Local,
        };

        match message.kind() {
            MessageKind::Response => {
                debug!(session_id = %session_id, id = ?message.id, "Dropping response from peer");
            }
            MessageKind::Notification if !initialized => {
                debug!(
                    session_id = %session_id,
                    method = message.method().unwrap_or("-"),
                    "Ignoring notification before initialize"
                );
            }
            MessageKind::Notification => {
                let handler = Arc::clone(&handler);
                in_flight.spawn(async move {
                    handler.handle(message).await;
                });
            }
            MessageKind::Request if message.method() == Some(INITIALIZE_METHOD) => {
                let reply = handler.handle(message).await;
                if let Some(reply) = reply {
                    initialized |= reply.error.is_none();
                    reply_to_peer(transport.as_ref(), &reply, &cancel, &session_id).await;
                }
            }
            MessageKind::Request if !initialized && message.method() != Some(PING_METHOD) => {
                let reply = Message::error(message.id, INVALID_REQUEST, "session not initialized");
                reply_to_peer(transport.as_ref(), &reply, &cancel, &session_id).await;
            }
            MessageKind::Request => {
                let handler = Arc::clone(&handler);
                let transport = Arc::clone(&transport);
                let cancel = cancel.clone();
                let session_id = session_id.clone();
                in_flight.spawn(async move {
                    if let Some(reply) = handler.handle(message).await {
                        reply_to_peer(transport.as_ref(), &reply, &cancel, &session_id).await;
                    }
                });
            }
        }
    };

    in_flight.shutdown().await;
    info!(session_id = %session_id, reason = %reason, "Session ended");
    reason
}

async fn reply_to_peer(
    transport: &dyn Transport,
    reply: &Message,
    cancel: &CancellationToken,
    session_id: &str,
) {
    if let Err(e) = transport.send_outgoing(reply, cancel).await {
        warn!(session_id, id = ?reply.id, error = %e, "Failed to send response");
    }
}

// ============================================================================
// Client-side Driver
// ============================================================================

type PendingMap = DashMap<String, oneshot::Sender<Message>>;

/// Client end of a session, correlating responses to requests by id
pub struct ClientSession {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    closed: watch::Receiver<Option<CloseReason>>,
    cancel: CancellationToken,
}

impl ClientSession {
    /// Start reading `inbound` and return the session handle
    ///
    /// Starts keepalive pings when the config enables them. Cancelling
    /// `cancel` closes the transport and fails every pending request.
    pub fn start(
        transport: Arc<dyn Transport>,
        inbound: Inbound,
        config: SessionConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let pending = Arc::new(PendingMap::new());
        let (closed_tx, closed_rx) = watch::channel(None);

        tokio::spawn(client_read_loop(
            Arc::clone(&transport),
            inbound,
            Arc::clone(&pending),
            closed_tx,
            cancel.clone(),
        ));

        let keepalive = config.keepalive_interval;
        let session = Arc::new(Self {
            transport,
            config,
            pending,
            next_id: AtomicU64::new(1),
            closed: closed_rx,
            cancel,
        });
        if let Some(interval) = keepalive {
            session.spawn_keepalive(interval);
        }
        session
    }

    /// Send a request and wait for its result
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the peer answered with an error object, `Timeout`
    /// after the configured request timeout, `Closed` if the transport closed
    /// first, or the transport's send error.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = Value::from(id).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(key.clone(), tx);

        let result = self.exchange(id, method, params, rx).await;
        self.pending.remove(&key);
        let reply = result?;

        match reply.error {
            Some(error) => Err(TransportError::protocol(error.code, error.message)),
            None => Ok(reply.result.unwrap_or(Value::Null)),
        }
    }

    async fn exchange(
        &self,
        id: u64,
        method: &str,
        params: Option<Value>,
        rx: oneshot::Receiver<Message>,
    ) -> Result<Message, TransportError> {
        if self.close_reason().is_some() {
            return Err(self.closed_error());
        }

        let request = Message::request(id, method, params);
        self.transport.send_outgoing(&request, &self.cancel).await?;

        let timeout = self.config.request_timeout;
        cancellable(&self.cancel, method, async {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(_)) => Err(self.closed_error()),
                Err(_) => Err(TransportError::timeout(format!(
                    "No response to {method} (id {id}) within {timeout:?}"
                ))),
            }
        })
        .await
    }

    /// Send a notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        self.transport
            .send_outgoing(&Message::notification(method, params), &self.cancel)
            .await
    }

    /// Perform the handshake: `initialize`, then `notifications/initialized`
    pub async fn initialize(&self, params: Value) -> Result<Value, TransportError> {
        let result = self.request(INITIALIZE_METHOD, Some(params)).await?;
        self.notify(INITIALIZED_NOTIFICATION, None).await?;
        Ok(result)
    }

    /// Round-trip a `ping`
    pub async fn ping(&self) -> Result<(), TransportError> {
        self.request(PING_METHOD, None).await.map(drop)
    }

    /// Ping every `interval`; the first failure closes the transport
    ///
    /// A callback peer that vanished never posts again, so a failed ping is
    /// the only way to notice it.
    pub fn spawn_keepalive(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let session = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let mut closed = self.closed.clone();
        tokio::spawn(keepalive_loop(session, interval, cancel, async move {
            let _ = closed.wait_for(Option::is_some).await;
        }))
    }

    /// Close the underlying transport
    pub async fn close(&self) -> Result<(), TransportError> {
        self.transport.close(&CancellationToken::new()).await
    }

    /// Why the transport closed, if it has
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed.borrow().clone()
    }

    /// Wait until the transport closes
    pub async fn wait_closed(&self) -> CloseReason {
        let mut closed = self.closed.clone();
        let reason = closed
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|r| r.clone());
        reason.unwrap_or(CloseReason::Local)
    }

    /// Transport this session owns
    pub const fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn closed_error(&self) -> TransportError {
        let session = self
            .transport
            .session_id()
            .map_or_else(|| "-".to_owned(), |id| id.to_string());
        TransportError::closed(session)
    }
}

async fn client_read_loop(
    transport: Arc<dyn Transport>,
    mut inbound: Inbound,
    pending: Arc<PendingMap>,
    closed: watch::Sender<Option<CloseReason>>,
    cancel: CancellationToken,
) {
    let mut closing = false;

    let reason = loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled(), if !closing => {
                closing = true;
                if let Err(e) = transport.close(&CancellationToken::new()).await {
                    warn!(error = %e, "Client session close failed");
                }
                continue;
            }
            event = inbound.recv() => event,
        };

        let message = match event {
            Some(TransportEvent::Message(message)) => message,
            Some(TransportEvent::Closed(reason)) => break reason,
            None => break CloseReason::Local,
        };

        match message.kind() {
            MessageKind::Response => {
                let key = message.id.as_ref().map(Value::to_string).unwrap_or_default();
                match pending.remove(&key) {
                    Some((_, waiter)) => {
                        let _ = waiter.send(message);
                    }
                    None => debug!(id = %key, "Dropping unmatched response"),
                }
            }
            MessageKind::Request => {
                let reply = if message.method() == Some(PING_METHOD) {
                    Message::success(message.id, json!({}))
                } else {
                    let method = message.method().unwrap_or_default().to_owned();
                    Message::error(message.id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
                };
                let transport = Arc::clone(&transport);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = transport.send_outgoing(&reply, &cancel).await {
                        debug!(error = %e, "Failed to answer server request");
                    }
                });
            }
            MessageKind::Notification => {
                debug!(method = message.method().unwrap_or("-"), "Server notification");
            }
        }
    };

    closed.send_replace(Some(reason));
    pending.clear();
}

async fn keepalive_loop(
    session: Weak<ClientSession>,
    interval: Duration,
    cancel: CancellationToken,
    closed: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(closed);
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = &mut closed => return,
            _ = ticker.tick() => {}
        }

        let Some(session) = session.upgrade() else {
            return;
        };
        if let Err(e) = session.ping().await {
            warn!(error = %e, "Keepalive ping failed, closing transport");
            if let Err(e) = session.close().await {
                debug!(error = %e, "Keepalive close failed");
            }
            return;
        }
    }
}
