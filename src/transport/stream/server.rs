// ABOUTME: Server half of the SSE binding, feeding one HTTP response stream per session
// ABOUTME: Outbound messages become SSE frames; inbound messages arrive through ingest
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::response::sse::Event;
use futures::Stream;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use super::{CLOSE_EVENT, ENDPOINT_EVENT, MESSAGE_EVENT};
use crate::config::TransportOptions;
use crate::message::Message;
use crate::transport::{bounded, cancellable, CloseReason, Inbound, Lifecycle, Transport};
use crate::types::{SessionId, TransportError};

/// Frames buffered between senders and the HTTP response
const FRAME_BUFFER: usize = 64;

/// One frame queued for the SSE response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// POST URL announced right after connect
    Endpoint(String),
    /// Serialized JSON-RPC message
    Message(String),
    /// Final frame before the stream ends, carrying the disconnect notification
    Close(String),
}

impl SseFrame {
    /// Render as an axum SSE event
    pub fn into_event(self) -> Event {
        match self {
            Self::Endpoint(url) => Event::default().event(ENDPOINT_EVENT).data(url),
            Self::Message(json) => Event::default().event(MESSAGE_EVENT).data(json),
            Self::Close(json) => Event::default().event(CLOSE_EVENT).data(json),
        }
    }
}

/// Response body half of an [`SseServerTransport`]
///
/// Dropping it (the HTTP client went away) closes the transport with
/// `PeerDisconnect`.
pub struct SseEventStream {
    frames: ReceiverStream<SseFrame>,
    _peer_gone: DropGuard,
}

impl Stream for SseEventStream {
    type Item = SseFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames).poll_next(cx)
    }
}

/// Server side of the SSE binding
pub struct SseServerTransport {
    me: Weak<Self>,
    lifecycle: Lifecycle,
    endpoint: String,
    frames: Mutex<Option<mpsc::Sender<SseFrame>>>,
    send_lock: Mutex<()>,
}

impl SseServerTransport {
    /// Create a transport and the event stream to return as the GET response
    ///
    /// `endpoint` is announced to the peer on connect. Must be called from
    /// within a Tokio runtime.
    pub fn new(endpoint: impl Into<String>, options: TransportOptions) -> (Arc<Self>, SseEventStream) {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let transport = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            lifecycle: Lifecycle::new(options),
            endpoint: endpoint.into(),
            frames: Mutex::new(Some(tx)),
            send_lock: Mutex::new(()),
        });

        let peer_gone = CancellationToken::new();
        tokio::spawn(watch_peer(
            Arc::downgrade(&transport),
            peer_gone.clone(),
            transport.lifecycle.shutdown_token().clone(),
        ));

        let stream = SseEventStream {
            frames: ReceiverStream::new(rx),
            _peer_gone: peer_gone.drop_guard(),
        };
        (transport, stream)
    }

    /// URL announced in the `endpoint` event
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Clone the frame sender; the lock is never held across a send
    async fn sender(&self) -> Result<mpsc::Sender<SseFrame>, TransportError> {
        self.frames
            .lock()
            .await
            .clone()
            .ok_or_else(|| TransportError::closed(&self.endpoint))
    }

    /// Queue one frame, giving up once shutdown begins
    ///
    /// A peer that stops reading fills the buffer; shutdown must still be
    /// able to release every blocked sender.
    async fn queue(&self, frame: SseFrame) -> Result<(), TransportError> {
        let sender = self.sender().await?;
        tokio::select! {
            biased;
            () = self.lifecycle.shutdown_token().cancelled() => Err(TransportError::closed(&self.endpoint)),
            sent = sender.send(frame) => sent.map_err(|_| self.stream_dropped()),
        }
    }

    fn stream_dropped(&self) -> TransportError {
        TransportError::peer_unreachable(&self.endpoint, "SSE response stream dropped")
    }

    async fn shutdown(&self, reason: CloseReason, cancel: &CancellationToken) {
        if !self.lifecycle.begin_close() {
            return;
        }

        if reason.notifies_peer() {
            let close_timeout = self.lifecycle.options().close_timeout;
            let notify = bounded(cancel, close_timeout, "disconnect", async {
                let _ordered = self.send_lock.lock().await;
                let data = Message::disconnect().encode()?;
                let sender = self.sender().await?;
                sender
                    .send(SseFrame::Close(data))
                    .await
                    .map_err(|_| self.stream_dropped())
            })
            .await;
            if let Err(e) = notify {
                debug!(error = %e, "SSE close frame not delivered");
            }
        }

        self.lifecycle.finish_close(reason);
        // the stream ends once the last sender clone is gone
        self.frames.lock().await.take();
    }
}

#[async_trait]
impl Transport for SseServerTransport {
    fn session_id(&self) -> Option<SessionId> {
        self.lifecycle.session_id()
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    async fn connect(&self, session_id: SessionId) -> Result<Inbound, TransportError> {
        let me: Weak<dyn Transport> = self.me.clone();
        let inbound = self.lifecycle.bind(session_id, me)?;
        self.queue(SseFrame::Endpoint(self.endpoint.clone())).await?;
        Ok(inbound)
    }

    async fn send_outgoing(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let session_id = self.lifecycle.ensure_open()?;
        let data = message.encode()?;

        cancellable(cancel, "send", async {
            let _ordered = self.send_lock.lock().await;
            if self.lifecycle.is_closed() {
                return Err(TransportError::closed(&session_id));
            }
            self.queue(SseFrame::Message(data)).await
        })
        .await?;

        debug!(session_id = %session_id, method = message.method().unwrap_or("-"), "SSE message queued");
        Ok(())
    }

    async fn ingest(&self, message: Message, cancel: &CancellationToken) -> Result<(), TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::cancelled("ingest"));
        }
        self.lifecycle.ensure_open()?;

        if message.is_disconnect() {
            self.shutdown(CloseReason::PeerDisconnect, cancel).await;
            return Ok(());
        }
        self.lifecycle.deliver(message)
    }

    async fn close(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        self.shutdown(CloseReason::Local, cancel).await;
        Ok(())
    }
}

/// Close the transport once the response stream is dropped by the HTTP layer
async fn watch_peer(
    transport: Weak<SseServerTransport>,
    peer_gone: CancellationToken,
    shutdown: CancellationToken,
) {
    tokio::select! {
        () = shutdown.cancelled() => {}
        () = peer_gone.cancelled() => {
            if let Some(transport) = transport.upgrade() {
                warn!(endpoint = %transport.endpoint, "SSE client went away");
                transport
                    .shutdown(CloseReason::PeerDisconnect, &CancellationToken::new())
                    .await;
            }
        }
    }
}
