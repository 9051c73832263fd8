// ABOUTME: Client half of the SSE binding: GET event stream, POST messages to the announced endpoint
// ABOUTME: Discovers the endpoint within the connect timeout, then runs a single frame reader task
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Url;
use tokio::sync::Mutex;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::frame::SseReader;
use super::{CLOSE_EVENT, ENDPOINT_EVENT, MESSAGE_EVENT};
use crate::config::TransportOptions;
use crate::message::Message;
use crate::transport::{
    bounded, cancellable, post_json, CloseReason, Inbound, Lifecycle, Transport,
};
use crate::types::{ErrorKind, SessionId, TransportError};

type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;
type EventReader = SseReader<StreamReader<ByteStream, Bytes>>;

/// Client side of the SSE binding
pub struct SseClientTransport {
    me: Weak<Self>,
    lifecycle: Lifecycle,
    url: Url,
    client: reqwest::Client,
    endpoint: OnceLock<Url>,
    send_lock: Mutex<()>,
}

impl SseClientTransport {
    /// Create a transport that will open its event stream at `url`
    pub fn new(url: Url, client: reqwest::Client, options: TransportOptions) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            lifecycle: Lifecycle::new(options),
            url,
            client,
            endpoint: OnceLock::new(),
            send_lock: Mutex::new(()),
        })
    }

    /// Message endpoint announced by the server, once connected
    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.get()
    }

    /// Open the event stream and wait for the `endpoint` event
    async fn dial(&self) -> Result<(EventReader, Url), TransportError> {
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| TransportError::peer_unreachable(self.url.as_str(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::peer_unreachable(
                self.url.as_str(),
                format!("HTTP {status}"),
            ));
        }

        let bytes: ByteStream = Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other)));
        let mut events = SseReader::new(StreamReader::new(bytes));

        loop {
            let event = events
                .next_event()
                .await
                .map_err(|e| TransportError::io(format!("SSE stream read failed: {e}")))?
                .ok_or_else(|| {
                    TransportError::peer_unreachable(self.url.as_str(), "stream ended before endpoint event")
                })?;

            if event.event == ENDPOINT_EVENT {
                let endpoint = self.url.join(event.data.trim()).map_err(|e| {
                    TransportError::decode(format!("Invalid endpoint {:?}: {e}", event.data))
                })?;
                return Ok((events, endpoint));
            }
            debug!(event = %event.event, "Ignoring SSE event before endpoint");
        }
    }

    async fn shutdown(&self, reason: CloseReason, cancel: &CancellationToken) {
        if !self.lifecycle.begin_close() {
            return;
        }

        if let (true, Some(endpoint)) = (reason.notifies_peer(), self.endpoint.get()) {
            let close_timeout = self.lifecycle.options().close_timeout;
            let notify = bounded(cancel, close_timeout, "disconnect", async {
                let _ordered = self.send_lock.lock().await;
                post_json(&self.client, endpoint, &Message::disconnect()).await.map(drop)
            })
            .await;
            if let Err(e) = notify {
                warn!(endpoint = %endpoint, error = %e, "SSE disconnect notification failed");
            }
        }

        self.lifecycle.finish_close(reason);
    }
}

#[async_trait]
impl Transport for SseClientTransport {
    fn session_id(&self) -> Option<SessionId> {
        self.lifecycle.session_id()
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    async fn connect(&self, session_id: SessionId) -> Result<Inbound, TransportError> {
        let me: Weak<dyn Transport> = self.me.clone();
        let inbound = self.lifecycle.bind(session_id, me)?;

        let connect_timeout = self.lifecycle.options().connect_timeout;
        let dialed = tokio::time::timeout(connect_timeout, self.dial())
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::timeout(format!(
                    "No endpoint event from {} within {connect_timeout:?}",
                    self.url
                )))
            });

        let (events, endpoint) = match dialed {
            Ok(dialed) => dialed,
            Err(e) => {
                self.shutdown(CloseReason::Failed(e.message.clone()), &CancellationToken::new())
                    .await;
                return Err(e);
            }
        };

        debug!(url = %self.url, endpoint = %endpoint, "SSE endpoint discovered");
        let _ = self.endpoint.set(endpoint);
        tokio::spawn(read_loop(
            self.me.clone(),
            events,
            self.lifecycle.shutdown_token().clone(),
        ));
        Ok(inbound)
    }

    async fn send_outgoing(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let session_id = self.lifecycle.ensure_open()?;
        let endpoint = self.endpoint.get().ok_or_else(TransportError::not_connected)?;

        cancellable(cancel, "send", async {
            let _ordered = self.send_lock.lock().await;
            if self.lifecycle.is_closed() {
                return Err(TransportError::closed(&session_id));
            }
            post_json(&self.client, endpoint, message).await.map(drop)
        })
        .await?;

        debug!(session_id = %session_id, method = message.method().unwrap_or("-"), "SSE message posted");
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

/// Deliver `message` events until the stream ends, a `close` event, or shutdown
async fn read_loop(me: Weak<SseClientTransport>, mut events: EventReader, shutdown: CancellationToken) {
    let reason = loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            next = events.next_event() => next,
        };

        let event = match next {
            Ok(Some(event)) => event,
            Ok(None) => break CloseReason::EndOfStream,
            Err(e) => break CloseReason::Failed(e.to_string()),
        };

        match event.event.as_str() {
            MESSAGE_EVENT => {}
            CLOSE_EVENT => break CloseReason::PeerDisconnect,
            other => {
                debug!(event = other, "Ignoring SSE event");
                continue;
            }
        }

        let message = match Message::decode(&event.data) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable SSE message");
                continue;
            }
        };

        let Some(transport) = me.upgrade() else {
            return;
        };
        match transport.ingest(message, &shutdown).await {
            Ok(()) => {}
            Err(e) if matches!(e.kind, ErrorKind::Closed | ErrorKind::Cancelled) => return,
            Err(e) => warn!(error = %e, "SSE ingest failed"),
        }
    };

    if let Some(transport) = me.upgrade() {
        transport.shutdown(reason, &CancellationToken::new()).await;
    }
}
