// ABOUTME: Client half of the callback binding, posting envelopes to a fixed server URL
// ABOUTME: Learns the server session id on first contact and receives replies on its own callback route
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CallbackAccepted, CallbackEnvelope};
use crate::config::TransportOptions;
use crate::message::Message;
use crate::transport::{
    bounded, cancellable, post_json, CloseReason, Inbound, Lifecycle, Transport,
};
use crate::types::{SessionId, TransportError};

/// Client side of the callback binding
///
/// Its callback URL is `<callback_base>/<client session id>`; serve
/// [`callback_receiver_routes`](crate::http::callback_receiver_routes) on the
/// same registry so server posts find their way back here.
pub struct CallbackClientTransport {
    me: Weak<Self>,
    lifecycle: Lifecycle,
    server_url: Url,
    callback_base: String,
    client: reqwest::Client,
    server_session: OnceLock<SessionId>,
    send_lock: Mutex<()>,
}

impl CallbackClientTransport {
    /// Create a transport posting to `server_url` and receiving under `callback_base`
    pub fn new(
        server_url: Url,
        callback_base: impl Into<String>,
        client: reqwest::Client,
        options: TransportOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            lifecycle: Lifecycle::new(options),
            server_url,
            callback_base: callback_base.into().trim_end_matches('/').to_owned(),
            client,
            server_session: OnceLock::new(),
            send_lock: Mutex::new(()),
        })
    }

    /// URL the server posts to, once connected
    pub fn callback_url(&self) -> Option<String> {
        self.lifecycle
            .session_id()
            .map(|id| format!("{}/{id}", self.callback_base))
    }

    /// Session id assigned by the server on first contact
    pub fn server_session(&self) -> Option<&SessionId> {
        self.server_session.get()
    }

    /// Post one envelope, performing first contact if no server session is known yet
    async fn post_envelope(&self, message: &Message) -> Result<(), TransportError> {
        if let Some(server_session) = self.server_session.get() {
            let envelope = CallbackEnvelope {
                session_id: Some(server_session.clone()),
                callback_url: None,
                message: message.clone(),
            };
            return post_json(&self.client, &self.server_url, &envelope).await.map(drop);
        }

        let envelope = CallbackEnvelope {
            session_id: None,
            callback_url: self.callback_url(),
            message: message.clone(),
        };
        let response = post_json(&self.client, &self.server_url, &envelope).await?;
        let accepted: CallbackAccepted = response.json().await.map_err(|e| {
            TransportError::decode(format!("Invalid first-contact reply from {}: {e}", self.server_url))
        })?;

        info!(server_session = %accepted.session_id, "Callback session established");
        let _ = self.server_session.set(accepted.session_id);
        Ok(())
    }

    async fn shutdown(&self, reason: CloseReason, cancel: &CancellationToken) {
        if !self.lifecycle.begin_close() {
            return;
        }

        if reason.notifies_peer() {
            let close_timeout = self.lifecycle.options().close_timeout;
            let notify = bounded(cancel, close_timeout, "disconnect", async {
                // an in-flight first contact may still assign the server session
                let _ordered = self.send_lock.lock().await;
                let Some(server_session) = self.server_session.get() else {
                    return Ok(());
                };
                let envelope = CallbackEnvelope {
                    session_id: Some(server_session.clone()),
                    callback_url: None,
                    message: Message::disconnect(),
                };
                post_json(&self.client, &self.server_url, &envelope).await.map(drop)
            })
            .await;
            if let Err(e) = notify {
                warn!(server_url = %self.server_url, error = %e, "Callback disconnect notification failed");
            }
        }

        self.lifecycle.finish_close(reason);
    }
}

#[async_trait]
impl Transport for CallbackClientTransport {
    fn session_id(&self) -> Option<SessionId> {
        self.lifecycle.session_id()
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    async fn connect(&self, session_id: SessionId) -> Result<Inbound, TransportError> {
        let me: Weak<dyn Transport> = self.me.clone();
        self.lifecycle.bind(session_id, me)
    }

    async fn send_outgoing(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let session_id = self.lifecycle.ensure_open()?;

        cancellable(cancel, "send", async {
            let _ordered = self.send_lock.lock().await;
            if self.lifecycle.is_closed() {
                return Err(TransportError::closed(&session_id));
            }
            self.post_envelope(message).await
        })
        .await?;

        debug!(session_id = %session_id, method = message.method().unwrap_or("-"), "Callback envelope posted");
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
