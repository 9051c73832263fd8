// ABOUTME: Server half of the callback binding, posting every outbound message to the client's URL
// ABOUTME: No background task; inbound envelopes are routed here by the HTTP layer via ingest
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TransportOptions;
use crate::message::Message;
use crate::transport::{
    bounded, cancellable, post_json, CloseReason, Inbound, Lifecycle, Transport,
};
use crate::types::{SessionId, TransportError};

/// Server side of the callback binding
///
/// Delivery confirmation is the callback's HTTP status only. Failed posts
/// are returned to the sender and never retried.
pub struct CallbackServerTransport {
    me: Weak<Self>,
    lifecycle: Lifecycle,
    callback_url: Url,
    client: reqwest::Client,
    send_lock: Mutex<()>,
}

impl CallbackServerTransport {
    /// Create a transport posting to the client-supplied `callback_url`
    pub fn new(callback_url: Url, client: reqwest::Client, options: TransportOptions) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            lifecycle: Lifecycle::new(options),
            callback_url,
            client,
            send_lock: Mutex::new(()),
        })
    }

    /// URL outbound messages are posted to
    pub const fn callback_url(&self) -> &Url {
        &self.callback_url
    }

    async fn shutdown(&self, reason: CloseReason, cancel: &CancellationToken) {
        if !self.lifecycle.begin_close() {
            return;
        }

        if reason.notifies_peer() {
            let close_timeout = self.lifecycle.options().close_timeout;
            let notify = bounded(cancel, close_timeout, "disconnect", async {
                let _ordered = self.send_lock.lock().await;
                post_json(&self.client, &self.callback_url, &Message::disconnect())
                    .await
                    .map(drop)
            })
            .await;
            if let Err(e) = notify {
                warn!(callback_url = %self.callback_url, error = %e, "Callback disconnect notification failed");
            }
        }

        self.lifecycle.finish_close(reason);
    }
}

#[async_trait]
impl Transport for CallbackServerTransport {
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
            post_json(&self.client, &self.callback_url, message).await.map(drop)
        })
        .await?;

        debug!(session_id = %session_id, method = message.method().unwrap_or("-"), "Callback message posted");
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use super::*;
    use crate::transport::TransportEvent;
    use crate::types::ErrorKind;

    /// Start a receiver that records every body posted to `/cb/{id}`
    async fn receiver(status: StatusCode) -> (Url, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/cb/{id}",
            post(move |Json(body): Json<Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body);
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move { axum::serve(listener, app).await });
        let url = Url::parse(&format!("http://{addr}/cb/s1")).expect("url");
        (url, rx)
    }

    async fn next_body(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("post in time")
            .expect("body")
    }

    #[tokio::test]
    async fn send_posts_message_to_callback_url() {
        let (url, mut bodies) = receiver(StatusCode::OK).await;
        let transport = CallbackServerTransport::new(url, reqwest::Client::new(), TransportOptions::default());
        let _inbound = transport.connect(SessionId::from("s1")).await.expect("connect");

        transport
            .send_outgoing(
                &Message::success(Some(json!(1)), json!({"ok": true})),
                &CancellationToken::new(),
            )
            .await
            .expect("send");

        let body = next_body(&mut bodies).await;
        assert_eq!(body["id"], json!(1));
        assert_eq!(body["result"]["ok"], json!(true));
    }

    #[tokio::test]
    async fn close_posts_exactly_one_disconnect() {
        let (url, mut bodies) = receiver(StatusCode::OK).await;
        let transport = CallbackServerTransport::new(url, reqwest::Client::new(), TransportOptions::default());
        let mut inbound = transport.connect(SessionId::from("s1")).await.expect("connect");
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(transport.close(&cancel), transport.close(&cancel));
        a.expect("close");
        b.expect("close");

        let body = next_body(&mut bodies).await;
        let message: Message = serde_json::from_value(body).expect("message");
        assert!(message.is_disconnect());
        assert_eq!(
            inbound.recv().await,
            Some(TransportEvent::Closed(CloseReason::Local))
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(bodies.try_recv().is_err(), "only one disconnect post");
    }

    #[tokio::test]
    async fn disconnect_waits_for_in_flight_send() {
        // regular posts are recorded late, so a disconnect that skipped the
        // queue would be recorded first
        let (tx, mut bodies) = mpsc::unbounded_channel::<Value>();
        let app = Router::new().route(
            "/cb/{id}",
            post(move |Json(body): Json<Value>| {
                let tx = tx.clone();
                async move {
                    if body["method"] != "disconnect" {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    let _ = tx.send(body);
                    StatusCode::OK
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move { axum::serve(listener, app).await });

        let transport = CallbackServerTransport::new(
            Url::parse(&format!("http://{addr}/cb/s1")).expect("url"),
            reqwest::Client::new(),
            TransportOptions::default(),
        );
        let _inbound = transport.connect(SessionId::from("s1")).await.expect("connect");

        let in_flight = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move {
                transport
                    .send_outgoing(
                        &Message::notification("notifications/progress", None),
                        &CancellationToken::new(),
                    )
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        transport.close(&CancellationToken::new()).await.expect("close");
        in_flight.await.expect("task").expect("send");

        let first = next_body(&mut bodies).await;
        assert_eq!(first["method"], "notifications/progress");
        let second = next_body(&mut bodies).await;
        assert_eq!(second["method"], "disconnect");
    }

    #[tokio::test]
    async fn rejected_post_is_peer_unreachable() {
        let (url, _bodies) = receiver(StatusCode::NOT_FOUND).await;
        let transport = CallbackServerTransport::new(url, reqwest::Client::new(), TransportOptions::default());
        let _inbound = transport.connect(SessionId::from("s1")).await.expect("connect");

        let err = transport
            .send_outgoing(&Message::notification("x", None), &CancellationToken::new())
            .await
            .expect_err("404");
        assert_eq!(err.kind, ErrorKind::PeerUnreachable);
        assert!(!transport.is_closed());
    }

    #[tokio::test]
    async fn peer_disconnect_does_not_post_back() {
        let (url, mut bodies) = receiver(StatusCode::OK).await;
        let transport = CallbackServerTransport::new(url, reqwest::Client::new(), TransportOptions::default());
        let mut inbound = transport.connect(SessionId::from("s1")).await.expect("connect");

        transport
            .ingest(Message::disconnect(), &CancellationToken::new())
            .await
            .expect("ingest");

        assert_eq!(
            inbound.recv().await,
            Some(TransportEvent::Closed(CloseReason::PeerDisconnect))
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(bodies.try_recv().is_err());
    }
}
