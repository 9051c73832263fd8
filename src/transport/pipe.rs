// ABOUTME: Newline-delimited JSON-RPC transport over stdio or a spawned child process
// ABOUTME: One reader task per pipe, writes serialized through an async mutex
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{bounded, cancellable, CloseReason, Inbound, Lifecycle, Transport};
use crate::config::{PipeCommand, TransportOptions};
use crate::message::Message;
use crate::process::{spawn_piped, PipedChild};
use crate::types::{ErrorKind, SessionId, TransportError};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// JSON-RPC over a byte pipe, one message per line
///
/// The reader half is consumed by a background task started on `connect`;
/// the writer half sits behind an async mutex so concurrent sends produce
/// whole lines in call order.
pub struct PipeTransport {
    me: Weak<Self>,
    lifecycle: Lifecycle,
    reader: Mutex<Option<BoxedReader>>,
    writer: Mutex<Option<BoxedWriter>>,
    child: Mutex<Option<Child>>,
}

impl PipeTransport {
    /// Create a transport over an arbitrary reader/writer pair
    pub fn new<R, W>(reader: R, writer: W, options: TransportOptions) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(Box::new(reader), Box::new(writer), None, options)
    }

    /// Create a transport over this process's stdin/stdout
    ///
    /// Tokio reads stdin on a blocking thread that cannot be interrupted, so
    /// after the transport closes the runtime will not shut down until the
    /// peer writes another line or closes the pipe. Binaries serving stdio
    /// should exit the process once their session ends.
    pub fn stdio(options: TransportOptions) -> Arc<Self> {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), options)
    }

    /// Spawn a child process and talk to it over its stdin/stdout
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the process cannot be spawned.
    pub fn spawn(command: &PipeCommand, options: TransportOptions) -> Result<Arc<Self>, TransportError> {
        let PipedChild {
            child,
            stdin,
            stdout,
        } = spawn_piped(command)?;
        Ok(Self::build(
            Box::new(stdout),
            Box::new(stdin),
            Some(child),
            options,
        ))
    }

    fn build(
        reader: BoxedReader,
        writer: BoxedWriter,
        child: Option<Child>,
        options: TransportOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            lifecycle: Lifecycle::new(options),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(child),
        })
    }

    /// Run the close sequence once; later callers return immediately
    async fn shutdown(&self, reason: CloseReason, cancel: &CancellationToken) {
        if !self.lifecycle.begin_close() {
            return;
        }
        let close_timeout = self.lifecycle.options().close_timeout;

        if reason.notifies_peer() {
            let notify = bounded(cancel, close_timeout, "disconnect", async {
                let line = Message::disconnect().encode()?;
                let mut writer = self.writer.lock().await;
                write_line(&mut writer, &line).await
            })
            .await;
            if let Err(e) = notify {
                warn!(error = %e, "Pipe disconnect notification failed");
            }
        }

        self.lifecycle.finish_close(reason);

        let released = tokio::time::timeout(close_timeout, async {
            if let Some(mut writer) = self.writer.lock().await.take() {
                let _ = writer.shutdown().await;
            }
            if let Some(mut child) = self.child.lock().await.take() {
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Pipe child already exited");
                }
            }
        })
        .await;
        if released.is_err() {
            warn!("Timed out releasing pipe resources");
        }
    }
}

#[async_trait]
impl Transport for PipeTransport {
    fn session_id(&self) -> Option<SessionId> {
        self.lifecycle.session_id()
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    async fn connect(&self, session_id: SessionId) -> Result<Inbound, TransportError> {
        let reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or_else(|| TransportError::invalid_operation("Transport is already connected"))?;

        let me: Weak<dyn Transport> = self.me.clone();
        let inbound = self.lifecycle.bind(session_id, me)?;

        tokio::spawn(read_loop(
            self.me.clone(),
            reader,
            self.lifecycle.shutdown_token().clone(),
            self.lifecycle.options().max_line_bytes,
        ));
        Ok(inbound)
    }

    async fn send_outgoing(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let session_id = self.lifecycle.ensure_open()?;
        let line = message.encode()?;

        // cancellation only applies while queued; a started line is always finished
        let mut writer = cancellable(cancel, "send", async { Ok(self.writer.lock().await) }).await?;
        if self.lifecycle.is_closed() {
            return Err(TransportError::closed(&session_id));
        }
        write_line(&mut writer, &line).await?;

        debug!(session_id = %session_id, method = message.method().unwrap_or("-"), "Pipe message sent");
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

/// Write one line and flush; a missing writer means the pipe was released
async fn write_line(writer: &mut Option<BoxedWriter>, line: &str) -> Result<(), TransportError> {
    let writer = writer
        .as_mut()
        .ok_or_else(|| TransportError::closed("pipe"))?;

    let mut frame = Vec::with_capacity(line.len() + 1);
    frame.extend_from_slice(line.as_bytes());
    frame.push(b'\n');

    writer.write_all(&frame).await.map_err(map_write_error)?;
    writer.flush().await.map_err(map_write_error)
}

fn map_write_error(e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::BrokenPipe {
        TransportError::peer_unreachable("pipe", e.to_string())
    } else {
        TransportError::io(format!("Pipe write failed: {e}"))
    }
}

/// Decode lines until end of input, a stream error, or shutdown
async fn read_loop(
    me: Weak<PipeTransport>,
    reader: BoxedReader,
    shutdown: CancellationToken,
    max_line_bytes: usize,
) {
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_bytes));

    let reason = loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            next = lines.next() => next,
        };

        let line = match next {
            None => break CloseReason::EndOfStream,
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!(max_line_bytes, "Skipping over-long pipe line");
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) => break CloseReason::Failed(e.to_string()),
        };

        if line.trim().is_empty() {
            continue;
        }
        let message = match Message::decode(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable pipe line");
                continue;
            }
        };

        let Some(transport) = me.upgrade() else {
            return;
        };
        match transport.ingest(message, &shutdown).await {
            Ok(()) => {}
            Err(e) if matches!(e.kind, ErrorKind::Closed | ErrorKind::Cancelled) => return,
            Err(e) => warn!(error = %e, "Pipe ingest failed"),
        }
    };

    if let Some(transport) = me.upgrade() {
        transport.shutdown(reason, &CancellationToken::new()).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::FutureExt;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

    use super::*;
    use crate::transport::TransportEvent;

    struct Peer {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn next_message(&mut self) -> Message {
            let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .expect("line in time")
                .expect("read")
                .expect("line");
            Message::decode(&line).expect("decode")
        }

        async fn write(&mut self, raw: &str) {
            self.writer.write_all(raw.as_bytes()).await.expect("write");
            self.writer.flush().await.expect("flush");
        }
    }

    fn pipe(options: TransportOptions) -> (Arc<PipeTransport>, Peer) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(ours);
        let (peer_reader, peer_writer) = tokio::io::split(theirs);
        let transport = PipeTransport::new(reader, writer, options);
        let peer = Peer {
            lines: BufReader::new(peer_reader).lines(),
            writer: peer_writer,
        };
        (transport, peer)
    }

    async fn next_event(inbound: &mut Inbound) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .expect("event in time")
            .expect("event")
    }

    #[tokio::test]
    async fn send_writes_one_json_line() {
        let (transport, mut peer) = pipe(TransportOptions::default());
        let _inbound = transport.connect(SessionId::from("s1")).await.expect("connect");

        transport
            .send_outgoing(&Message::request(1, "ping", None), &CancellationToken::new())
            .await
            .expect("send");

        let received = peer.next_message().await;
        assert_eq!(received.method(), Some("ping"));
        assert_eq!(received.id, Some(json!(1)));
    }

    #[tokio::test]
    async fn inbound_lines_are_delivered_and_garbage_skipped() {
        let (transport, mut peer) = pipe(TransportOptions::default());
        let mut inbound = transport.connect(SessionId::from("s1")).await.expect("connect");

        peer.write("\n  \n{not json}\n{\"result\":{},\"error\":{\"code\":1,\"message\":\"x\"},\"id\":1}\n")
            .await;
        peer.write("{\"jsonrpc\":\"2.0\",\"method\":\"tools/list\",\"id\":\"a\"}\r\n")
            .await;

        match next_event(&mut inbound).await {
            TransportEvent::Message(msg) => {
                assert_eq!(msg.method(), Some("tools/list"));
                assert_eq!(msg.id, Some(json!("a")));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!transport.is_closed());
    }

    #[tokio::test]
    async fn over_long_line_is_skipped() {
        let (transport, mut peer) = pipe(TransportOptions::default().with_max_line_bytes(64));
        let mut inbound = transport.connect(SessionId::from("s1")).await.expect("connect");

        let long = format!(
            "{{\"method\":\"big\",\"params\":{{\"pad\":\"{}\"}}}}\n",
            "x".repeat(200)
        );
        peer.write(&long).await;
        peer.write("{\"method\":\"small\"}\n").await;

        match next_event(&mut inbound).await {
            TransportEvent::Message(msg) => assert_eq!(msg.method(), Some("small")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_sends_do_not_interleave() {
        let (transport, mut peer) = pipe(TransportOptions::default());
        let _inbound = transport.connect(SessionId::from("s1")).await.expect("connect");

        let count = 50;
        let mut handles = Vec::new();
        for i in 0..count {
            let transport = Arc::clone(&transport);
            handles.push(tokio::spawn(async move {
                let params = json!({"payload": "y".repeat(512 + i)});
                transport
                    .send_outgoing(
                        &Message::request(i, "work", Some(params)),
                        &CancellationToken::new(),
                    )
                    .await
            }));
        }

        let mut ids = Vec::new();
        for _ in 0..count {
            let msg = peer.next_message().await;
            assert_eq!(msg.method(), Some("work"));
            ids.push(msg.id.and_then(|v| v.as_u64()).expect("numeric id"));
        }
        for handle in handles {
            handle.await.expect("task").expect("send");
        }
        ids.sort_unstable();
        assert_eq!(ids, (0..count as u64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn close_notifies_peer_once_and_is_idempotent() {
        let (transport, mut peer) = pipe(TransportOptions::default());
        let mut inbound = transport.connect(SessionId::from("s1")).await.expect("connect");
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(transport.close(&cancel), transport.close(&cancel));
        a.expect("first close");
        b.expect("second close");
        transport.close(&cancel).await.expect("third close");

        assert!(transport.is_closed());
        assert!(peer.next_message().await.is_disconnect());
        assert_eq!(
            next_event(&mut inbound).await,
            TransportEvent::Closed(CloseReason::Local)
        );
        assert!(inbound.recv().now_or_never().is_none());
    }

    #[tokio::test]
    async fn peer_disconnect_closes_without_echo() {
        let (transport, mut peer) = pipe(TransportOptions::default());
        let mut inbound = transport.connect(SessionId::from("s1")).await.expect("connect");

        peer.write("{\"jsonrpc\":\"2.0\",\"method\":\"disconnect\"}\n").await;

        assert_eq!(
            next_event(&mut inbound).await,
            TransportEvent::Closed(CloseReason::PeerDisconnect)
        );
        assert!(transport.is_closed());
        let after = peer.lines.next_line().await.expect("read");
        assert!(after.is_none(), "no disconnect echoed back: {after:?}");
    }

    #[tokio::test]
    async fn misuse_reports_lifecycle_errors() {
        let (transport, _peer) = pipe(TransportOptions::default());
        let cancel = CancellationToken::new();
        let ping = Message::request(1, "ping", None);

        let err = transport.send_outgoing(&ping, &cancel).await.expect_err("unconnected");
        assert_eq!(err.kind, ErrorKind::NotConnected);
        let err = transport.ingest(ping.clone(), &cancel).await.expect_err("unconnected");
        assert_eq!(err.kind, ErrorKind::NotConnected);

        let _inbound = transport.connect(SessionId::from("s1")).await.expect("connect");
        let err = transport
            .connect(SessionId::from("s2"))
            .await
            .expect_err("double connect");
        assert_eq!(err.kind, ErrorKind::InvalidOperation);
        assert_eq!(transport.session_id(), Some(SessionId::from("s1")));

        transport.close(&cancel).await.expect("close");
        let err = transport.send_outgoing(&ping, &cancel).await.expect_err("closed");
        assert_eq!(err.kind, ErrorKind::Closed);
    }

    #[tokio::test]
    async fn connect_after_close_fails() {
        let (transport, _peer) = pipe(TransportOptions::default());
        transport.close(&CancellationToken::new()).await.expect("close");
        let err = transport
            .connect(SessionId::from("late"))
            .await
            .expect_err("closed");
        assert_eq!(err.kind, ErrorKind::Closed);
    }

    #[tokio::test]
    async fn cancelled_send_is_rejected() {
        let (transport, _peer) = pipe(TransportOptions::default());
        let _inbound = transport.connect(SessionId::from("s1")).await.expect("connect");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = transport
            .send_outgoing(&Message::notification("x", None), &cancel)
            .await
            .expect_err("cancelled");
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_child_round_trip() {
        let transport = PipeTransport::spawn(&PipeCommand::new("cat"), TransportOptions::default())
            .expect("spawn cat");
        let mut inbound = transport.connect(SessionId::from("child")).await.expect("connect");

        transport
            .send_outgoing(&Message::request(7, "echo", None), &CancellationToken::new())
            .await
            .expect("send");

        match next_event(&mut inbound).await {
            TransportEvent::Message(msg) => {
                assert_eq!(msg.method(), Some("echo"));
                assert_eq!(msg.id, Some(json!(7)));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        transport.close(&CancellationToken::new()).await.expect("close");
        // cat echoes the disconnect line back, but the reader is already stopped
        assert_eq!(
            next_event(&mut inbound).await,
            TransportEvent::Closed(CloseReason::Local)
        );
    }
}
