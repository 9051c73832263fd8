// ABOUTME: Shared connect/close state machine composed into every transport binding
// ABOUTME: Owns the session binding, closed flag, inbound channel and registry bookkeeping
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{OnceLock, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{CloseReason, Inbound, Transport, TransportEvent};
use crate::config::TransportOptions;
use crate::message::Message;
use crate::types::{SessionId, TransportError};

struct Binding {
    session_id: SessionId,
    events: mpsc::UnboundedSender<TransportEvent>,
    transport: Weak<dyn Transport>,
}

/// Connect/close bookkeeping shared by the pipe, stream and callback bindings
///
/// `closed` flips exactly once through a compare-and-swap; whoever wins
/// `begin_close` owns the rest of the shutdown and is the only caller of
/// `finish_close`, which is what makes the `Closed` event unique.
pub(crate) struct Lifecycle {
    binding: OnceLock<Binding>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    options: TransportOptions,
}

impl Lifecycle {
    pub(crate) fn new(options: TransportOptions) -> Self {
        Self {
            binding: OnceLock::new(),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            options,
        }
    }

    pub(crate) const fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Cancelled when shutdown begins; background loops select on it
    pub(crate) const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn session_id(&self) -> Option<SessionId> {
        self.binding.get().map(|b| b.session_id.clone())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Bind to a session, register, and hand out the inbound receiver
    pub(crate) fn bind(
        &self,
        session_id: SessionId,
        transport: Weak<dyn Transport>,
    ) -> Result<Inbound, TransportError> {
        if self.is_closed() {
            return Err(TransportError::closed(&session_id));
        }
        if self.binding.get().is_some() {
            return Err(TransportError::invalid_operation("Transport is already connected"));
        }

        if let Some(registry) = &self.options.registry {
            if !registry.add(session_id.clone(), transport.clone()) {
                if self.is_closed() {
                    return Err(TransportError::closed(&session_id));
                }
                return Err(TransportError::invalid_operation(format!(
                    "Session {session_id} is already registered"
                )));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let bound = self.binding.set(Binding {
            session_id: session_id.clone(),
            events: tx,
            transport: transport.clone(),
        });
        if bound.is_err() {
            self.unregister(&session_id, &transport);
            return Err(TransportError::invalid_operation("Transport is already connected"));
        }

        // close may have run between the first check and the binding
        if self.is_closed() {
            self.unregister(&session_id, &transport);
            return Err(TransportError::closed(&session_id));
        }

        debug!(session_id = %session_id, "Transport connected");
        Ok(Inbound::new(rx))
    }

    fn unregister(&self, session_id: &SessionId, transport: &Weak<dyn Transport>) {
        if let Some(registry) = &self.options.registry {
            registry.remove_transport(session_id.as_str(), transport);
        }
    }

    /// Check that an outbound or inbound message may flow, returning the session id
    pub(crate) fn ensure_open(&self) -> Result<SessionId, TransportError> {
        let binding = self.binding.get().ok_or_else(TransportError::not_connected)?;
        if self.is_closed() {
            return Err(TransportError::closed(&binding.session_id));
        }
        Ok(binding.session_id.clone())
    }

    /// Push one inbound message to the session
    pub(crate) fn deliver(&self, message: Message) -> Result<(), TransportError> {
        let binding = self.binding.get().ok_or_else(TransportError::not_connected)?;
        if self.is_closed() {
            return Err(TransportError::closed(&binding.session_id));
        }

        debug!(
            session_id = %binding.session_id,
            method = message.method().unwrap_or("-"),
            "Inbound message"
        );
        binding
            .events
            .send(TransportEvent::Message(message))
            .map_err(|_| TransportError::closed(&binding.session_id))
    }

    /// Claim the shutdown; returns false if another caller already did
    ///
    /// The winner stops background loops and leaves the registry before any
    /// peer notification is attempted.
    pub(crate) fn begin_close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.shutdown.cancel();
        if let Some(binding) = self.binding.get() {
            self.unregister(&binding.session_id, &binding.transport);
        }
        true
    }

    /// Emit the single `Closed` event
    pub(crate) fn finish_close(&self, reason: CloseReason) {
        let Some(binding) = self.binding.get() else {
            debug!(reason = %reason, "Unconnected transport closed");
            return;
        };

        info!(session_id = %binding.session_id, reason = %reason, "Transport closed");
        let _ = binding.events.send(TransportEvent::Closed(reason));
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
