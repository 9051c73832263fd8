// ABOUTME: Concurrent session-id to transport lookup table used by the HTTP bindings
// ABOUTME: Holds weak references so an entry never keeps a closed transport alive
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::transport::Transport;
use crate::types::SessionId;

/// Routes inbound HTTP requests to the transport that owns their session
///
/// An SSE `POST` or a callback envelope arrives on a different connection
/// from the one that created the session; this table is the only link
/// between them. Entries are weak back-references: the session owns the
/// transport, the registry only finds it. Sharded storage keeps lookups for
/// one session from contending with churn on others.
#[derive(Default)]
pub struct TransportRegistry {
    entries: DashMap<SessionId, Weak<dyn Transport>>,
}

impl TransportRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport under its session id
    ///
    /// Returns false without registering when the transport is already
    /// closed or another live transport holds the id. If the transport
    /// closed while it was being inserted, the entry is removed again so
    /// that no entry outlives a closed transport.
    pub fn add(&self, session_id: SessionId, transport: Weak<dyn Transport>) -> bool {
        if transport.upgrade().is_none_or(|t| t.is_closed()) {
            debug!(session_id = %session_id, "Skipping registration of closed transport");
            return false;
        }

        match self.entries.entry(session_id.clone()) {
            Entry::Occupied(mut entry) => {
                let taken = !Weak::ptr_eq(entry.get(), &transport)
                    && entry.get().upgrade().is_some_and(|t| !t.is_closed());
                if taken {
                    warn!(session_id = %session_id, "Session id already registered to a live transport");
                    return false;
                }
                entry.insert(transport.clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(transport.clone());
            }
        }

        if transport.upgrade().is_none_or(|t| t.is_closed()) {
            self.remove_transport(session_id.as_str(), &transport);
            return false;
        }

        debug!(session_id = %session_id, active = self.entries.len(), "Transport registered");
        true
    }

    /// Remove the entry for a session, if present
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.entries.remove(session_id).is_some();
        if removed {
            debug!(session_id, active = self.entries.len(), "Transport unregistered");
        }
        removed
    }

    /// Remove the entry for a session only if it still points at `transport`
    pub fn remove_transport(&self, session_id: &str, transport: &Weak<dyn Transport>) -> bool {
        let removed = self
            .entries
            .remove_if(session_id, |_, current| Weak::ptr_eq(current, transport))
            .is_some();
        if removed {
            debug!(session_id, active = self.entries.len(), "Transport unregistered");
        }
        removed
    }

    /// Look up the live transport for a session
    ///
    /// Entries whose transport was dropped or has closed are pruned and
    /// reported as not found.
    pub fn try_get(&self, session_id: &str) -> Option<Arc<dyn Transport>> {
        let live = self
            .entries
            .get(session_id)
            .and_then(|entry| entry.value().upgrade())
            .filter(|transport| !transport.is_closed());

        if live.is_none() {
            self.entries.remove_if(session_id, |_, weak| {
                weak.upgrade().is_none_or(|t| t.is_closed())
            });
        }
        live
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of registered session ids
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("sessions", &self.entries.len())
            .finish()
    }
}
