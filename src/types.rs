// ABOUTME: Core types for the MCP transport layer: error type and session identifiers
// ABOUTME: Provides TransportError with categorized ErrorKind and the opaque SessionId newtype
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # Core Types
//!
//! Self-contained definitions shared by every transport binding: the error
//! type returned from all fallible operations and the identifier that ties a
//! transport to its session.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Error Type
// ============================================================================

/// Error type for transport and session operations
#[derive(Debug, Clone)]
pub struct TransportError {
    /// Error category
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
}

/// Categories of errors produced by transports and sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Send or ingest attempted before `connect`
    NotConnected,
    /// Operation attempted on a transport that has already closed
    Closed,
    /// Malformed JSON or an envelope violating the JSON-RPC shape
    Decode,
    /// Peer could not be reached (HTTP failure, broken pipe)
    PeerUnreachable,
    /// Misuse of the API (double connect, missing endpoint)
    InvalidOperation,
    /// Peer answered with a JSON-RPC error object
    Protocol,
    /// Operation exceeded its deadline
    Timeout,
    /// Operation aborted through its cancellation token
    Cancelled,
    /// Local I/O failure
    Io,
    /// Configuration error
    Config,
    /// Internal error (bug, unexpected state)
    Internal,
}

impl TransportError {
    /// Create a not-connected error
    pub fn not_connected() -> Self {
        Self {
            kind: ErrorKind::NotConnected,
            message: "Transport is not connected".to_owned(),
        }
    }

    /// Create a closed-transport error for the given session
    pub fn closed(session_id: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::Closed,
            message: format!("Transport for session {session_id} is closed"),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Decode,
            message: message.into(),
        }
    }

    /// Create a peer-unreachable error
    pub fn peer_unreachable(peer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::PeerUnreachable,
            message: format!("{}: {}", peer.into(), message.into()),
        }
    }

    /// Create an invalid-operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidOperation,
            message: message.into(),
        }
    }

    /// Create an error from a JSON-RPC error reply
    pub fn protocol(code: i32, message: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::Protocol,
            message: format!("JSON-RPC error {code}: {message}"),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: &str) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            message: format!("{operation} cancelled"),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Io,
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Config,
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

// ============================================================================
// Session Identifier
// ============================================================================

/// Opaque identifier binding a transport to its session
///
/// Generated identifiers are simple-form v4 UUIDs, unique for the lifetime of
/// the process. Identifiers chosen by a peer are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh process-unique identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
