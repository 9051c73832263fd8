// ABOUTME: JSON-RPC 2.0 message envelope shared by every transport binding
// ABOUTME: Defines the wire format, error codes, classification and shape validation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::TransportError;

/// JSON-RPC protocol version marker
pub const JSONRPC_VERSION: &str = "2.0";

/// Notification method a peer sends right before going away
pub const DISCONNECT_METHOD: &str = "disconnect";

// ============================================================================
// JSON-RPC Error Codes
// ============================================================================

/// JSON-RPC parse error: invalid JSON received
pub const PARSE_ERROR: i32 = -32_700;

/// JSON-RPC invalid request (e.g. wrong protocol version)
pub const INVALID_REQUEST: i32 = -32_600;

/// JSON-RPC method not found
pub const METHOD_NOT_FOUND: i32 = -32_601;

/// JSON-RPC invalid parameters
pub const INVALID_PARAMS: i32 = -32_602;

/// JSON-RPC internal error
pub const INTERNAL_ERROR: i32 = -32_603;

// ============================================================================
// Envelope
// ============================================================================

/// One JSON-RPC message as it travels over the wire
///
/// A single type covers requests, notifications and responses so that
/// transports can move messages without knowing which direction they flow.
/// Absent fields are omitted when serializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Protocol version marker, defaulted to "2.0" when a peer omits it
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// Request identifier (None for notifications)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name (requests and notifications only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Success payload (responses only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload (responses only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Shape of a message, derived from which fields are present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Has `method` and `id`
    Request,
    /// Has `method`, no `id`
    Notification,
    /// Has `result` or `error`
    Response,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_owned()
}

impl Message {
    /// Build a request expecting a reply
    pub fn request(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: default_version(),
            id: Some(id.into()),
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Build a notification (no reply expected)
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: default_version(),
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Build a success response with the given result
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response with the given code and message
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            method: None,
            params: None,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// The notification sent to a peer when a transport closes
    pub fn disconnect() -> Self {
        Self::notification(DISCONNECT_METHOD, None)
    }

    /// Classify the message by the fields it carries
    pub const fn kind(&self) -> MessageKind {
        if self.method.is_some() {
            if self.id.is_some() {
                MessageKind::Request
            } else {
                MessageKind::Notification
            }
        } else {
            MessageKind::Response
        }
    }

    /// Method name, if any
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Whether this is the peer's disconnect notification
    pub fn is_disconnect(&self) -> bool {
        self.kind() == MessageKind::Notification && self.method() == Some(DISCONNECT_METHOD)
    }

    /// Check the request/response shape invariant
    ///
    /// A response carries exactly one of `result`/`error`; a request or
    /// notification carries neither.
    pub fn validate(&self) -> Result<(), TransportError> {
        let has_result = self.result.is_some();
        let has_error = self.error.is_some();

        if self.method.is_some() {
            if has_result || has_error {
                return Err(TransportError::decode(
                    "Request or notification must not carry result or error",
                ));
            }
            return Ok(());
        }

        match (has_result, has_error) {
            (true, false) | (false, true) => Ok(()),
            (true, true) => Err(TransportError::decode(
                "Response carries both result and error",
            )),
            (false, false) => Err(TransportError::decode(
                "Message has neither method nor result/error",
            )),
        }
    }

    /// Parse and validate one message from its JSON text
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        let message: Self = serde_json::from_str(text)
            .map_err(|e| TransportError::decode(format!("Invalid JSON-RPC message: {e}")))?;
        message.validate()?;
        Ok(message)
    }

    /// Parse and validate one message from raw bytes (HTTP bodies)
    pub fn decode_slice(bytes: &[u8]) -> Result<Self, TransportError> {
        let message: Self = serde_json::from_slice(bytes)
            .map_err(|e| TransportError::decode(format!("Invalid JSON-RPC message: {e}")))?;
        message.validate()?;
        Ok(message)
    }

    /// Serialize to a single line of JSON (no trailing newline)
    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self)
            .map_err(|e| TransportError::internal(format!("JSON serialization failed: {e}")))
    }
}
