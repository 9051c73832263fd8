// ABOUTME: HTTP callback binding: each side POSTs to a URL owned by the other
// ABOUTME: Defines the envelope posted to the server and its first-contact reply
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

mod client;
mod server;

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::types::SessionId;

pub use client::CallbackClientTransport;
pub use server::CallbackServerTransport;

/// Body of every `POST` to the callback server
///
/// First contact carries `callbackUrl` and no `sessionId`; every later call
/// carries the server-assigned `sessionId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackEnvelope {
    /// Server-assigned session, absent on first contact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// URL the server posts its outbound messages to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// The JSON-RPC message itself
    pub message: Message,
}

/// Reply to a first-contact envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackAccepted {
    /// Session id to put in every later envelope
    pub session_id: SessionId,
}
