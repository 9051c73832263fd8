// ABOUTME: MCP message handler answering the handshake and ping for every transport
// ABOUTME: Validates JSON-RPC version and rejects unknown methods with METHOD_NOT_FOUND
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use async_trait::async_trait;
use mcplex::message::{
    INTERNAL_ERROR, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND,
};
use mcplex::session::{INITIALIZE_METHOD, PING_METHOD};
use mcplex::{Message, MessageHandler, MessageKind};
use serde_json::Value;
use tracing::debug;

use crate::protocol::{
    InitializeParams, InitializeResult, ServerCapabilities, ServerInfo, PROTOCOL_VERSION,
    SERVER_NAME, SERVER_VERSION,
};

/// Handler shared by every session the server opens
#[derive(Debug, Default)]
pub struct McpServer;

impl McpServer {
    /// Create the handler
    pub const fn new() -> Self {
        Self
    }

    /// Handle `initialize`: log client info and return server capabilities
    fn handle_initialize(id: Option<Value>, params: Option<Value>) -> Message {
        if let Some(params) = params {
            if let Ok(init) = serde_json::from_value::<InitializeParams>(params) {
                debug!(
                    client = %init.client_info.name,
                    version = ?init.client_info.version,
                    protocol = %init.protocol_version,
                    capabilities = %init.capabilities,
                    "MCP client connected"
                );
            }
        }

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_owned(),
            capabilities: ServerCapabilities::default(),
            server_info: ServerInfo {
                name: SERVER_NAME.to_owned(),
                version: SERVER_VERSION.to_owned(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => Message::success(id, val),
            Err(e) => Message::error(id, INTERNAL_ERROR, format!("Serialization error: {e}")),
        }
    }
}

#[async_trait]
impl MessageHandler for McpServer {
    async fn handle(&self, message: Message) -> Option<Message> {
        if message.jsonrpc != JSONRPC_VERSION {
            return Some(Message::error(
                message.id,
                INVALID_REQUEST,
                format!("Unsupported JSON-RPC version: {}", message.jsonrpc),
            ));
        }

        if message.kind() != MessageKind::Request {
            debug!(method = message.method().unwrap_or("-"), "Received notification, no response");
            return None;
        }

        let Message {
            id, method, params, ..
        } = message;
        let method = method.unwrap_or_default();

        let response = match method.as_str() {
            INITIALIZE_METHOD => Self::handle_initialize(id, params),
            PING_METHOD => Message::success(id, Value::Object(serde_json::Map::new())),
            method => {
                debug!(method, "Unknown MCP method");
                Message::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
            }
        };

        Some(response)
    }
}
