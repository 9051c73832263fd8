// ABOUTME: MCP handshake payloads exchanged during initialize
// ABOUTME: Defines client parameters, server result and the advertised protocol version
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol version supported by this server
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name reported during MCP handshake
pub const SERVER_NAME: &str = "mcplex-server";

/// Server version reported during MCP handshake
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parameters sent by the client in `initialize`
#[derive(Debug, Deserialize)]
pub struct InitializeParams {
    /// Protocol version requested by the client
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Client capabilities (opaque to this server)
    #[serde(default)]
    pub capabilities: Value,
    /// Client identification
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

/// Client identification from `initialize`
#[derive(Debug, Deserialize)]
pub struct ClientInfo {
    /// Client name
    pub name: String,
    /// Client version
    #[serde(default)]
    pub version: Option<String>,
}

/// Result returned from `initialize`
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// Negotiated protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
    /// Server identification
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Capabilities advertised by this server
///
/// The transport server exposes no tools, prompts or resources, so this
/// serializes as an empty object.
#[derive(Debug, Default, Serialize)]
pub struct ServerCapabilities {}

/// Server identification in the `initialize` result
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
}
