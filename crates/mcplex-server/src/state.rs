// ABOUTME: Server state wrapping the transport context shared by every route
// ABOUTME: Holds the session registry, message handler and shutdown token
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;

use mcplex::http::{ServerContext, SharedContext};
use mcplex::HttpConfig;
use tokio_util::sync::CancellationToken;

use crate::server::McpServer;

/// Shared server state handle
pub type SharedState = Arc<ServerState>;

/// Server state shared by the health route and the transport routes
pub struct ServerState {
    /// Transport routing context
    context: SharedContext,
}

impl ServerState {
    /// Create server state serving [`McpServer`] with the given HTTP configuration
    pub fn new(config: HttpConfig) -> Self {
        Self::with_context(ServerContext::new(Arc::new(McpServer::new()), config))
    }

    /// Wrap an already-built context
    pub fn with_context(context: ServerContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    /// Transport routing context
    pub const fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.context.registry.len()
    }

    /// Token that ends every session when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.context.shutdown.clone()
    }
}
