// ABOUTME: CLI entry point for the mcplex MCP server binary
// ABOUTME: Serves one session over stdio or many over SSE and HTTP callbacks
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use mcplex::types::{SessionId, TransportError};
use mcplex::{HttpConfig, PipeTransport, Transport, TransportOptions};
use tokio_util::sync::CancellationToken;

use mcplex_server::router;
use mcplex_server::server::McpServer;
use mcplex_server::state::ServerState;

/// Transport the server listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportMode {
    /// Newline-delimited JSON-RPC over stdin/stdout
    Stdio,
    /// SSE and HTTP callback bindings on one listener
    Http,
}

/// mcplex-server — MCP server over stdio, SSE or HTTP callbacks
#[derive(Parser)]
#[command(name = "mcplex-server", version, about)]
struct Cli {
    /// Transport to serve
    #[arg(long, value_enum, default_value_t = TransportMode::Stdio)]
    transport: TransportMode,

    /// HTTP listen port
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// HTTP listen host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Base URL announced in SSE endpoint events (overrides `MCPLEX_PUBLIC_URL`)
    #[arg(long)]
    public_url: Option<String>,

    /// Interval between SSE keep-alive comments
    #[arg(long)]
    keepalive_secs: Option<u64>,

    /// Upper bound for the disconnect notification on close
    #[arg(long)]
    close_timeout_secs: Option<u64>,
}

impl Cli {
    fn http_config(&self) -> HttpConfig {
        let mut config = HttpConfig::from_env();
        if let Some(url) = &self.public_url {
            config = config.with_public_url(url.clone());
        }
        if let Some(secs) = self.keepalive_secs {
            config = config.with_keep_alive(Duration::from_secs(secs));
        }
        if let Some(secs) = self.close_timeout_secs {
            config = config.with_close_timeout(Duration::from_secs(secs));
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries protocol frames in stdio mode, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.transport {
        TransportMode::Stdio => {
            run_stdio(&cli).await?;
            // a pending stdin read would block runtime shutdown until the peer writes again
            std::process::exit(0);
        }
        TransportMode::Http => run_http(&cli).await?,
    }

    Ok(())
}

async fn run_stdio(cli: &Cli) -> Result<(), TransportError> {
    let options = TransportOptions::default().with_close_timeout(cli.http_config().close_timeout);
    let transport = PipeTransport::stdio(options);
    let inbound = transport.connect(SessionId::generate()).await?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    tracing::info!("Starting mcplex MCP server on stdio");
    let reason = mcplex::serve(transport, inbound, Arc::new(McpServer::new()), cancel).await;
    tracing::info!(reason = %reason, "stdio session finished");
    Ok(())
}

async fn run_http(cli: &Cli) -> Result<(), TransportError> {
    let state = Arc::new(ServerState::new(cli.http_config()));
    let shutdown = state.shutdown_token();
    let app = router::build(state);

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TransportError::internal(format!("Failed to bind {addr}: {e}")))?;

    tracing::info!(address = %addr, "Starting mcplex MCP server on HTTP");

    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| TransportError::internal(format!("Server error: {e}")))?;

    Ok(())
}

async fn cancel_on_ctrl_c(token: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Shutdown requested");
        token.cancel();
    }
}
