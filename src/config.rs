// ABOUTME: Configuration types for transports, HTTP routes and session drivers
// ABOUTME: Builder-style structs with defaults and environment variable overrides
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::env;
use std::fmt;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::registry::TransportRegistry;

/// Default upper bound for the best-effort disconnect on close (5 seconds)
const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 5;

/// Default time allowed for an outbound dial to become usable (30 seconds)
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default time a client waits for a correlated response (60 seconds)
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default SSE keep-alive comment interval (15 seconds)
const DEFAULT_KEEP_ALIVE_SECS: u64 = 15;

/// Default maximum length of one pipe line (4 MiB)
const DEFAULT_MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Default route prefix for the Server-Sent-Events binding
pub const DEFAULT_SSE_PATH: &str = "/sse";

/// Default route for the server side of the callback binding
pub const DEFAULT_CALLBACK_PATH: &str = "/callback";

/// Default route prefix a callback client listens on
pub const DEFAULT_CALLBACK_RECEIVER_PATH: &str = "/cb";

// ============================================================================
// Pipe Command
// ============================================================================

/// Process to spawn for a pipe transport
#[derive(Debug, Clone)]
pub struct PipeCommand {
    /// Program to execute
    pub program: PathBuf,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Extra environment variables for the child
    pub env: Vec<(String, String)>,
    /// Working directory for the child
    pub working_directory: Option<PathBuf>,
}

impl PipeCommand {
    /// Create a command for the given program with no arguments
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_directory: None,
        }
    }

    /// Set the program arguments
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add one environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_working_directory(mut self, dir: PathBuf) -> Self {
        self.working_directory = Some(dir);
        self
    }
}

// ============================================================================
// Transport Options
// ============================================================================

/// Options shared by every transport binding
#[derive(Clone)]
pub struct TransportOptions {
    /// Registry the transport adds itself to on connect and leaves on close
    pub registry: Option<Arc<TransportRegistry>>,
    /// Upper bound for the best-effort disconnect notification
    pub close_timeout: Duration,
    /// Upper bound for an outbound dial (SSE endpoint discovery)
    pub connect_timeout: Duration,
    /// Longest accepted pipe line, in bytes
    pub max_line_bytes: usize,
}

impl TransportOptions {
    /// Register the transport in the given registry
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<TransportRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the close timeout
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum pipe line length
    #[must_use]
    pub const fn with_max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            registry: None,
            close_timeout: Duration::from_secs(DEFAULT_CLOSE_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportOptions")
            .field("registered", &self.registry.is_some())
            .field("close_timeout", &self.close_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_line_bytes", &self.max_line_bytes)
            .finish()
    }
}

// ============================================================================
// HTTP Configuration
// ============================================================================

/// Route and timing configuration for the HTTP bindings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Route prefix for the SSE binding (`GET <path>`, `POST <path>/{id}`)
    pub sse_path: String,
    /// Route for callback envelopes (`POST <path>`)
    pub callback_path: String,
    /// Externally visible base URL prepended to announced endpoints
    pub public_url: Option<String>,
    /// Interval between SSE keep-alive comments
    pub keep_alive: Duration,
    /// Upper bound for the best-effort disconnect on close
    pub close_timeout: Duration,
}

impl HttpConfig {
    /// Create configuration from environment variables, falling back to defaults
    ///
    /// Environment variables:
    /// - `MCPLEX_PUBLIC_URL` — Base URL announced in SSE `endpoint` events
    /// - `MCPLEX_CLOSE_TIMEOUT_SECS` — Disconnect notification timeout
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("MCPLEX_PUBLIC_URL") {
            config.public_url = Some(url);
        }
        if let Some(timeout) = env::var("MCPLEX_CLOSE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| parse_timeout(&v).ok())
        {
            config.close_timeout = timeout;
        }
        config
    }

    /// Set the SSE route prefix
    #[must_use]
    pub fn with_sse_path(mut self, path: impl Into<String>) -> Self {
        self.sse_path = normalize_path(&path.into());
        self
    }

    /// Set the callback route
    #[must_use]
    pub fn with_callback_path(mut self, path: impl Into<String>) -> Self {
        self.callback_path = normalize_path(&path.into());
        self
    }

    /// Set the public base URL
    #[must_use]
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into().trim_end_matches('/').to_owned());
        self
    }

    /// Set the keep-alive interval
    #[must_use]
    pub const fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Set the close timeout
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// URL a stream peer should POST to for the given session
    pub fn sse_endpoint(&self, session_id: &str) -> String {
        let base = self.public_url.as_deref().unwrap_or_default();
        format!("{base}{}/{session_id}", self.sse_path)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            sse_path: DEFAULT_SSE_PATH.to_owned(),
            callback_path: DEFAULT_CALLBACK_PATH.to_owned(),
            public_url: None,
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            close_timeout: Duration::from_secs(DEFAULT_CLOSE_TIMEOUT_SECS),
        }
    }
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Timing configuration for client sessions
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum time to wait for a correlated response
    pub request_timeout: Duration,
    /// Interval for keepalive pings (None disables them)
    pub keepalive_interval: Option<Duration>,
}

impl SessionConfig {
    /// Create configuration from environment variables, falling back to defaults
    ///
    /// Environment variables:
    /// - `MCPLEX_REQUEST_TIMEOUT_SECS` — Response wait limit
    /// - `MCPLEX_KEEPALIVE_SECS` — Ping interval (0 disables)
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(timeout) = env::var("MCPLEX_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| parse_timeout(&v).ok())
        {
            config.request_timeout = timeout;
        }
        if let Some(interval) = env::var("MCPLEX_KEEPALIVE_SECS")
            .ok()
            .and_then(|v| parse_timeout(&v).ok())
        {
            config.keepalive_interval = (!interval.is_zero()).then_some(interval);
        }
        config
    }

    /// Set the request timeout
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enable keepalive pings at the given interval
    #[must_use]
    pub const fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            keepalive_interval: None,
        }
    }
}

/// Ensure a route starts with exactly one slash and has no trailing slash
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{trimmed}")
}

/// Parse a timeout value from a string (in seconds)
///
/// # Errors
///
/// Returns an error if the string cannot be parsed as a `u64`.
pub fn parse_timeout(input: &str) -> Result<Duration, ParseIntError> {
    input.trim().parse::<u64>().map(Duration::from_secs)
}
