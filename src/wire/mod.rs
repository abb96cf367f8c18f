//! Wire client for the engine's HTTP protocol.
//!
//! Provides:
//! - `Transport` - one request/response round trip against one server
//! - `HttpTransport` - the `ureq` implementation
//! - `Properties` - the `key=value` text both directions use

mod client;
mod properties;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::error::{Effect, Transience};
use crate::version::Version;

pub use client::HttpTransport;
pub use properties::{Properties, PropertiesError};

/// Network address of one server process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Transport failures. Every variant fails the whole call.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WireError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<ureq::Transport>,
    },

    #[error("{url} answered with HTTP status {status}")]
    Status { url: String, status: u16 },

    #[error("malformed response from {url}: {source}")]
    Malformed {
        url: String,
        #[source]
        source: PropertiesError,
    },

    #[error("failed to read response from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid version from {url}: {reason}")]
    Version { url: String, reason: String },
}

impl WireError {
    pub fn transience(&self) -> Transience {
        match self {
            WireError::Timeout { .. } | WireError::Transport { .. } | WireError::Body { .. } => {
                Transience::Retryable
            }
            WireError::Status { .. } => Transience::Unknown,
            WireError::Malformed { .. } | WireError::Version { .. } => Transience::Permanent,
        }
    }

    /// The server may already have run part of the request.
    pub fn effect(&self) -> Effect {
        match self {
            WireError::Version { .. } => Effect::None,
            _ => Effect::Unknown,
        }
    }
}

/// One round trip against one running server.
///
/// Implementations must tolerate back-to-back calls; callers guarantee that
/// a single transport is never used concurrently.
pub trait Transport: Send {
    /// `GET /execute?id=..&methods=..`; `id = None` addresses no instance.
    fn get(&self, id: Option<&str>, methods: &[&str]) -> Result<Properties, WireError>;

    /// `POST /execute?id=..&methods=..` with a `key=value\r\n` body.
    fn post(
        &self,
        id: Option<&str>,
        methods: &[&str],
        body: &Properties,
    ) -> Result<Properties, WireError>;

    /// `GET /status`; `true` once the server reports `status = ready`.
    fn status(&self, timeout: Duration) -> Result<bool, WireError>;

    fn version(&self, timeout: Duration) -> Result<Version, WireError>;

    /// `GET /close_server`.
    fn close(&self) -> Result<(), WireError>;
}

/// Creates a transport for a freshly started server.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint, request_timeout: Duration) -> Box<dyn Transport>;
}

/// Connector producing `HttpTransport`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn connect(&self, endpoint: &Endpoint, request_timeout: Duration) -> Box<dyn Transport> {
        Box::new(HttpTransport::new(endpoint.clone(), request_timeout))
    }
}

/// Comma-joined method list; order is the server's execution order.
pub fn join_methods(methods: &[&str]) -> String {
    methods.join(",")
}
