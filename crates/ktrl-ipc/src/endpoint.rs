//! Network addresses of the daemon's two sockets.
//!
//! The protocol does not self-describe which socket is which; callers pick
//! the port that maps to the channel they want.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default host the daemon binds both sockets on.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port of the command (request/reply) socket.
pub const DEFAULT_COMMAND_PORT: u16 = 7331;

/// Default port of the notification (publish/subscribe) socket.
pub const DEFAULT_NOTIFY_PORT: u16 = 7333;

/// Which of the two channels an endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Command,
    Notification,
}

impl Channel {
    pub fn default_port(self) -> u16 {
        match self {
            Self::Command => DEFAULT_COMMAND_PORT,
            Self::Notification => DEFAULT_NOTIFY_PORT,
        }
    }
}

/// A TCP endpoint (`host`, `port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
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

    /// The default endpoint for the given channel on localhost.
    pub fn default_for(channel: Channel) -> Self {
        Self::new(DEFAULT_HOST, channel.default_port())
    }

    pub fn command_default() -> Self {
        Self::default_for(Channel::Command)
    }

    pub fn notify_default() -> Self {
        Self::default_for(Channel::Notification)
    }

    /// Same host, different port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Check that the endpoint is usable before handing it to a transport.
    pub fn validate(&self) -> Result<(), EndpointError> {
        if self.host.trim().is_empty() {
            return Err(EndpointError::EmptyHost);
        }
        if self.host.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(EndpointError::InvalidHost(self.host.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "tcp://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "tcp://{}:{}", self.host, self.port)
        }
    }
}

/// Errors from parsing an endpoint string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("unsupported transport in {0:?} (only tcp:// is supported)")]
    UnsupportedScheme(String),

    #[error("missing port in {0:?}")]
    MissingPort(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("endpoint host must not be empty")]
    EmptyHost,

    #[error("invalid host {0:?}")]
    InvalidHost(String),
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    /// Accepts `tcp://host:port`, `host:port` and `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = match s.split_once("://") {
            Some(("tcp", rest)) => rest,
            Some(_) => return Err(EndpointError::UnsupportedScheme(s.to_string())),
            None => s,
        };

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| EndpointError::MissingPort(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| EndpointError::InvalidPort(port.to_string()))?;
        if port == 0 {
            return Err(EndpointError::InvalidPort(port.to_string()));
        }

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        let endpoint = Endpoint::new(host, port);
        endpoint.validate()?;
        Ok(endpoint)
    }
}
