//! Transport addressing for the engine daemon.

use crate::errors::{BoxrunError, BoxrunResult};
use std::path::PathBuf;

/// Transport mechanism used to reach the engine daemon.
///
/// Parsed from the `tcp://host:port` / `unix:///path` forms accepted by
/// `--host` and `BOXRUN_HOST`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Transport {
    /// TCP transport
    Tcp { host: String, port: u16 },

    /// Unix socket transport
    Unix { socket_path: PathBuf },
}

impl Transport {
    /// Create a TCP transport.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Create a Unix socket transport.
    pub fn unix(socket_path: PathBuf) -> Self {
        Self::Unix { socket_path }
    }

    /// Parse a daemon address.
    pub fn parse(addr: &str) -> BoxrunResult<Self> {
        if let Some(path) = addr.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(BoxrunError::InvalidArgument(format!(
                    "invalid unix address: {}",
                    addr
                )));
            }
            return Ok(Self::unix(PathBuf::from(path)));
        }

        let rest = addr
            .strip_prefix("tcp://")
            .or_else(|| addr.strip_prefix("http://"))
            .unwrap_or(addr);
        let rest = rest.trim_end_matches('/');

        let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
            BoxrunError::InvalidArgument(format!("missing port in daemon address: {}", addr))
        })?;
        let port = port.parse::<u16>().map_err(|e| {
            BoxrunError::InvalidArgument(format!("invalid port in daemon address {}: {}", addr, e))
        })?;
        let host = if host.is_empty() { "127.0.0.1" } else { host };

        Ok(Self::tcp(host, port))
    }

    /// Get the URI representation of this transport.
    pub fn to_uri(&self) -> String {
        match self {
            Transport::Tcp { host, port } => format!("tcp://{}:{}", host, port),
            Transport::Unix { socket_path } => format!("unix://{}", socket_path.display()),
        }
    }

    /// HTTP base URL for REST clients. Only TCP transports have one.
    pub fn http_base(&self) -> Option<String> {
        match self {
            Transport::Tcp { host, port } => Some(format!("http://{}:{}", host, port)),
            Transport::Unix { .. } => None,
        }
    }
}
