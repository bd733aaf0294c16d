//! Configuration for the engine connection.

use boxrun_shared::constants::engine as const_engine;
use boxrun_shared::errors::BoxrunResult;
use boxrun_shared::Transport;
use serde::{Deserialize, Serialize};

/// How to reach the engine daemon.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Daemon address (`tcp://host:port` or `unix:///path`).
    ///
    /// Default: `$BOXRUN_HOST`, else `tcp://127.0.0.1:2375`
    #[serde(default = "default_host")]
    pub host: String,

    /// REST API version prefix, e.g. `v1.24`.
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_host() -> String {
    std::env::var(const_engine::ENV_HOST)
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| const_engine::DEFAULT_HOST.to_string())
}

fn default_api_version() -> String {
    const_engine::API_VERSION.to_string()
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_version: default_api_version(),
        }
    }
}

impl EngineOptions {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Parse the configured address.
    pub fn transport(&self) -> BoxrunResult<Transport> {
        Transport::parse(&self.host)
    }
}
