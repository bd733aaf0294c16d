//! Engine daemon call contract.
//!
//! The run driver never talks to the daemon directly; every interaction goes
//! through [`EngineClient`]. The REST implementation lives in `rest` behind the
//! `rest` feature; tests substitute an in-memory engine.

mod options;
#[cfg(feature = "rest")]
mod rest;

pub use options::EngineOptions;
#[cfg(feature = "rest")]
pub use rest::RestEngine;

use crate::run::LaunchSpec;
use async_trait::async_trait;
use boxrun_shared::errors::BoxrunResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

/// Identifier returned by the create call.
///
/// Immutable for the lifetime of a run and used as the key of every
/// subsequent daemon call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a successful create call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateResponse {
    pub id: String,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

/// Point-in-time container state returned by inspect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: i32,
}

/// Which standard streams an attach wires up, plus the detach sequence.
///
/// Fixed once computed; never changed after the session opens.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttachOptions {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub detach_keys: String,
}

impl AttachOptions {
    /// Whether any stream is wired at all.
    pub fn any(&self) -> bool {
        self.stdin || self.stdout || self.stderr
    }

    /// Whether any output stream is wired.
    pub fn has_output(&self) -> bool {
        self.stdout || self.stderr
    }
}

/// Options for the remove call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub force: bool,
    pub remove_volumes: bool,
    pub remove_links: bool,
}

/// Terminal dimensions in character cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtySize {
    pub rows: u16,
    pub cols: u16,
}

/// Upgraded bidirectional connection multiplexing a container's streams.
pub struct HijackedStream {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// Error the daemon put on the connection by closing it during the
    /// handshake. Reported only if the copy loop itself ends cleanly.
    pub handshake_error: Option<String>,
}

impl HijackedStream {
    /// Split a duplex connection into its halves.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            handshake_error: None,
        }
    }

    pub fn with_handshake_error(mut self, message: impl Into<String>) -> Self {
        self.handshake_error = Some(message.into());
        self
    }
}

impl fmt::Debug for HijackedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HijackedStream")
            .field("handshake_error", &self.handshake_error)
            .finish_non_exhaustive()
    }
}

/// Calls the run driver makes against the engine daemon.
///
/// Failures are reported as `BoxrunError::DaemonCommunication` carrying the
/// daemon's text with the `Error response from daemon: ` envelope, so the
/// driver can classify them into exit codes.
#[async_trait]
pub trait EngineClient: Send + Sync + 'static {
    /// Create a container from the launch spec.
    async fn create(&self, spec: &LaunchSpec) -> BoxrunResult<CreateResponse>;

    /// Start a created container.
    async fn start(&self, id: &ContainerHandle) -> BoxrunResult<()>;

    /// Hijack the container's standard streams.
    async fn attach(
        &self,
        id: &ContainerHandle,
        options: &AttachOptions,
    ) -> BoxrunResult<HijackedStream>;

    /// Block until the container exits and return its exit code.
    async fn wait(&self, id: &ContainerHandle) -> BoxrunResult<i32>;

    /// Snapshot the container's state.
    async fn inspect(&self, id: &ContainerHandle) -> BoxrunResult<ContainerState>;

    /// Remove the container.
    async fn remove(&self, id: &ContainerHandle, options: RemoveOptions) -> BoxrunResult<()>;

    /// Deliver a signal to the container's main process.
    async fn kill(&self, id: &ContainerHandle, signal: i32) -> BoxrunResult<()>;

    /// Resize the container's pseudo-terminal.
    async fn resize(&self, id: &ContainerHandle, size: TtySize) -> BoxrunResult<()>;
}
