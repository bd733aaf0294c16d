//! Test doubles for driving runs without an engine daemon.
//!
//! [`FakeEngine`] scripts every daemon call and records what the driver
//! asked for. [`SharedBuffer`] captures what a run writes to its local
//! streams.

use async_trait::async_trait;
use boxrun::{
    AttachOptions, BoxrunError, BoxrunResult, ContainerHandle, ContainerState, CreateResponse,
    EngineClient, HijackedStream, LaunchSpec, RemoveOptions, TtySize,
};
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

pub const FAKE_CONTAINER_ID: &str = "c0ffee15dead";

const PIPE_CAPACITY: usize = 64 * 1024;

/// One recorded daemon call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineCall {
    Create {
        image: String,
        name: Option<String>,
    },
    Start,
    Attach(AttachOptions),
    Wait,
    Inspect,
    Remove(RemoveOptions),
    Kill(i32),
    Resize(TtySize),
}

#[derive(Clone, Debug)]
enum WaitBehavior {
    Exit(i32),
    Delayed(Duration, i32),
    Forever,
    Fail(String),
}

#[derive(Clone, Debug)]
enum AttachBehavior {
    /// Write these bytes, then close the daemon's write side.
    Output(Vec<u8>),
    /// Deliver these bytes, then fail reads as if the peer reset the connection.
    OutputThenReset(Vec<u8>),
    /// Keep the daemon end for the test to drive.
    HoldOpen,
    Fail(String),
}

struct Script {
    container_id: String,
    warnings: Option<Vec<String>>,
    create_error: Option<String>,
    start_error: Option<String>,
    start_delay: Option<Duration>,
    attach: AttachBehavior,
    handshake_error: Option<String>,
    wait: WaitBehavior,
    inspect: ContainerState,
    remove_error: Option<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            container_id: FAKE_CONTAINER_ID.to_string(),
            warnings: None,
            create_error: None,
            start_error: None,
            start_delay: None,
            attach: AttachBehavior::Output(Vec::new()),
            handshake_error: None,
            wait: WaitBehavior::Exit(0),
            inspect: ContainerState::default(),
            remove_error: None,
        }
    }
}

/// Scripted in-memory engine.
#[derive(Clone, Default)]
pub struct FakeEngine {
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Vec<EngineCall>>>,
    daemon_end: Arc<Mutex<Option<DuplexStream>>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // SCRIPTING
    // ========================================================================

    pub fn with_container_id(self, id: &str) -> Self {
        self.script.lock().container_id = id.to_string();
        self
    }

    pub fn with_warnings(self, warnings: &[&str]) -> Self {
        self.script.lock().warnings = Some(warnings.iter().map(|w| w.to_string()).collect());
        self
    }

    /// Fail create with `message` (envelope prefix included by the caller).
    pub fn fail_create(self, message: &str) -> Self {
        self.script.lock().create_error = Some(message.to_string());
        self
    }

    pub fn fail_start(self, message: &str) -> Self {
        self.script.lock().start_error = Some(message.to_string());
        self
    }

    pub fn with_start_delay(self, delay: Duration) -> Self {
        self.script.lock().start_delay = Some(delay);
        self
    }

    /// Hijacked output: these bytes, then end of stream.
    pub fn with_attach_output(self, output: Vec<u8>) -> Self {
        self.script.lock().attach = AttachBehavior::Output(output);
        self
    }

    /// Keep the hijacked connection open; see [`FakeEngine::take_daemon_end`].
    pub fn with_attach_output_then_reset(self, output: Vec<u8>) -> Self {
        self.script.lock().attach = AttachBehavior::OutputThenReset(output);
        self
    }

    pub fn hold_attach_open(self) -> Self {
        self.script.lock().attach = AttachBehavior::HoldOpen;
        self
    }

    pub fn with_attach_handshake_error(self, message: &str) -> Self {
        self.script.lock().handshake_error = Some(message.to_string());
        self
    }

    pub fn fail_attach(self, message: &str) -> Self {
        self.script.lock().attach = AttachBehavior::Fail(message.to_string());
        self
    }

    pub fn with_wait_code(self, code: i32) -> Self {
        self.script.lock().wait = WaitBehavior::Exit(code);
        self
    }

    /// Wait resolves with `code` after `delay`.
    pub fn with_wait_delay(self, delay: Duration, code: i32) -> Self {
        self.script.lock().wait = WaitBehavior::Delayed(delay, code);
        self
    }

    /// Wait never resolves, like a container that keeps running.
    pub fn wait_forever(self) -> Self {
        self.script.lock().wait = WaitBehavior::Forever;
        self
    }

    pub fn fail_wait(self, message: &str) -> Self {
        self.script.lock().wait = WaitBehavior::Fail(message.to_string());
        self
    }

    pub fn with_inspect_code(self, code: i32) -> Self {
        self.script.lock().inspect = ContainerState {
            running: false,
            exit_code: code,
        };
        self
    }

    pub fn fail_remove(self, message: &str) -> Self {
        self.script.lock().remove_error = Some(message.to_string());
        self
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn creates(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Create { .. }))
    }

    pub fn removes(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Remove(_)))
    }

    pub fn kills(&self) -> Vec<i32> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                EngineCall::Kill(signal) => Some(*signal),
                _ => None,
            })
            .collect()
    }

    pub fn resizes(&self) -> Vec<TtySize> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                EngineCall::Resize(size) => Some(*size),
                _ => None,
            })
            .collect()
    }

    /// Daemon side of a connection opened with [`FakeEngine::hold_attach_open`].
    pub fn take_daemon_end(&self) -> Option<DuplexStream> {
        self.daemon_end.lock().take()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl EngineClient for FakeEngine {
    async fn create(&self, spec: &LaunchSpec) -> BoxrunResult<CreateResponse> {
        self.record(EngineCall::Create {
            image: spec.config.image.clone(),
            name: spec.flags.name.clone(),
        });
        let script = self.script.lock();
        if let Some(message) = &script.create_error {
            return Err(BoxrunError::DaemonCommunication(message.clone()));
        }
        Ok(CreateResponse {
            id: script.container_id.clone(),
            warnings: script.warnings.clone(),
        })
    }

    async fn start(&self, _id: &ContainerHandle) -> BoxrunResult<()> {
        self.record(EngineCall::Start);
        let (delay, error) = {
            let script = self.script.lock();
            (script.start_delay, script.start_error.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match error {
            Some(message) => Err(BoxrunError::DaemonCommunication(message)),
            None => Ok(()),
        }
    }

    async fn attach(
        &self,
        _id: &ContainerHandle,
        options: &AttachOptions,
    ) -> BoxrunResult<HijackedStream> {
        self.record(EngineCall::Attach(options.clone()));
        let (behavior, handshake_error) = {
            let script = self.script.lock();
            (script.attach.clone(), script.handshake_error.clone())
        };

        let (client, mut daemon) = tokio::io::duplex(PIPE_CAPACITY);
        match behavior {
            AttachBehavior::Fail(message) => {
                return Err(BoxrunError::DaemonCommunication(message));
            }
            AttachBehavior::Output(output) => {
                tokio::spawn(async move {
                    let _ = daemon.write_all(&output).await;
                    let _ = daemon.shutdown().await;
                });
            }
            AttachBehavior::OutputThenReset(output) => {
                let stream = HijackedStream {
                    reader: Box::new(io::Cursor::new(output).chain(ResetReader)),
                    writer: Box::new(tokio::io::sink()),
                    handshake_error,
                };
                return Ok(stream);
            }
            AttachBehavior::HoldOpen => {
                *self.daemon_end.lock() = Some(daemon);
            }
        }

        let stream = HijackedStream::new(client);
        Ok(match handshake_error {
            Some(message) => stream.with_handshake_error(message),
            None => stream,
        })
    }

    async fn wait(&self, _id: &ContainerHandle) -> BoxrunResult<i32> {
        self.record(EngineCall::Wait);
        let behavior = self.script.lock().wait.clone();
        match behavior {
            WaitBehavior::Exit(code) => Ok(code),
            WaitBehavior::Delayed(delay, code) => {
                tokio::time::sleep(delay).await;
                Ok(code)
            }
            WaitBehavior::Forever => std::future::pending().await,
            WaitBehavior::Fail(message) => Err(BoxrunError::DaemonCommunication(message)),
        }
    }

    async fn inspect(&self, _id: &ContainerHandle) -> BoxrunResult<ContainerState> {
        self.record(EngineCall::Inspect);
        Ok(self.script.lock().inspect)
    }

    async fn remove(&self, _id: &ContainerHandle, options: RemoveOptions) -> BoxrunResult<()> {
        self.record(EngineCall::Remove(options));
        match self.script.lock().remove_error.clone() {
            Some(message) => Err(BoxrunError::DaemonCommunication(message)),
            None => Ok(()),
        }
    }

    async fn kill(&self, _id: &ContainerHandle, signal: i32) -> BoxrunResult<()> {
        self.record(EngineCall::Kill(signal));
        Ok(())
    }

    async fn resize(&self, _id: &ContainerHandle, size: TtySize) -> BoxrunResult<()> {
        self.record(EngineCall::Resize(size));
        Ok(())
    }
}

/// Cloneable in-memory writer.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.inner.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Encode one multiplexed stream frame.
pub fn stdcopy_frame(stream: u8, data: &[u8]) -> Vec<u8> {
    let mut out = vec![stream, 0, 0, 0];
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
    out
}

/// Reader whose every read fails with `ConnectionReset`.
struct ResetReader;

impl AsyncRead for ResetReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))
    }
}
