//! Run orchestration.
//!
//! Drives one run end to end: validate, create, attach, start, monitor,
//! resolve the exit status, clean up. Background work (identifier emission,
//! signal forwarding, the attach copy loop, tty size monitoring) runs on
//! spawned tasks; every exit path releases them before `execute` returns.

mod spec;
mod state;
mod status;

pub use spec::{
    ContainerConfig, EndpointSettings, HostConfig, LaunchSpec, NetworkingConfig, RestartPolicy,
    RunFlags, StdStream,
};
pub use state::{RunSession, RunState};
pub use status::{
    ExitSource, ExitStatus, ExitStatusReconciler, ReconcileMode, classify_daemon_error,
};

use crate::attach::{AttachIo, AttachSession, detach_keys};
use crate::cidfile::CidFile;
use crate::engine::{AttachOptions, ContainerHandle, EngineClient, RemoveOptions};
use crate::relay::IoRelay;
use crate::signals::SignalForwarder;
use crate::tty::TtySizeMonitor;
use boxrun_shared::constants::{attach::DEFAULT_DETACH_KEYS, daemon_errors};
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use std::future::Future;
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Run a daemon call under the run's token.
///
/// Cancellation fails the call the way an aborted request would.
pub(crate) async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = BoxrunResult<T>>,
) -> BoxrunResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BoxrunError::DaemonCommunication(
            daemon_errors::CONTEXT_CANCELED.into(),
        )),
        res = fut => res,
    }
}

/// Local standard streams handed to a run.
pub struct RunStreams {
    pub stdin: Box<dyn AsyncRead + Send + Unpin>,
    pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
    pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdin_is_terminal: bool,
    pub stdout_is_terminal: bool,
}

impl RunStreams {
    /// This process's stdin, stdout and stderr.
    pub fn process() -> Self {
        Self {
            stdin_is_terminal: std::io::stdin().is_terminal(),
            stdout_is_terminal: std::io::stdout().is_terminal(),
            stdin: Box::new(tokio::io::stdin()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
        }
    }
}

/// Work that must happen on every exit path once the container exists.
#[derive(Default)]
struct PendingCleanup {
    monitor: Option<(CancellationToken, TtySizeMonitor)>,
    forwarder: Option<SignalForwarder>,
    /// Container to remove. Removal ignores the run's token.
    removal: Option<ContainerHandle>,
}

impl PendingCleanup {
    async fn run<E: EngineClient + ?Sized>(self, engine: &E, session: &mut RunSession) {
        if let Some((token, monitor)) = self.monitor {
            token.cancel();
            monitor.join().await;
        }

        if let Some(forwarder) = self.forwarder {
            forwarder.stop().await;
        }

        if let Some(id) = self.removal {
            let options = RemoveOptions {
                force: true,
                remove_volumes: true,
                remove_links: false,
            };
            match engine.remove(&id, options).await {
                Ok(()) => {
                    tracing::debug!(container_id = %id, "Container removed");
                    if session.state == RunState::Exited {
                        let _ = session.transition_to(RunState::Removed);
                    }
                }
                Err(e) => {
                    tracing::error!(container_id = %id, error = %e, "Error deleting container");
                }
            }
        }
    }
}

/// Executes runs against one engine.
pub struct RunOrchestrator<E: EngineClient + ?Sized> {
    engine: Arc<E>,
    default_detach_keys: String,
    relay: IoRelay,
    session: RunSession,
}

impl<E: EngineClient + ?Sized> RunOrchestrator<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            default_detach_keys: DEFAULT_DETACH_KEYS.to_string(),
            relay: IoRelay::detect(),
            session: RunSession::new(),
        }
    }

    /// Client-wide detach sequence, used when a run has no override.
    pub fn with_default_detach_keys(mut self, keys: impl Into<String>) -> Self {
        self.default_detach_keys = keys.into();
        self
    }

    pub fn with_relay(mut self, relay: IoRelay) -> Self {
        self.relay = relay;
        self
    }

    /// Lifecycle record of the last run.
    pub fn session(&self) -> &RunSession {
        &self.session
    }

    /// Execute one run and return the process exit status.
    ///
    /// A non-zero container exit code is returned as `Ok(code)`. Failures
    /// carry their own status through [`BoxrunError::exit_code`].
    pub async fn execute(
        &mut self,
        mut spec: LaunchSpec,
        streams: RunStreams,
        cancel: &CancellationToken,
    ) -> BoxrunResult<i32> {
        self.session = RunSession::new();

        spec.validate()?;
        spec.normalize();
        let attach = spec.attach_options(&self.default_detach_keys);
        if attach.any() {
            detach_keys::parse(&attach.detach_keys)?;
        }

        // Windows daemons size the console at create time
        if cfg!(windows) && streams.stdout_is_terminal {
            let size = crate::util::get_terminal_size();
            spec.host_config.console_size = [size.rows as u32, size.cols as u32];
        }

        let run_cancel = cancel.child_token();
        let mut cleanup = PendingCleanup::default();
        let result = self
            .drive(&spec, attach, streams, &run_cancel, &mut cleanup)
            .await;

        if let Err(e) = &result {
            tracing::debug!(state = %self.session.state, error = %e, "Run failed");
            self.session.fail();
        }
        cleanup.run(&*self.engine, &mut self.session).await;
        if result.is_ok() && !self.session.state.is_terminal() {
            self.session.transition_to(RunState::Done)?;
        }
        result
    }

    async fn drive(
        &mut self,
        spec: &LaunchSpec,
        attach: AttachOptions,
        streams: RunStreams,
        cancel: &CancellationToken,
        cleanup: &mut PendingCleanup,
    ) -> BoxrunResult<i32> {
        let tty = spec.config.tty;
        let id = self.create_container(spec, cancel).await?;
        self.session.created(id.clone())?;
        if spec.flags.auto_remove {
            cleanup.removal = Some(id.clone());
        }

        if spec.proxies_signals() {
            match SignalForwarder::start(self.engine.clone(), id.clone()) {
                Ok(forwarder) => cleanup.forwarder = Some(forwarder),
                Err(e) => tracing::warn!(error = %e, "Signal forwarding unavailable"),
            }
        }

        let RunStreams {
            stdin,
            stdout,
            stderr,
            stdin_is_terminal,
            stdout_is_terminal,
        } = streams;
        let mut stdout = Some(stdout);

        let display_id = if attach.has_output() {
            None
        } else {
            stdout.take().map(|out| emit_id(out, &id))
        };

        let mut session = None;
        if attach.any() {
            let io = AttachIo {
                stdin: attach.stdin.then_some(stdin),
                stdout: if tty {
                    stdout.take()
                } else {
                    stdout.take().filter(|_| attach.stdout)
                },
                stderr: if tty {
                    None
                } else {
                    Some(stderr).filter(|_| attach.stderr)
                },
                stdin_is_terminal,
            };
            session = Some(
                AttachSession::open(
                    &*self.engine,
                    &id,
                    &attach,
                    tty,
                    io,
                    self.relay,
                    cancel,
                )
                .await?,
            );
        }

        self.session.transition_to(RunState::Starting)?;
        if let Err(e) = until_cancelled(cancel, self.engine.start(&id)).await {
            if let Some(session) = session.take() {
                if let Err(attach_err) = session.cancel_and_wait().await {
                    tracing::debug!(error = %attach_err, "Attach ended after failed start");
                }
            }
            return Err(classify_daemon_error(&e));
        }
        self.session.transition_to(RunState::Started)?;

        if attach.any() && tty && stdout_is_terminal {
            let token = cancel.child_token();
            let monitor = TtySizeMonitor::start(self.engine.clone(), id.clone(), &token).await;
            cleanup.monitor = Some((token, monitor));
        }

        if let Some(session) = session {
            self.session.transition_to(RunState::Attached)?;
            if let Err(e) = session.wait().await {
                tracing::debug!(error = %e, "Error hijack");
                return Err(e);
            }
        }

        if !attach.has_output() {
            if let Some(display_id) = display_id {
                match display_id.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "Failed to print container ID"),
                    Err(e) => tracing::warn!(error = %e, "Container ID task failed"),
                }
            }
            return Ok(0);
        }

        self.session.transition_to(RunState::WaitingExit)?;
        let mode = ReconcileMode {
            auto_remove: spec.flags.auto_remove,
            tty,
        };
        let status = ExitStatusReconciler::new(&*self.engine)
            .reconcile(&id, mode, cancel)
            .await?;
        self.session.transition_to(RunState::Exited)?;
        tracing::debug!(
            container_id = %id,
            code = status.code,
            source = ?status.source,
            "Run exited"
        );
        Ok(status.code)
    }

    /// Create the container, committing its identifier to the CID file.
    ///
    /// Every failure here, CID file included, is classified into an exit code.
    async fn create_container(
        &self,
        spec: &LaunchSpec,
        cancel: &CancellationToken,
    ) -> BoxrunResult<ContainerHandle> {
        let mut cid_file = spec
            .host_config
            .container_id_file
            .as_deref()
            .map(|path| CidFile::create(path))
            .transpose()
            .map_err(|e| classify_daemon_error(&e))?;

        let result = match until_cancelled(cancel, self.engine.create(spec)).await {
            Ok(created) => {
                for warning in created.warnings.iter().flatten() {
                    tracing::warn!("WARNING: {}", warning);
                }
                let id = ContainerHandle::new(created.id);
                match cid_file.as_mut() {
                    Some(cid) => cid
                        .write(id.as_str())
                        .map(|()| id)
                        .map_err(|e| classify_daemon_error(&e)),
                    None => Ok(id),
                }
            }
            Err(e) => Err(classify_daemon_error(&e)),
        };

        if let Some(mut cid) = cid_file {
            if let Err(e) = cid.close() {
                tracing::error!(error = %e, "Failed to close CID file");
            }
        }

        if let Ok(id) = &result {
            tracing::info!(container_id = %id, image = %spec.config.image, "Container created");
        }
        result
    }
}

/// Print the container identifier without blocking the run.
fn emit_id(
    mut out: Box<dyn AsyncWrite + Send + Unpin>,
    id: &ContainerHandle,
) -> JoinHandle<std::io::Result<()>> {
    let line = format!("{}\n", id);
    tokio::spawn(async move {
        out.write_all(line.as_bytes()).await?;
        out.flush().await
    })
}
