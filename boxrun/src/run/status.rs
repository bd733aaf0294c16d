//! Exit status resolution.
//!
//! Maps daemon failures onto process exit codes and decides which daemon
//! call supplies the container's final exit code.

use super::until_cancelled;
use crate::engine::{ContainerHandle, EngineClient};
use boxrun_shared::constants::{daemon_errors, exit_codes};
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use tokio_util::sync::CancellationToken;

/// Classify a create/start/wait failure into a process exit code.
///
/// - `127`: command not found
/// - `126`: command could not be invoked
/// - `125`: any other daemon failure
///
/// The daemon text is matched after stripping the client envelope prefix.
/// Observable exit codes depend on this matching, so it stays textual.
pub fn classify_daemon_error(err: &BoxrunError) -> BoxrunError {
    let text = err.to_string();
    let trimmed = text
        .strip_prefix(daemon_errors::ENVELOPE_PREFIX)
        .unwrap_or(&text);

    let mut code = exit_codes::DAEMON_FAILURE;
    if trimmed.starts_with(daemon_errors::COMMAND_PREFIX) {
        if trimmed.contains(daemon_errors::COMMAND_NOT_FOUND) {
            code = exit_codes::COMMAND_NOT_FOUND;
        } else if trimmed.contains(daemon_errors::COMMAND_NOT_INVOKABLE) {
            code = exit_codes::COMMAND_NOT_INVOKABLE;
        }
    }

    BoxrunError::Status {
        code,
        message: trimmed.to_string(),
    }
}

/// Which daemon call produced an exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitSource {
    /// The blocking wait call.
    Wait,
    /// A point-in-time inspect call.
    Inspect,
}

/// Final exit code of the container and where it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i32,
    pub source: ExitSource,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// How the run was attached, which decides the reconciliation strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcileMode {
    pub auto_remove: bool,
    pub tty: bool,
}

/// Resolves the exit status of an attached run.
pub struct ExitStatusReconciler<'a, E: EngineClient + ?Sized> {
    engine: &'a E,
}

impl<'a, E: EngineClient + ?Sized> ExitStatusReconciler<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    /// Resolve the exit status for `id`.
    ///
    /// - auto-remove: wait for exit, then take the code from inspect. A wait
    ///   failure is classified like a create/start failure.
    /// - non-tty: the wait call's code. No interactive detach can happen.
    /// - tty without auto-remove: the inspect call's code. If the container's
    ///   state changes between the end of the attach session and the inspect,
    ///   a stale code can be reported. This race is accepted.
    pub async fn reconcile(
        &self,
        id: &ContainerHandle,
        mode: ReconcileMode,
        cancel: &CancellationToken,
    ) -> BoxrunResult<ExitStatus> {
        if mode.auto_remove {
            let waited = until_cancelled(cancel, self.engine.wait(id))
                .await
                .map_err(|e| classify_daemon_error(&e))?;
            tracing::debug!(container_id = %id, code = waited, "Container exited, inspecting");
            return self.inspect_code(id, cancel).await;
        }

        if !mode.tty {
            let code = until_cancelled(cancel, self.engine.wait(id)).await?;
            return Ok(ExitStatus {
                code,
                source: ExitSource::Wait,
            });
        }

        self.inspect_code(id, cancel).await
    }

    async fn inspect_code(
        &self,
        id: &ContainerHandle,
        cancel: &CancellationToken,
    ) -> BoxrunResult<ExitStatus> {
        let state = until_cancelled(cancel, self.engine.inspect(id)).await?;
        if state.running {
            tracing::debug!(container_id = %id, "Container still running at inspect");
        }
        Ok(ExitStatus {
            code: state.exit_code,
            source: ExitSource::Inspect,
        })
    }
}
