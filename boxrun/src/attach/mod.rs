//! Attach session.
//!
//! Opens the container's hijacked connection and drives the copy loop on a
//! background task. The task exclusively owns the connection and the local
//! standard streams, and publishes exactly one result.
//!
//! - `stdcopy`: demux of the multiplexed non-tty output stream
//! - `terminal`: raw mode for local stdin
//! - `detach_keys`: detach sequence parsing

pub mod detach_keys;
pub mod stdcopy;
pub mod terminal;

use crate::engine::{AttachOptions, ContainerHandle, EngineClient, HijackedStream};
use crate::relay::IoRelay;
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use std::io;
use terminal::RawTerminal;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Local ends of an attach.
///
/// A stream is present iff it is wired. For tty sessions stderr is merged
/// into `stdout` by the caller and `stderr` is `None`.
#[derive(Default)]
pub struct AttachIo {
    pub stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub stdout: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    pub stderr: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    /// Local stdin is a terminal; tty sessions switch it to raw mode.
    pub stdin_is_terminal: bool,
}

impl AttachIo {
    fn has_output(&self) -> bool {
        self.stdout.is_some() || self.stderr.is_some()
    }
}

/// A running attach.
pub struct AttachSession {
    result_rx: oneshot::Receiver<BoxrunResult<()>>,
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl AttachSession {
    /// Hijack the container's streams and start the copy loop.
    ///
    /// `cancel` scopes the session: cancelling it (or its parent) unblocks a
    /// pending copy and resolves the session cleanly.
    pub async fn open<E: EngineClient + ?Sized>(
        engine: &E,
        id: &ContainerHandle,
        options: &AttachOptions,
        tty: bool,
        io: AttachIo,
        relay: IoRelay,
        cancel: &CancellationToken,
    ) -> BoxrunResult<Self> {
        detach_keys::parse(&options.detach_keys)?;

        let stream = tokio::select! {
            res = engine.attach(id, options) => res.map_err(|e| match e {
                BoxrunError::AttachFailure(_) => e,
                other => BoxrunError::AttachFailure(other.to_string()),
            })?,
            _ = cancel.cancelled() => {
                return Err(BoxrunError::AttachFailure("attach cancelled".into()));
            }
        };
        tracing::debug!(
            container_id = %id,
            stdin = options.stdin,
            stdout = options.stdout,
            stderr = options.stderr,
            tty,
            "Attach stream connected"
        );

        let cancel = cancel.child_token();
        let (result_tx, result_rx) = oneshot::channel();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let result = hold_connection(stream, io, tty, relay, &task_cancel).await;
            // Terminal mode is restored inside hold_connection before this send.
            let _ = result_tx.send(result);
        });

        Ok(Self {
            result_rx,
            task,
            cancel,
        })
    }

    /// Ask the copy loop to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the copy loop has finished and return its result.
    pub async fn wait(self) -> BoxrunResult<()> {
        let result = self.result_rx.await.unwrap_or_else(|_| {
            Err(BoxrunError::Internal(
                "attach task ended without a result".into(),
            ))
        });
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Attach task did not finish cleanly");
        }
        result
    }

    /// Cancel and block until the task has released the terminal.
    pub async fn cancel_and_wait(self) -> BoxrunResult<()> {
        self.cancel();
        self.wait().await
    }
}

/// Copy between the hijacked connection and local streams until output ends,
/// input ends with no output wired, or the session is cancelled.
async fn hold_connection(
    stream: HijackedStream,
    io: AttachIo,
    tty: bool,
    relay: IoRelay,
    cancel: &CancellationToken,
) -> BoxrunResult<()> {
    let HijackedStream {
        mut reader,
        writer,
        handshake_error,
    } = stream;
    let has_output = io.has_output();
    let AttachIo {
        stdin,
        mut stdout,
        mut stderr,
        stdin_is_terminal,
    } = io;

    let _raw = if stdin.is_some() && tty && stdin_is_terminal {
        Some(RawTerminal::enable()?)
    } else {
        None
    };

    let mut writer = relay.wrap_stdin_writer(writer, tty);
    let stdin = stdin.map(|r| relay.wrap_input(r));

    let output = async {
        if !has_output {
            return std::future::pending::<io::Result<()>>().await;
        }
        if tty {
            if let Some(dst) = stdout.as_mut().or(stderr.as_mut()) {
                // Raw output has no framing, so a dropped connection ends it
                match tokio::io::copy(&mut reader, dst).await {
                    Ok(_) => {}
                    Err(e) if stdcopy::is_connection_closed(e.kind()) => {
                        tracing::debug!(error = %e, "Connection closed after stream end");
                    }
                    Err(e) => return Err(e),
                }
                dst.flush().await?;
            }
            Ok(())
        } else {
            let stats = stdcopy::demux(&mut reader, stdout.as_mut(), stderr.as_mut()).await?;
            tracing::trace!(stdout = stats.stdout, stderr = stats.stderr, "Output stream drained");
            Ok(())
        }
    };

    let input = async {
        if let Some(mut stdin) = stdin {
            if let Err(e) = tokio::io::copy(&mut stdin, &mut writer).await {
                tracing::debug!(error = %e, "Error sendStdin");
            }
        }
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(error = %e, "Couldn't send EOF");
        }
    };

    tokio::pin!(output, input);

    let copied: BoxrunResult<()> = tokio::select! {
        res = &mut output => res.map_err(copy_error),
        _ = &mut input => {
            if has_output {
                tokio::select! {
                    res = &mut output => res.map_err(copy_error),
                    _ = cancel.cancelled() => Err(BoxrunError::InternalCancel),
                }
            } else {
                Ok(())
            }
        }
        _ = cancel.cancelled() => Err(BoxrunError::InternalCancel),
    };

    match copied {
        Ok(()) => match handshake_error {
            Some(message) => Err(BoxrunError::AttachFailure(message)),
            None => Ok(()),
        },
        Err(e) if e.is_cancel() => {
            tracing::debug!("Attach session cancelled");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Transport failures that reach the session end it with `AttachFailure`.
fn copy_error(err: io::Error) -> BoxrunError {
    BoxrunError::AttachFailure(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_fail_the_session() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::InvalidData,
        ] {
            assert!(matches!(
                copy_error(io::Error::new(kind, "broken")),
                BoxrunError::AttachFailure(_)
            ));
        }
    }

    #[test]
    fn output_presence() {
        assert!(!AttachIo::default().has_output());
        let io = AttachIo {
            stderr: Some(Box::new(Vec::<u8>::new())),
            ..Default::default()
        };
        assert!(io.has_output());
    }
}
