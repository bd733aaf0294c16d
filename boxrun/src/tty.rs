//! Terminal size propagation.

use crate::engine::{ContainerHandle, EngineClient, TtySize};
use crate::util::detect_terminal_size;
use boxrun_shared::constants::attach::RESIZE_POLL_INTERVAL_MS;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type SizeSource = Box<dyn Fn() -> TtySize + Send + Sync>;

/// Pushes local terminal size changes to a container's pseudo-terminal.
///
/// Resize failures are logged and never end the monitor.
pub struct TtySizeMonitor {
    task: JoinHandle<()>,
}

impl TtySizeMonitor {
    /// Push the current size, then follow changes until `cancel` fires.
    ///
    /// Changes are detected from SIGWINCH on unix and by polling elsewhere.
    pub async fn start<E: EngineClient + ?Sized>(
        engine: Arc<E>,
        id: ContainerHandle,
        cancel: &CancellationToken,
    ) -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match signal(SignalKind::window_change()) {
                Ok(mut winch) => {
                    let source: SizeSource = Box::new(detect_terminal_size);
                    let last = push(&*engine, &id, &source, None).await;
                    let cancel = cancel.clone();
                    let task = tokio::spawn(async move {
                        let mut last = last;
                        loop {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                received = winch.recv() => {
                                    if received.is_none() {
                                        break;
                                    }
                                    last = push(&*engine, &id, &source, last).await;
                                }
                            }
                        }
                    });
                    return Self { task };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGWINCH unavailable, polling terminal size");
                }
            }
        }

        Self::polling(
            engine,
            id,
            detect_terminal_size,
            Duration::from_millis(RESIZE_POLL_INTERVAL_MS),
            cancel,
        )
        .await
    }

    /// Push the size from `source`, then re-read it every `interval` and push
    /// it when it differs from the last pushed size.
    pub async fn polling<E, F>(
        engine: Arc<E>,
        id: ContainerHandle,
        source: F,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Self
    where
        E: EngineClient + ?Sized,
        F: Fn() -> TtySize + Send + Sync + 'static,
    {
        let source: SizeSource = Box::new(source);
        let last = push(&*engine, &id, &source, None).await;
        let cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let mut last = last;
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        last = push(&*engine, &id, &source, last).await;
                    }
                }
            }
        });
        Self { task }
    }

    /// Wait for the monitor to exit after its token was cancelled.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "TTY size monitor failed");
        }
    }
}

/// Push the current size if it changed. An undetectable size reads as 0x0
/// and is skipped. Returns the last size the daemon accepted.
async fn push<E: EngineClient + ?Sized>(
    engine: &E,
    id: &ContainerHandle,
    source: &SizeSource,
    last: Option<TtySize>,
) -> Option<TtySize> {
    let size = source();
    if last == Some(size) || (size.rows == 0 && size.cols == 0) {
        return last;
    }

    match engine.resize(id, size).await {
        Ok(()) => {
            tracing::debug!(container_id = %id, rows = size.rows, cols = size.cols, "Resized tty");
            Some(size)
        }
        Err(e) => {
            tracing::debug!(container_id = %id, error = %e, "Error resize");
            last
        }
    }
}
