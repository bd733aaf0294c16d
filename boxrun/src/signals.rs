//! Host signal forwarding.
//!
//! While a non-tty run is attached, signals delivered to this process are
//! relayed to the container's main process through the engine's kill call,
//! in the order they were received. Stopping the forwarder hands those
//! signals back to their default disposition.

use crate::engine::{ContainerHandle, EngineClient};
use boxrun_shared::errors::BoxrunResult;
use std::sync::Arc;
#[cfg(unix)]
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Signals relayed to the container.
///
/// SIGCHLD and SIGPIPE concern this process only. SIGKILL and SIGSTOP cannot
/// be caught.
#[cfg(unix)]
const FORWARDED: &[i32] = &[
    libc::SIGHUP,
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTERM,
    libc::SIGUSR1,
    libc::SIGUSR2,
    libc::SIGALRM,
    libc::SIGCONT,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
    libc::SIGURG,
    libc::SIGXCPU,
    libc::SIGXFSZ,
    libc::SIGVTALRM,
    libc::SIGPROF,
    libc::SIGWINCH,
    libc::SIGIO,
    libc::SIGSYS,
];

/// Default-action hooks left armed by closed listeners.
#[cfg(unix)]
static RESTORED_DEFAULTS: parking_lot::Mutex<Vec<signal_hook::SigId>> =
    parking_lot::const_mutex(Vec::new());

#[cfg(unix)]
struct Listener {
    handle: signal_hook::iterator::Handle,
    thread: std::thread::JoinHandle<()>,
    /// Once set, forwarded signals get their default action again.
    released: Arc<AtomicBool>,
    defaults: Vec<signal_hook::SigId>,
}

#[cfg(unix)]
impl Listener {
    fn spawn(tx: mpsc::UnboundedSender<i32>) -> BoxrunResult<Self> {
        // A previous listener's defaults would fire alongside this one
        for id in RESTORED_DEFAULTS.lock().drain(..) {
            signal_hook::low_level::unregister(id);
        }

        let released = Arc::new(AtomicBool::new(false));
        let mut defaults = Vec::with_capacity(FORWARDED.len());
        for &signal in FORWARDED {
            defaults.push(signal_hook::flag::register_conditional_default(
                signal,
                Arc::clone(&released),
            )?);
        }

        let mut signals = signal_hook::iterator::Signals::new(FORWARDED)?;
        let handle = signals.handle();
        let thread = std::thread::Builder::new()
            .name("boxrun-signals".into())
            .spawn(move || {
                for signal in signals.forever() {
                    if tx.send(signal).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            handle,
            thread,
            released,
            defaults,
        })
    }

    async fn close(self) {
        self.released.store(true, Ordering::SeqCst);
        RESTORED_DEFAULTS.lock().extend(self.defaults);

        self.handle.close();
        let thread = self.thread;
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            _ => tracing::warn!("Signal listener thread did not exit cleanly"),
        }
    }
}

/// Ctrl-C is the only host signal available off unix.
#[cfg(not(unix))]
struct Listener {
    task: JoinHandle<()>,
}

#[cfg(not(unix))]
impl Listener {
    const SIGINT: i32 = 2;

    fn spawn(tx: mpsc::UnboundedSender<i32>) -> BoxrunResult<Self> {
        let task = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(Self::SIGINT).is_err() {
                    break;
                }
            }
        });
        Ok(Self { task })
    }

    async fn close(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Relays received signals to one container until stopped.
pub struct SignalForwarder {
    stop: CancellationToken,
    task: JoinHandle<()>,
    listener: Option<Listener>,
}

impl SignalForwarder {
    /// Subscribe to host signals and start forwarding them to `id`.
    pub fn start<E: EngineClient + ?Sized>(
        engine: Arc<E>,
        id: ContainerHandle,
    ) -> BoxrunResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Listener::spawn(tx)?;
        let mut forwarder = Self::from_channel(engine, id, rx);
        forwarder.listener = Some(listener);
        Ok(forwarder)
    }

    /// Forward signal numbers read from `rx` instead of host signals.
    pub fn from_channel<E: EngineClient + ?Sized>(
        engine: Arc<E>,
        id: ContainerHandle,
        rx: mpsc::UnboundedReceiver<i32>,
    ) -> Self {
        let stop = CancellationToken::new();
        let task = tokio::spawn(forward(engine, id, rx, stop.clone()));
        Self {
            stop,
            task,
            listener: None,
        }
    }

    /// Unsubscribe and wait for the relay to finish.
    ///
    /// A kill call already in flight completes before this returns; nothing
    /// is forwarded afterwards. Host signals get their default action back,
    /// so a later SIGINT or SIGTERM ends this process again.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Some(listener) = self.listener {
            listener.close().await;
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Signal forwarding task failed");
        }
        tracing::debug!("Signal forwarding stopped");
    }
}

async fn forward<E: EngineClient + ?Sized>(
    engine: Arc<E>,
    id: ContainerHandle,
    mut rx: mpsc::UnboundedReceiver<i32>,
    stop: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            signal = rx.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };

        tracing::debug!(container_id = %id, signal, "Forwarding signal");
        if let Err(e) = engine.kill(&id, signal).await {
            tracing::debug!(container_id = %id, signal, error = %e, "Error sending signal");
        }
    }
}
