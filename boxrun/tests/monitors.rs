//! Signal forwarding and tty size propagation.

use boxrun::{ContainerHandle, SignalForwarder, TtySize, TtySizeMonitor};
use boxrun_test_utils::FakeEngine;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// TEST FIXTURES
// ============================================================================

fn id() -> ContainerHandle {
    ContainerHandle::new("c0ffee")
}

/// Poll `check` until it holds or a second has passed.
async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ============================================================================
// SIGNAL FORWARDER
// ============================================================================

#[tokio::test]
async fn forwards_signals_in_order() {
    let engine = Arc::new(FakeEngine::new());
    let (tx, rx) = mpsc::unbounded_channel();
    let forwarder = SignalForwarder::from_channel(engine.clone(), id(), rx);

    for signal in [2, 15, 10] {
        tx.send(signal).unwrap();
    }
    assert!(eventually(|| engine.kills().len() == 3).await);
    forwarder.stop().await;

    assert_eq!(engine.kills(), vec![2, 15, 10]);
}

#[tokio::test]
async fn nothing_forwarded_after_stop() {
    let engine = Arc::new(FakeEngine::new());
    let (tx, rx) = mpsc::unbounded_channel();
    let forwarder = SignalForwarder::from_channel(engine.clone(), id(), rx);

    tx.send(1).unwrap();
    assert!(eventually(|| engine.kills() == vec![1]).await);

    forwarder.stop().await;
    // The receiver is gone once stop returns
    assert!(tx.send(15).is_err());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.kills(), vec![1]);
}

#[cfg(unix)]
#[tokio::test]
async fn host_signal_reaches_container_until_stop() {
    let engine = Arc::new(FakeEngine::new());
    let forwarder = SignalForwarder::start(engine.clone(), id()).unwrap();

    signal_hook::low_level::raise(libc::SIGUSR1).unwrap();
    assert!(eventually(|| engine.kills() == vec![libc::SIGUSR1]).await);

    forwarder.stop().await;
    assert_eq!(engine.kills(), vec![libc::SIGUSR1]);
}

/// Set in the child process spawned by `stop_restores_default_signal_action`.
#[cfg(unix)]
const SIGNAL_CHILD_ENV: &str = "BOXRUN_SIGNAL_CHILD";

#[cfg(unix)]
#[tokio::test]
async fn stop_restores_default_signal_action() {
    use std::os::unix::process::ExitStatusExt;

    if std::env::var_os(SIGNAL_CHILD_ENV).is_some() {
        let engine = Arc::new(FakeEngine::new());
        SignalForwarder::start(engine, id()).unwrap().stop().await;
        signal_hook::low_level::raise(libc::SIGTERM).unwrap();
        // Reached only if SIGTERM is still swallowed
        tokio::time::sleep(Duration::from_secs(2)).await;
        return;
    }

    let status = std::process::Command::new(std::env::current_exe().unwrap())
        .args([
            "stop_restores_default_signal_action",
            "--exact",
            "--test-threads=1",
        ])
        .env(SIGNAL_CHILD_ENV, "1")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap();

    assert!(
        status.signal() == Some(libc::SIGTERM) || status.code() == Some(128 + libc::SIGTERM),
        "child survived SIGTERM after stop: {:?}",
        status
    );
}

// ============================================================================
// TTY SIZE MONITOR
// ============================================================================

#[tokio::test]
async fn pushes_initial_size_then_changes_only() {
    let engine = Arc::new(FakeEngine::new());
    let size = Arc::new(Mutex::new(TtySize { rows: 24, cols: 80 }));
    let cancel = CancellationToken::new();

    let source = size.clone();
    let monitor = TtySizeMonitor::polling(
        engine.clone(),
        id(),
        move || *source.lock(),
        Duration::from_millis(10),
        &cancel,
    )
    .await;

    // Initial push happens before polling returns
    assert_eq!(engine.resizes(), vec![TtySize { rows: 24, cols: 80 }]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.resizes().len(), 1, "unchanged size must not be pushed");

    *size.lock() = TtySize { rows: 50, cols: 132 };
    assert!(eventually(|| engine.resizes().len() == 2).await);

    cancel.cancel();
    monitor.join().await;
    assert_eq!(
        engine.resizes(),
        vec![TtySize { rows: 24, cols: 80 }, TtySize { rows: 50, cols: 132 }]
    );
}

#[tokio::test]
async fn zero_size_is_not_pushed() {
    let engine = Arc::new(FakeEngine::new());
    let cancel = CancellationToken::new();
    let monitor = TtySizeMonitor::polling(
        engine.clone(),
        id(),
        || TtySize { rows: 0, cols: 0 },
        Duration::from_millis(10),
        &cancel,
    )
    .await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    cancel.cancel();
    monitor.join().await;
    assert!(engine.resizes().is_empty());
}

#[tokio::test]
async fn undetectable_terminal_pushes_nothing() {
    let engine = Arc::new(FakeEngine::new());
    let cancel = CancellationToken::new();
    let monitor = TtySizeMonitor::polling(
        engine.clone(),
        id(),
        boxrun::util::detect_terminal_size,
        Duration::from_millis(10),
        &cancel,
    )
    .await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    cancel.cancel();
    monitor.join().await;

    let detected = boxrun::util::detect_terminal_size();
    if detected.rows == 0 && detected.cols == 0 {
        assert!(engine.resizes().is_empty());
    } else {
        assert!(engine.resizes().iter().all(|size| size.rows > 0 || size.cols > 0));
    }
}
