//! Attach session against a scripted engine.

use boxrun::{AttachIo, AttachOptions, AttachSession, BoxrunError, ContainerHandle, IoRelay};
use boxrun_test_utils::{FakeEngine, SharedBuffer, stdcopy_frame};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

// ============================================================================
// TEST FIXTURES
// ============================================================================

fn id() -> ContainerHandle {
    ContainerHandle::new("c0ffee")
}

fn output_only() -> AttachOptions {
    AttachOptions {
        stdout: true,
        stderr: true,
        detach_keys: "ctrl-p,ctrl-q".into(),
        ..Default::default()
    }
}

async fn open(
    engine: &FakeEngine,
    options: &AttachOptions,
    tty: bool,
    io: AttachIo,
) -> AttachSession {
    AttachSession::open(
        engine,
        &id(),
        options,
        tty,
        io,
        IoRelay::native(),
        &CancellationToken::new(),
    )
    .await
    .expect("attach should open")
}

// ============================================================================
// OUTPUT
// ============================================================================

#[tokio::test]
async fn non_tty_output_is_demuxed() {
    let mut wire = stdcopy_frame(1, b"hello ");
    wire.extend(stdcopy_frame(2, b"oops"));
    wire.extend(stdcopy_frame(1, b"world"));
    let engine = FakeEngine::new().with_attach_output(wire);

    let out = SharedBuffer::new();
    let err = SharedBuffer::new();
    let io = AttachIo {
        stdout: Some(Box::new(out.clone())),
        stderr: Some(Box::new(err.clone())),
        ..Default::default()
    };

    open(&engine, &output_only(), false, io).await.wait().await.unwrap();

    assert_eq!(out.contents(), b"hello world");
    assert_eq!(err.contents(), b"oops");
}

#[tokio::test]
async fn tty_output_is_copied_raw() {
    let engine = FakeEngine::new().with_attach_output(b"\x1b[1mbold\r\n".to_vec());
    let out = SharedBuffer::new();
    let io = AttachIo {
        stdout: Some(Box::new(out.clone())),
        ..Default::default()
    };

    open(&engine, &output_only(), true, io).await.wait().await.unwrap();

    assert_eq!(out.contents(), b"\x1b[1mbold\r\n");
}

#[tokio::test]
async fn corrupt_stream_is_attach_failure() {
    let engine = FakeEngine::new().with_attach_output(vec![9, 0, 0, 0, 0, 0, 0, 1, b'x']);
    let io = AttachIo {
        stdout: Some(Box::new(SharedBuffer::new())),
        ..Default::default()
    };

    let result = open(&engine, &output_only(), false, io).await.wait().await;
    assert!(matches!(result, Err(BoxrunError::AttachFailure(_))));
}

#[tokio::test]
async fn reset_inside_a_frame_is_attach_failure() {
    let mut wire = stdcopy_frame(1, b"partial output ");
    wire.extend([1u8, 0, 0]);
    let engine = FakeEngine::new().with_attach_output_then_reset(wire);
    let out = SharedBuffer::new();
    let io = AttachIo {
        stdout: Some(Box::new(out.clone())),
        ..Default::default()
    };

    let result = open(&engine, &output_only(), false, io).await.wait().await;
    assert!(matches!(result, Err(BoxrunError::AttachFailure(_))));
    assert_eq!(out.text(), "partial output ");
}

#[tokio::test]
async fn reset_after_last_frame_ends_cleanly() {
    let engine = FakeEngine::new().with_attach_output_then_reset(stdcopy_frame(1, b"all of it"));
    let out = SharedBuffer::new();
    let io = AttachIo {
        stdout: Some(Box::new(out.clone())),
        ..Default::default()
    };

    open(&engine, &output_only(), false, io).await.wait().await.unwrap();
    assert_eq!(out.text(), "all of it");
}

#[tokio::test]
async fn reset_ends_raw_tty_output_cleanly() {
    let engine = FakeEngine::new().with_attach_output_then_reset(b"$ exit\r\n".to_vec());
    let out = SharedBuffer::new();
    let io = AttachIo {
        stdout: Some(Box::new(out.clone())),
        ..Default::default()
    };

    open(&engine, &output_only(), true, io).await.wait().await.unwrap();
    assert_eq!(out.contents(), b"$ exit\r\n");
}

// ============================================================================
// INPUT
// ============================================================================

#[tokio::test]
async fn stdin_is_forwarded_then_closed() {
    let engine = FakeEngine::new().hold_attach_open();
    let options = AttachOptions {
        stdin: true,
        detach_keys: "ctrl-p,ctrl-q".into(),
        ..Default::default()
    };
    let io = AttachIo {
        stdin: Some(Box::new(std::io::Cursor::new(b"echo hi\n".to_vec()))),
        ..Default::default()
    };

    // No output wired: the session ends once stdin is exhausted
    open(&engine, &options, false, io).await.wait().await.unwrap();

    let mut daemon = engine.take_daemon_end().expect("daemon end");
    let mut received = Vec::new();
    daemon.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"echo hi\n");
}

#[tokio::test]
async fn legacy_console_filters_stdin_for_tty() {
    let engine = FakeEngine::new().hold_attach_open();
    let options = AttachOptions {
        stdin: true,
        detach_keys: "ctrl-p,ctrl-q".into(),
        ..Default::default()
    };
    let io = AttachIo {
        stdin: Some(Box::new(std::io::Cursor::new(b"ab\x7f\n".to_vec()))),
        ..Default::default()
    };

    let session = AttachSession::open(
        &engine,
        &id(),
        &options,
        true,
        io,
        IoRelay::windows(Some(10586)),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    session.wait().await.unwrap();

    let mut daemon = engine.take_daemon_end().expect("daemon end");
    let mut received = Vec::new();
    daemon.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"ab\x08\n");
}

// ============================================================================
// COMPLETION
// ============================================================================

#[tokio::test]
async fn cancel_unblocks_pending_copy() {
    let engine = FakeEngine::new().hold_attach_open();
    let io = AttachIo {
        stdout: Some(Box::new(SharedBuffer::new())),
        ..Default::default()
    };
    let session = open(&engine, &output_only(), false, io).await;

    let result = tokio::time::timeout(Duration::from_secs(5), session.cancel_and_wait())
        .await
        .expect("session did not resolve after cancel");
    assert!(result.is_ok());
}

#[tokio::test]
async fn parent_token_cancels_session() {
    let engine = FakeEngine::new().hold_attach_open();
    let io = AttachIo {
        stdout: Some(Box::new(SharedBuffer::new())),
        ..Default::default()
    };
    let run = CancellationToken::new();
    let session = AttachSession::open(
        &engine,
        &id(),
        &output_only(),
        false,
        io,
        IoRelay::native(),
        &run,
    )
    .await
    .unwrap();

    run.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), session.wait())
        .await
        .expect("session did not resolve after run cancel");
    assert!(result.is_ok());
}

#[tokio::test]
async fn handshake_error_reported_after_clean_copy() {
    let engine = FakeEngine::new()
        .with_attach_output(Vec::new())
        .with_attach_handshake_error("container is not running");
    let io = AttachIo {
        stdout: Some(Box::new(SharedBuffer::new())),
        ..Default::default()
    };

    let err = open(&engine, &output_only(), false, io)
        .await
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, BoxrunError::AttachFailure(ref m) if m.contains("not running")));
}

#[tokio::test]
async fn attach_setup_failure_is_attach_failure() {
    let engine = FakeEngine::new().fail_attach("Error response from daemon: No such container");
    let err = AttachSession::open(
        &engine,
        &id(),
        &output_only(),
        false,
        AttachIo::default(),
        IoRelay::native(),
        &CancellationToken::new(),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, BoxrunError::AttachFailure(ref m) if m.contains("No such container")));
}

#[tokio::test]
async fn invalid_detach_keys_fail_before_attach() {
    let engine = FakeEngine::new();
    let options = AttachOptions {
        stdout: true,
        detach_keys: "ctrl-1".into(),
        ..Default::default()
    };
    let err = AttachSession::open(
        &engine,
        &id(),
        &options,
        false,
        AttachIo::default(),
        IoRelay::native(),
        &CancellationToken::new(),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, BoxrunError::InvalidArgument(_)));
    assert!(engine.calls().is_empty());
}
