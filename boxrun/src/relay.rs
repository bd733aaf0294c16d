//! Platform I/O relay.
//!
//! Two pass-through adapters, each with one correction:
//! - [`PipeReader`] surfaces read errors from its source to the consumer
//!   instead of truncating the stream, and closes the source once drained.
//! - [`BackspaceFilter`] rewrites DEL (0x7F) to BACKSPACE (0x08) for tty
//!   sessions on Windows consoles older than build 14350, which treat DEL as
//!   VK_DELETE.
//!
//! [`IoRelay`] picks the variant once, from the detected host console.

use boxrun_shared::constants::console;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HostConsole {
    Native,
    Windows { build: Option<u32> },
}

/// Capability-selected I/O adapters for the attach session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoRelay {
    console: HostConsole,
}

impl IoRelay {
    /// Pure pass-through.
    pub fn native() -> Self {
        Self {
            console: HostConsole::Native,
        }
    }

    /// Windows console with the given OS build, if known.
    pub fn windows(build: Option<u32>) -> Self {
        Self {
            console: HostConsole::Windows { build },
        }
    }

    /// Detect the host console. Called once per process.
    pub fn detect() -> Self {
        if cfg!(windows) {
            let build = sysinfo::System::kernel_version().and_then(|v| v.trim().parse().ok());
            tracing::debug!(?build, "Detected Windows console");
            Self::windows(build)
        } else {
            Self::native()
        }
    }

    /// Whether DEL must be rewritten for this session.
    pub fn fixes_backspace(&self, tty: bool) -> bool {
        match self.console {
            HostConsole::Windows { build: Some(build) } => {
                tty && build < console::BACKSPACE_FIXED_BUILD
            }
            _ => false,
        }
    }

    /// Wrap a local input source.
    pub fn wrap_input(&self, reader: BoxedReader) -> BoxedReader {
        match self.console {
            HostConsole::Native => reader,
            HostConsole::Windows { .. } => Box::new(PipeReader::spawn(reader)),
        }
    }

    /// Wrap the writer carrying local stdin into the container.
    pub fn wrap_stdin_writer(&self, writer: BoxedWriter, tty: bool) -> BoxedWriter {
        if self.fixes_backspace(tty) {
            Box::new(BackspaceFilter::new(writer))
        } else {
            writer
        }
    }
}

impl Default for IoRelay {
    fn default() -> Self {
        Self::native()
    }
}

/// Reader fed by a background task that drains a source.
///
/// A read error on the source is returned from the next read on this
/// reader. The source is dropped (closed) once it reports EOF or an error.
pub struct PipeReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl PipeReader {
    /// Start draining `source`. Must be called inside a tokio runtime.
    pub fn spawn<R>(mut source: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                match source.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(buf[..n].to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
            drop(source);
        });

        Self {
            rx,
            chunk: Vec::new(),
            pos: 0,
        }
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if self.pos < self.chunk.len() {
                let n = buf.remaining().min(self.chunk.len() - self.pos);
                let start = self.pos;
                buf.put_slice(&self.chunk[start..start + n]);
                self.pos += n;
                return Poll::Ready(Ok(()));
            }

            match ready!(self.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

/// Writer that rewrites DEL to BACKSPACE.
pub struct BackspaceFilter<W> {
    inner: W,
}

impl<W> BackspaceFilter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Copy of `buf` with every DEL replaced by BACKSPACE.
pub fn remap_del(buf: &[u8]) -> Vec<u8> {
    buf.iter()
        .map(|&b| if b == console::DEL { console::BACKSPACE } else { b })
        .collect()
}

impl<W: AsyncWrite + Unpin> AsyncWrite for BackspaceFilter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        // Same length in and out, so the inner count maps 1:1 onto `buf`.
        let mapped = remap_del(buf);
        Pin::new(&mut self.inner).poll_write(cx, &mapped)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::io::AsyncWriteExt;

    /// Yields its data once, then fails.
    struct FailAfter {
        data: Option<Vec<u8>>,
        dropped: Arc<AtomicBool>,
    }

    impl AsyncRead for FailAfter {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.data.take() {
                Some(data) => {
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "source broke",
                ))),
            }
        }
    }

    impl Drop for FailAfter {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn pipe_reader_surfaces_source_errors() {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = FailAfter {
            data: Some(b"partial".to_vec()),
            dropped: dropped.clone(),
        };
        let mut reader = PipeReader::spawn(source);

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(out, b"partial");

        // Channel closes only after the source has been dropped
        let mut rest = [0u8; 8];
        assert_eq!(reader.read(&mut rest).await.unwrap(), 0);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn pipe_reader_passes_data_through() {
        let mut reader = PipeReader::spawn(Cursor::new(b"hello world".to_vec()));
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn backspace_filter_rewrites_del() {
        let mut filter = BackspaceFilter::new(Vec::new());
        filter.write_all(b"ab\x7fc\x7f").await.unwrap();
        assert_eq!(filter.into_inner(), b"ab\x08c\x08");
    }

    #[test]
    fn backspace_fix_selection() {
        assert!(IoRelay::windows(Some(10586)).fixes_backspace(true));
        assert!(!IoRelay::windows(Some(10586)).fixes_backspace(false));
        assert!(!IoRelay::windows(Some(14350)).fixes_backspace(true));
        assert!(!IoRelay::windows(Some(22631)).fixes_backspace(true));
        assert!(!IoRelay::windows(None).fixes_backspace(true));
        assert!(!IoRelay::native().fixes_backspace(true));
    }

    #[tokio::test]
    async fn stdin_writer_passes_through_when_inactive() {
        for (relay, tty) in [
            (IoRelay::native(), true),
            (IoRelay::windows(Some(10586)), false),
            (IoRelay::windows(Some(19041)), true),
        ] {
            let (near, mut far) = tokio::io::duplex(64);
            let mut writer = relay.wrap_stdin_writer(Box::new(near), tty);
            writer.write_all(b"x\x7fy").await.unwrap();
            writer.shutdown().await.unwrap();
            drop(writer);

            let mut out = Vec::new();
            far.read_to_end(&mut out).await.unwrap();
            assert_eq!(out, b"x\x7fy", "{relay:?} tty={tty}");
        }
    }

    #[tokio::test]
    async fn stdin_writer_filters_on_legacy_console() {
        let (near, mut far) = tokio::io::duplex(64);
        let mut writer = IoRelay::windows(Some(10586)).wrap_stdin_writer(Box::new(near), true);
        writer.write_all(b"x\x7fy").await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        let mut out = Vec::new();
        far.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"x\x08y");
    }

    proptest! {
        #[test]
        fn remap_only_touches_del(input in proptest::collection::vec(any::<u8>(), 0..512)) {
            let output = remap_del(&input);
            prop_assert_eq!(output.len(), input.len());
            for (i, o) in input.iter().zip(output.iter()) {
                if *i == console::DEL {
                    prop_assert_eq!(*o, console::BACKSPACE);
                } else {
                    prop_assert_eq!(*o, *i);
                }
            }
        }
    }
}
