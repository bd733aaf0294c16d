//! Multiplexed stream demux.
//!
//! Wire format for non-tty attach output: an 8-byte header
//! `[stream, 0, 0, 0, len (u32 big-endian)]` followed by `len` payload bytes.
//! Stream 0 (stdin echo) and 1 go to stdout, 2 goes to stderr.

use boxrun_shared::constants::attach::STDCOPY_HEADER_LEN;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame payload accepted (16 MB).
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const STREAM_STDIN: u8 = 0;
const STREAM_STDOUT: u8 = 1;
const STREAM_STDERR: u8 = 2;

/// Bytes written to each destination.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    pub stdout: u64,
    pub stderr: u64,
}

/// Whether `kind` means the peer dropped the connection.
pub(crate) fn is_connection_closed(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

/// Copy frames from `src` to the matching writer until EOF.
///
/// A missing writer discards its frames. EOF or a dropped connection on a
/// frame boundary ends the copy cleanly. Inside a frame, EOF is an
/// `UnexpectedEof` error and a dropped connection keeps its error kind.
pub async fn demux<R, O, E>(
    src: &mut R,
    mut stdout: Option<&mut O>,
    mut stderr: Option<&mut E>,
) -> io::Result<CopyStats>
where
    R: AsyncRead + Unpin + ?Sized,
    O: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    let mut stats = CopyStats::default();
    let mut header = [0u8; STDCOPY_HEADER_LEN];
    let mut payload = Vec::new();

    loop {
        if !read_header(src, &mut header).await? {
            return Ok(stats);
        }

        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame too large: {} bytes", len),
            ));
        }

        payload.resize(len, 0);
        src.read_exact(&mut payload).await?;

        match header[0] {
            STREAM_STDIN | STREAM_STDOUT => {
                if let Some(out) = stdout.as_deref_mut() {
                    out.write_all(&payload).await?;
                    out.flush().await?;
                    stats.stdout += len as u64;
                }
            }
            STREAM_STDERR => {
                if let Some(err) = stderr.as_deref_mut() {
                    err.write_all(&payload).await?;
                    err.flush().await?;
                    stats.stderr += len as u64;
                }
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unrecognized stream: {}", other),
                ));
            }
        }
    }
}

/// Fill `header`. Returns `false` when the stream ends before the first byte.
async fn read_header<R>(src: &mut R, header: &mut [u8; STDCOPY_HEADER_LEN]) -> io::Result<bool>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < header.len() {
        let n = match src.read(&mut header[filled..]).await {
            Ok(n) => n,
            Err(e) if filled == 0 && is_connection_closed(e.kind()) => {
                tracing::debug!(error = %e, "Connection closed on a frame boundary");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated stream header",
            ));
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
pub(crate) fn frame(stream: u8, data: &[u8]) -> Vec<u8> {
    let mut out = vec![stream, 0, 0, 0];
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
    out
}
