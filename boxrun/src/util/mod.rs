use std::path::Path;

use boxrun_shared::constants::console;
use boxrun_shared::errors::BoxrunResult;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::engine::TtySize;

/// Initialize process-wide logging.
///
/// `RUST_LOG` takes precedence over `level`. Records go to `log_file` when
/// given, otherwise to stderr. Keep the returned guard alive until exit so
/// buffered records are flushed.
pub fn init_logging(level: &str, log_file: Option<&Path>) -> BoxrunResult<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (non_blocking, guard) = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    register_to_tracing(non_blocking, env_filter);
    Ok(guard)
}

pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();
}

/// Current terminal size, or 0x0 when it cannot be detected.
pub fn detect_terminal_size() -> TtySize {
    match term_size::dimensions() {
        Some((cols, rows)) => TtySize {
            rows: rows.min(u16::MAX as usize) as u16,
            cols: cols.min(u16::MAX as usize) as u16,
        },
        None => TtySize { rows: 0, cols: 0 },
    }
}

/// Current terminal size, or 24x80 when it cannot be detected.
///
/// Only for sizing a console up front. Resize propagation uses
/// [`detect_terminal_size`] so an unknown size is never sent.
pub fn get_terminal_size() -> TtySize {
    or_default_size(detect_terminal_size())
}

fn or_default_size(size: TtySize) -> TtySize {
    if size.rows == 0 && size.cols == 0 {
        TtySize {
            rows: console::DEFAULT_ROWS,
            cols: console::DEFAULT_COLS,
        }
    } else {
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_size_is_never_empty() {
        let size = get_terminal_size();
        assert!(size.rows > 0);
        assert!(size.cols > 0);
    }

    #[test]
    fn fallback_replaces_only_an_unknown_size() {
        assert_eq!(
            or_default_size(TtySize { rows: 0, cols: 0 }),
            TtySize { rows: 24, cols: 80 }
        );
        let real = TtySize { rows: 50, cols: 132 };
        assert_eq!(or_default_size(real), real);
    }

    #[test]
    fn detected_size_agrees_with_console_size() {
        let detected = detect_terminal_size();
        if detected.rows == 0 && detected.cols == 0 {
            assert_eq!(get_terminal_size(), TtySize { rows: 24, cols: 80 });
        } else {
            assert_eq!(get_terminal_size(), detected);
        }
    }

    #[test]
    fn logging_to_file_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boxrun.log");
        let guard = init_logging("debug", Some(&path)).unwrap();
        tracing::info!("hello");
        drop(guard);
        assert!(path.exists());
    }
}
