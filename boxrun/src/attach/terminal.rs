//! Local terminal mode handling.

use boxrun_shared::errors::BoxrunResult;

/// Puts local stdin into raw mode and restores the saved mode on drop.
pub struct RawTerminal {
    #[cfg(unix)]
    saved: Option<nix::sys::termios::Termios>,
}

impl RawTerminal {
    /// Switch stdin to raw mode.
    #[cfg(unix)]
    pub fn enable() -> BoxrunResult<Self> {
        use boxrun_shared::errors::BoxrunError;
        use nix::sys::termios::{SetArg, cfmakeraw, tcgetattr, tcsetattr};

        let stdin = std::io::stdin();
        let saved = tcgetattr(&stdin)
            .map_err(|e| BoxrunError::AttachFailure(format!("failed to read terminal mode: {}", e)))?;

        let mut raw = saved.clone();
        cfmakeraw(&mut raw);
        tcsetattr(&stdin, SetArg::TCSANOW, &raw)
            .map_err(|e| BoxrunError::AttachFailure(format!("failed to set raw terminal: {}", e)))?;

        tracing::debug!("Local terminal switched to raw mode");
        Ok(Self { saved: Some(saved) })
    }

    #[cfg(not(unix))]
    pub fn enable() -> BoxrunResult<Self> {
        Ok(Self {})
    }

    /// Restore the saved mode. Idempotent.
    #[cfg(unix)]
    pub fn restore(&mut self) {
        use nix::sys::termios::{SetArg, tcsetattr};

        let Some(saved) = self.saved.take() else {
            return;
        };
        if let Err(e) = tcsetattr(std::io::stdin(), SetArg::TCSANOW, &saved) {
            tracing::warn!(error = %e, "Failed to restore terminal mode");
        } else {
            tracing::debug!("Local terminal mode restored");
        }
    }

    #[cfg(not(unix))]
    pub fn restore(&mut self) {}
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        self.restore();
    }
}
