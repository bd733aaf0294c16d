//! Shared constants
//!
//! Values here are observable by users (exit codes, daemon phrases) and must
//! stay identical between the library and the CLI.

/// Process exit codes reported by `boxrun run`.
pub mod exit_codes {
    /// Generic daemon failure.
    pub const DAEMON_FAILURE: i32 = 125;

    /// Command present in the image but not invocable.
    pub const COMMAND_NOT_INVOKABLE: i32 = 126;

    /// Command not found in the image.
    pub const COMMAND_NOT_FOUND: i32 = 127;
}

/// Daemon error text used for exit code classification.
///
/// Matching is by plain substring; changing these changes exit codes.
pub mod daemon_errors {
    /// Envelope prefix the client puts in front of every daemon error.
    pub const ENVELOPE_PREFIX: &str = "Error response from daemon: ";

    /// Leading phrase of errors about the container's own command.
    pub const COMMAND_PREFIX: &str = "Container command";

    /// Phrase marking a missing command.
    pub const COMMAND_NOT_FOUND: &str = "not found";

    /// Phrase marking a command that exists but cannot be executed.
    pub const COMMAND_NOT_INVOKABLE: &str = "could not be invoked";

    /// Text reported when a run-scoped daemon call is cancelled.
    pub const CONTEXT_CANCELED: &str = "context canceled";
}

/// Conflicting option messages.
pub mod conflicts {
    pub const ATTACH_DETACH: &str = "Conflicting options: -a and -d";
    pub const RESTART_AUTO_REMOVE: &str = "Conflicting options: --restart and --rm";
    pub const DETACH_AUTO_REMOVE: &str = "Conflicting options: --rm and -d";
}

/// Host console constants.
pub mod console {
    /// First Windows build that interprets DEL as backspace on console input.
    pub const BACKSPACE_FIXED_BUILD: u32 = 14350;

    pub const DEL: u8 = 0x7f;
    pub const BACKSPACE: u8 = 0x08;

    /// Fallback terminal rows when the size cannot be detected.
    pub const DEFAULT_ROWS: u16 = 24;

    /// Fallback terminal columns when the size cannot be detected.
    pub const DEFAULT_COLS: u16 = 80;
}

/// Attach session constants.
pub mod attach {
    /// Detach sequence used when neither the client nor the run overrides it.
    pub const DEFAULT_DETACH_KEYS: &str = "ctrl-p,ctrl-q";

    /// Header length of a multiplexed stream frame.
    pub const STDCOPY_HEADER_LEN: usize = 8;

    /// Poll interval for terminal size on hosts without SIGWINCH.
    pub const RESIZE_POLL_INTERVAL_MS: u64 = 250;
}

/// Engine connection defaults.
pub mod engine {
    /// Environment variable overriding the engine address.
    pub const ENV_HOST: &str = "BOXRUN_HOST";

    /// Engine address when nothing else is configured.
    pub const DEFAULT_HOST: &str = "tcp://127.0.0.1:2375";

    /// REST API version prefix.
    pub const API_VERSION: &str = "v1.24";
}
