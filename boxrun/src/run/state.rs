//! Run lifecycle state and state machine.
//!
//! Defines the states one run passes through and the valid transitions.

use crate::engine::ContainerHandle;
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a run.
///
/// ```text
/// Idle → Created → Starting → Started → (Attached) → WaitingExit → Exited → [Removed] → Done
/// ```
///
/// `Error` is absorbing and reachable from every non-terminal state. Pending
/// cleanup still runs after a run enters `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Nothing sent to the daemon yet.
    Idle,

    /// Create succeeded; the container handle is known.
    Created,

    /// Start call in flight.
    Starting,

    /// Start succeeded.
    Started,

    /// Start succeeded and an attach session is streaming.
    Attached,

    /// Resolving the exit status.
    WaitingExit,

    /// Exit status known.
    Exited,

    /// Auto-remove completed.
    Removed,

    /// Run finished.
    Done,

    /// Run failed.
    Error,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Error)
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, target),
            (Idle, Created) |
            (Created, Starting) |
            (Starting, Started) |
            // Attached runs stream until the session completes
            (Started, Attached) |
            (Started, WaitingExit) |
            // Detached runs finish right after start
            (Started, Done) |
            (Attached, WaitingExit) |
            (Attached, Done) |
            (WaitingExit, Exited) |
            (Exited, Removed) |
            (Exited, Done) |
            (Removed, Done)
        ) || (target == Error && !self.is_terminal())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Created => "created",
            RunState::Starting => "starting",
            RunState::Started => "started",
            RunState::Attached => "attached",
            RunState::WaitingExit => "waiting_exit",
            RunState::Exited => "exited",
            RunState::Removed => "removed",
            RunState::Done => "done",
            RunState::Error => "error",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle record of one run. Exactly one exists per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSession {
    pub state: RunState,
    pub container: Option<ContainerHandle>,
    /// Last state change timestamp (UTC).
    pub last_updated: DateTime<Utc>,
}

impl RunSession {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            container: None,
            last_updated: Utc::now(),
        }
    }

    /// Attempt state transition with validation.
    pub fn transition_to(&mut self, next: RunState) -> BoxrunResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(BoxrunError::InvalidState(format!(
                "Cannot transition from {} to {}",
                self.state, next
            )));
        }

        tracing::debug!(from = %self.state, to = %next, "Run state transition");
        self.state = next;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Record creation of the container.
    pub fn created(&mut self, id: ContainerHandle) -> BoxrunResult<()> {
        self.transition_to(RunState::Created)?;
        self.container = Some(id);
        Ok(())
    }

    /// Enter `Error` unless already terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            tracing::debug!(from = %self.state, "Run failed");
            self.state = RunState::Error;
            self.last_updated = Utc::now();
        }
    }
}

impl Default for RunSession {
    fn default() -> Self {
        Self::new()
    }
}
