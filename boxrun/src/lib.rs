//! BoxRun - client-side driver for running a process in a remote container engine.
//!
//! A run goes through create → attach → start → monitor → wait → cleanup
//! against an engine daemon reached through [`EngineClient`]. The driver
//! wires local standard streams to the container's hijacked connection,
//! forwards host signals, propagates terminal resizes, and reconciles the
//! final exit status.
//!
//! ## Architecture
//!
//! - `engine`: the daemon call contract and the REST client (feature `rest`)
//! - `run`: launch spec, run state machine, orchestration, exit status
//! - `attach`: hijacked stream session, stream demux, raw terminal, detach keys
//! - `relay`: platform I/O corrections for legacy host consoles
//! - `signals`: host signal forwarding
//! - `tty`: terminal size monitoring
//! - `cidfile`: container identifier marker file

pub mod attach;
pub mod cidfile;
pub mod engine;
pub mod relay;
pub mod run;
pub mod signals;
pub mod tty;
pub mod util;

pub use boxrun_shared::errors::{BoxrunError, BoxrunResult};

pub use attach::{AttachIo, AttachSession};
pub use cidfile::CidFile;
pub use engine::{
    AttachOptions, ContainerHandle, ContainerState, CreateResponse, EngineClient, EngineOptions,
    HijackedStream, RemoveOptions, TtySize,
};
#[cfg(feature = "rest")]
pub use engine::RestEngine;
pub use relay::IoRelay;
pub use run::{
    ExitSource, ExitStatus, LaunchSpec, RunFlags, RunOrchestrator, RunSession, RunState,
    RunStreams,
};
pub use signals::SignalForwarder;
pub use tty::TtySizeMonitor;
