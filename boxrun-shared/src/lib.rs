//! BoxRun Shared - Common types for the run driver and its front-ends
//!
//! This crate contains the error taxonomy, engine transport addressing and
//! constants used by both the core library (boxrun) and the CLI.

pub mod constants;
pub mod errors;
pub mod transport;

pub use errors::{BoxrunError, BoxrunResult};
pub use transport::Transport;
