#![allow(dead_code)]

use assert_cmd::Command;
use std::time::Duration;

/// Nothing listens here, so every daemon call fails to connect.
pub const UNREACHABLE_HOST: &str = "tcp://127.0.0.1:1";

pub struct TestContext {
    pub cmd: Command,
}

impl TestContext {
    pub fn new_cmd(&self) -> Command {
        boxrun_cmd()
    }
}

fn boxrun_cmd() -> Command {
    let bin_path = env!("CARGO_BIN_EXE_boxrun");
    let mut cmd = Command::new(bin_path);
    // You can override this with .timeout(Duration::from_secs(N))
    cmd.timeout(Duration::from_secs(30));
    cmd.env_remove("RUST_LOG");
    cmd.arg("--host").arg(UNREACHABLE_HOST);
    cmd
}

pub fn boxrun() -> TestContext {
    TestContext { cmd: boxrun_cmd() }
}
