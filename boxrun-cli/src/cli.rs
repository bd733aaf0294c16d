use std::path::PathBuf;
use std::sync::Arc;

use boxrun::{EngineOptions, RestEngine};
use clap::{Args, Parser, Subcommand};

use crate::commands::run::RunArgs;

#[derive(Parser, Debug)]
#[command(
    name = "boxrun",
    version,
    about = "Run commands in containers on a remote engine"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command in a new container
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Engine daemon address (tcp://host:port)
    #[arg(short = 'H', long, global = true, env = "BOXRUN_HOST")]
    pub host: Option<String>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Enable debug logging
    #[arg(short = 'D', long, global = true)]
    pub debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

impl GlobalFlags {
    pub fn effective_log_level(&self) -> &str {
        if self.debug { "debug" } else { &self.log_level }
    }

    pub fn engine_options(&self) -> EngineOptions {
        match &self.host {
            Some(host) if !host.is_empty() => EngineOptions::default().with_host(host.clone()),
            _ => EngineOptions::default(),
        }
    }

    pub fn create_engine(&self) -> anyhow::Result<Arc<RestEngine>> {
        Ok(Arc::new(RestEngine::new(self.engine_options())?))
    }
}
