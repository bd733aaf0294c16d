use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::PathBuf;

use boxrun::run::{RestartPolicy, StdStream};
use boxrun::{LaunchSpec, RunOrchestrator, RunStreams};
use clap::{ArgAction, Args};
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run container in background and print container ID
    #[arg(short, long)]
    pub detach: bool,

    /// Automatically remove the container when it exits
    #[arg(long)]
    pub rm: bool,

    /// Proxy received signals to the process
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub sig_proxy: bool,

    /// Assign a name to the container
    #[arg(long)]
    pub name: Option<String>,

    /// Override the key sequence for detaching a container
    #[arg(long)]
    pub detach_keys: Option<String>,

    /// Attach to STDIN, STDOUT or STDERR
    #[arg(short, long, value_parser = parse_stream)]
    pub attach: Vec<StdStream>,

    /// Keep STDIN open even if not attached
    #[arg(short, long)]
    pub interactive: bool,

    /// Allocate a pseudo-TTY
    #[arg(short, long)]
    pub tty: bool,

    /// Restart policy to apply when a container exits
    #[arg(long, default_value = "no")]
    pub restart: String,

    /// Write the container ID to the file
    #[arg(long)]
    pub cidfile: Option<PathBuf>,

    /// Set environment variables
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Set metadata on the container (KEY=VALUE)
    #[arg(short, long = "label")]
    pub label: Vec<String>,

    /// Bind mount a volume
    #[arg(short, long = "volume")]
    pub volume: Vec<String>,

    /// Working directory inside the container
    #[arg(short, long)]
    pub workdir: Option<String>,

    /// Overwrite the default ENTRYPOINT of the image
    #[arg(long)]
    pub entrypoint: Option<String>,

    /// Connect the container to a network
    #[arg(long)]
    pub network: Option<String>,

    /// Image to run
    pub image: String,

    /// Command and arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

fn parse_stream(value: &str) -> Result<StdStream, String> {
    value.parse().map_err(|e: boxrun::BoxrunError| e.to_string())
}

impl RunArgs {
    /// Build the launch spec. `stdin_is_terminal` gates `-t -i`.
    pub fn into_launch_spec(self, stdin_is_terminal: bool) -> anyhow::Result<LaunchSpec> {
        let mut spec = LaunchSpec::new(self.image);

        let attach = |stream: StdStream| self.attach.contains(&stream);
        let (attach_stdin, attach_stdout, attach_stderr) = if self.attach.is_empty() {
            (self.interactive, true, true)
        } else {
            (
                attach(StdStream::Stdin),
                attach(StdStream::Stdout),
                attach(StdStream::Stderr),
            )
        };

        if !self.detach && self.tty && attach_stdin && !stdin_is_terminal {
            anyhow::bail!("the input device is not a TTY");
        }

        let config = &mut spec.config;
        config.cmd = self.command;
        config.entrypoint = self.entrypoint.map(|e| vec![e]);
        config.env = self.env;
        config.working_dir = self.workdir.unwrap_or_default();
        config.labels = parse_labels(&self.label);
        config.tty = self.tty;
        config.open_stdin = self.interactive;
        config.attach_stdin = attach_stdin;
        config.attach_stdout = attach_stdout;
        config.attach_stderr = attach_stderr;
        config.stdin_once = self.interactive && attach_stdin;

        let host = &mut spec.host_config;
        host.restart_policy = self.restart.parse::<RestartPolicy>()?;
        host.binds = self.volume;
        host.network_mode = self.network.unwrap_or_default();
        host.container_id_file = self.cidfile;

        let flags = &mut spec.flags;
        flags.detach = self.detach;
        flags.auto_remove = self.rm;
        flags.sig_proxy = self.sig_proxy;
        flags.name = self.name;
        flags.detach_keys = self.detach_keys;
        flags.attach = self.attach;

        Ok(spec)
    }
}

fn parse_labels(labels: &[String]) -> HashMap<String, String> {
    labels
        .iter()
        .map(|label| match label.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (label.clone(), String::new()),
        })
        .collect()
}

/// Returns the process exit status of the run.
pub async fn execute(args: RunArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<i32> {
    let spec = args.into_launch_spec(std::io::stdin().is_terminal())?;
    let engine = global.create_engine()?;

    let mut orchestrator = RunOrchestrator::new(engine);
    let code = orchestrator
        .execute(spec, RunStreams::process(), &CancellationToken::new())
        .await?;

    tracing::debug!(code, state = %orchestrator.session().state, "Run finished");
    Ok(code)
}
