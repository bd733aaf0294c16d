mod cli;
mod commands;

use boxrun::BoxrunError;
use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let code = run_cli(Cli::parse()).await;
    std::process::exit(code);
}

/// Runs the command and maps its outcome to a process exit status.
async fn run_cli(cli: Cli) -> i32 {
    let _guard = match boxrun::util::init_logging(
        cli.global.effective_log_level(),
        cli.global.log_file.as_deref(),
    ) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("boxrun: failed to initialize logging: {}", e);
            None
        }
    };

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, &cli.global).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => report(&e),
    }
}

fn report(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<BoxrunError>() {
        // Classified failures print the daemon's message only
        Some(BoxrunError::Status { code, message }) => {
            if !message.is_empty() {
                eprintln!("boxrun: {}", message);
            }
            *code
        }
        Some(e) => {
            eprintln!("boxrun: {}", e);
            e.exit_code()
        }
        None => {
            eprintln!("boxrun: {:#}", err);
            1
        }
    }
}
