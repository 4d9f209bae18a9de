use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vigil_cli::{commands, exit_code, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // Workers report over the socket, so stdout stays free of log lines.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => {
            let status = commands::cmd_run(args).await?;
            Ok(ExitCode::from(exit_code(status)))
        }
        Commands::Worker {
            socket,
            artifact,
            timeout_ms,
        } => {
            commands::cmd_worker(socket, artifact, timeout_ms).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::History { solution, ledger } => {
            commands::cmd_history(solution, ledger)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
