//! churnflow - Main Entry Point

use clap::Parser;
use churnflow::cli::{cmd_init, cmd_promote, cmd_runs, cmd_search, cmd_serve, cmd_validate, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "churnflow=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { data, contract, target } => {
            cmd_validate(&data, contract.as_deref(), &target)?;
        }
        Commands::Search { data, config, contract, max_trials, promote } => {
            let home = cli.home.clone();
            // trials run on the rayon pool; keep the async runtime free
            tokio::task::spawn_blocking(move || {
                cmd_search(&home, &data, config.as_deref(), contract.as_deref(), max_trials, promote)
            })
            .await??;
        }
        Commands::Promote { config } => {
            cmd_promote(&cli.home, config.as_deref())?;
        }
        Commands::Runs { status, limit } => {
            cmd_runs(&cli.home, status.as_deref(), limit)?;
        }
        Commands::Init { output } => {
            cmd_init(&output)?;
        }
        Commands::Serve { port, host, threshold } => {
            cmd_serve(&cli.home, &host, port, threshold).await?;
        }
    }

    Ok(())
}
