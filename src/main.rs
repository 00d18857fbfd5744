//! Hawser CLI - sync bot between an issue tracker and a project workspace.

use clap::Parser;
use hawser::cli::{Cli, Commands, MetricsCommands};
use hawser::commands;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let env_file = cli.env_file.as_deref();

    let result = match cli.command {
        Commands::Run { interval_secs } => commands::run(env_file, interval_secs),
        Commands::RunOnce => commands::run_once(env_file),
        Commands::Sync { project, op } => commands::sync_project(env_file, &project, op),
        Commands::Blocks => commands::sync_blocks(env_file),
        Commands::User { query } => commands::find_user(env_file, &query),
        Commands::Search { query, limit } => commands::search(env_file, &query, limit),
        Commands::Issues {
            project,
            state,
            no_due_date,
        } => commands::issues(env_file, &project, &state, no_due_date),
        Commands::Metrics { command } => match command {
            MetricsCommands::Maturity { project, out } => {
                commands::metrics_maturity(env_file, project.as_deref(), &out)
            }
            MetricsCommands::Plot { days_in_past, file } => {
                commands::metrics_plot(days_in_past, &file)
            }
            MetricsCommands::Sync => commands::metrics_sync(env_file),
        },
        Commands::Leave { employee } => commands::leave_status(env_file, employee.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Info-level logs for hawser itself by default; `RUST_LOG` overrides.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hawser=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
