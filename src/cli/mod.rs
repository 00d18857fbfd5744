//! CLI argument definitions for Hawser.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Hawser - keeps an issue tracker and a project workspace moored together.
#[derive(Parser, Debug)]
#[command(name = "hawser")]
#[command(author, version, about = "Sync bot between an issue tracker and a project workspace", long_about = None)]
pub struct Cli {
    /// Environment file to read instead of the standard locations
    #[arg(short, long, global = true, env = "HAWSER_ENV_FILE")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sync loop until interrupted
    Run {
        /// Seconds between sync passes
        #[arg(short, long, env = "HAWSER_INTERVAL_SECS")]
        interval_secs: Option<u64>,
    },

    /// Run a single sync pass over all projects and exit
    RunOnce,

    /// Run one sync operation against one project
    Sync {
        /// Project name or numeric id
        project: String,

        /// Operation to run
        #[arg(long, value_enum, default_value = "new")]
        op: SyncOp,
    },

    /// Mirror fresh workspace page blocks back to the tracker
    Blocks,

    /// Resolve a tracker handle, display name, or email to a workspace user
    User {
        /// Handle, name, or email to look up
        query: String,
    },

    /// Full-text search across the workspace
    Search {
        query: String,

        /// Maximum number of results to print
        #[arg(short, long, default_value = "1")]
        limit: u32,
    },

    /// List issues of a project
    Issues {
        /// Project name or numeric id
        project: String,

        /// Filter by state: opened, closed, or all
        #[arg(long, default_value = "opened")]
        state: String,

        /// Only issues without a due date
        #[arg(long)]
        no_due_date: bool,
    },

    /// Delivery metrics commands
    Metrics {
        #[command(subcommand)]
        command: MetricsCommands,
    },

    /// Query the HR service for an employee's leave report
    Leave {
        /// Employee identifier (default: HAWSER_HR_EMPLOYEE)
        #[arg(long)]
        employee: Option<String>,
    },
}

/// Sync operations runnable in isolation via `hawser sync`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    /// Link recently created issues to new task pages
    New,
    /// Mirror recently closed issues onto their task pages
    Closed,
    /// Append settled issue notes to their task pages
    Notes,
    /// Label issues idle past the stale window
    Stale,
    /// Close issues idle past the inactivity window
    Inactive,
}

/// Metrics subcommands
#[derive(Subcommand, Debug)]
pub enum MetricsCommands {
    /// Compute closure punctuality per project and write a JSON report
    Maturity {
        /// Single project to analyse (default: every visible project)
        project: Option<String>,

        /// Report file to write
        #[arg(short, long, default_value = crate::metrics::REPORT_FILE)]
        out: PathBuf,
    },

    /// Render histograms from a previously written report
    Plot {
        /// Only count issues created within this many days
        #[arg(short, long)]
        days_in_past: Option<i64>,

        /// Report file to read
        #[arg(short, long, default_value = crate::metrics::REPORT_FILE)]
        file: PathBuf,
    },

    /// Reconcile the metrics catalog database against the metrics service
    Sync,
}
