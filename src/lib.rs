//! Hawser - keeps an issue tracker and a project workspace moored together.
//!
//! This library backs the `hawser` CLI: typed clients for the tracker,
//! workspace, HR, and metrics vendor APIs, a SQLite sync-state store, and
//! the reconciliation driver that maps issues to task pages.

pub mod cli;
pub mod commands;
pub mod config;
pub mod driver;
pub mod hr;
pub mod metric_api;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod text;
pub mod tracker;
pub mod workspace;

/// Library-level error type for hawser operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Tracker API error: {0}")]
    Tracker(#[from] tracker::TrackerError),

    #[error("Workspace API error: {0}")]
    Workspace(#[from] workspace::WorkspaceError),

    #[error("HR API error: {0}")]
    Hr(#[from] hr::HrError),

    #[error("Metrics API error: {0}")]
    MetricApi(#[from] metric_api::MetricApiError),

    #[error("Invalid sync state transition: {from} -> {to}")]
    InvalidTransition {
        from: models::SyncState,
        to: models::SyncState,
    },

    #[error("No sync record for {0}")]
    RecordNotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for hawser operations.
pub type Result<T> = std::result::Result<T, Error>;
