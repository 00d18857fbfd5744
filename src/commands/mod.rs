//! Command implementations for the Hawser CLI.
//!
//! Each function backs one CLI command: load the environment file, build
//! the clients the command needs, authenticate them, and run. The
//! continuous loop and the one-shot sync variants share [`build_driver`].

use crate::cli::SyncOp;
use crate::config::{Config, ConfigError};
use crate::driver::{self, Driver, DriverOptions};
use crate::storage::cache::{ExpiringCache, METRICS_CACHE_FILE};
use crate::storage::{STORE_FILE, SyncStore};
use crate::tracker::{self, IssueFilter, TrackerApi};
use crate::workspace::{self, WorkspaceApi, resolve_user};
use crate::{Error, Result, hr, metric_api, metrics};
use chrono::Utc;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Load the environment file, honoring an explicit `--env-file`.
fn load_config(env_file: Option<&Path>) -> Result<Config> {
    let config = match env_file {
        Some(path) => Config::load_from(&[path.to_path_buf()])?,
        None => Config::load()?,
    };
    info!("environment loaded from {}", config.env_file.display());
    Ok(config)
}

/// Construct and authenticate both clients, open the sync store, and wire
/// everything into a driver.
fn build_driver(
    config: &Config,
    interval_override: Option<u64>,
) -> Result<Driver<tracker::Client, workspace::Client>> {
    let settings = config.settings()?;

    let tracker = tracker::Client::new(&config.tracker()?);
    let account = tracker.current_user()?;
    info!("tracker token belongs to {}", account.username);

    let workspace_config = config.workspace()?;
    let workspace = workspace::Client::new(&workspace_config);
    let bot = workspace.current_bot()?;
    info!(
        "workspace token belongs to {}",
        bot.name.as_deref().unwrap_or("an unnamed integration")
    );

    fs::create_dir_all(&settings.state_dir)?;
    let store = SyncStore::open(&settings.state_dir.join(STORE_FILE))?;

    let mut options = DriverOptions::new(workspace_config.task_db);
    options.bot_username = settings.bot_username;
    options.interval_secs = interval_override.unwrap_or(settings.interval_secs);
    options.link_window_mins = settings.link_window_mins;
    options.closed_window_mins = settings.closed_window_mins;
    Ok(Driver::new(tracker, workspace, store, options))
}

/// Run the sync loop until interrupted.
pub fn run(env_file: Option<&Path>, interval_secs: Option<u64>) -> Result<()> {
    let config = load_config(env_file)?;
    let driver = build_driver(&config, interval_secs)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| Error::Other(format!("failed to install the interrupt handler: {e}")))?;

    driver.run(&shutdown);
    Ok(())
}

/// Run a single sync pass over all projects.
pub fn run_once(env_file: Option<&Path>) -> Result<()> {
    let config = load_config(env_file)?;
    build_driver(&config, None)?.run_once()
}

/// Run one sync operation against one project.
pub fn sync_project(env_file: Option<&Path>, name_or_id: &str, op: SyncOp) -> Result<()> {
    let config = load_config(env_file)?;
    let driver = build_driver(&config, None)?;
    let project = driver.find_project(name_or_id)?;
    let touched = match op {
        SyncOp::New => driver.link_new_issues(&project)?,
        SyncOp::Closed => driver.sync_recently_closed(&project)?,
        SyncOp::Notes => driver.sync_notes(&project)?,
        SyncOp::Stale => driver.mark_stale(&project)?,
        SyncOp::Inactive => driver.close_inactive(&project)?,
    };
    println!("{touched} issue(s) touched in {}", project.name);
    Ok(())
}

/// Mirror fresh workspace page blocks back to the tracker.
pub fn sync_blocks(env_file: Option<&Path>) -> Result<()> {
    let config = load_config(env_file)?;
    let driver = build_driver(&config, None)?;
    let mirrored = driver.sync_workspace_blocks()?;
    println!("{mirrored} page(s) mirrored back to the tracker");
    Ok(())
}

/// Show how a handle resolves on both sides; useful when linking skips an
/// issue because its author cannot be matched.
pub fn find_user(env_file: Option<&Path>, query: &str) -> Result<()> {
    let config = load_config(env_file)?;

    let tracker = tracker::Client::new(&config.tracker()?);
    let accounts = tracker.find_users(query)?;
    if accounts.is_empty() {
        println!("tracker:   no account named '{query}'");
    }
    for account in &accounts {
        println!(
            "tracker:   {} ({})",
            account.username,
            account.name.as_deref().unwrap_or("no display name")
        );
    }

    let workspace = workspace::Client::new(&config.workspace()?);
    let users = workspace.list_users()?;
    let user = resolve_user(&users, query)?;
    println!(
        "workspace: {} ({}, {})",
        user.id,
        user.name.as_deref().unwrap_or("no display name"),
        user.email.as_deref().unwrap_or("no email")
    );
    Ok(())
}

/// Full-text search across the workspace, raw results.
pub fn search(env_file: Option<&Path>, query: &str, limit: u32) -> Result<()> {
    let config = load_config(env_file)?;
    let workspace = workspace::Client::new(&config.workspace()?);
    for hit in workspace.search(query, limit)? {
        println!("{}", serde_json::to_string_pretty(&hit)?);
    }
    Ok(())
}

/// List issues of a project.
pub fn issues(
    env_file: Option<&Path>,
    name_or_id: &str,
    state: &str,
    no_due_date: bool,
) -> Result<()> {
    let config = load_config(env_file)?;
    let client = tracker::Client::new(&config.tracker()?);
    let project = client.find_project(name_or_id)?;
    let filter = IssueFilter {
        state: match state {
            "opened" => Some("opened"),
            "closed" => Some("closed"),
            _ => None,
        },
        ..Default::default()
    };
    let issues = client.list_issues(project.id, &filter)?;
    for issue in issues.iter().filter(|i| !no_due_date || i.due_date.is_none()) {
        let due = issue
            .due_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "no due date".to_string());
        println!("#{} [{}] {} ({due})", issue.iid, issue.state, issue.title);
    }
    Ok(())
}

/// Compute closure punctuality per project and write the report.
pub fn metrics_maturity(
    env_file: Option<&Path>,
    project: Option<&str>,
    out: &Path,
) -> Result<()> {
    let config = load_config(env_file)?;
    let settings = config.settings()?;
    let client = tracker::Client::new(&config.tracker()?);
    let cache = ExpiringCache::open(
        settings.state_dir.join(METRICS_CACHE_FILE),
        settings.cache_max_age,
    )?;

    let projects = match project {
        Some(name_or_id) => vec![client.find_project(name_or_id)?],
        None => client.list_projects()?,
    };
    let mut report = metrics::MaturityReport::new();
    for project in &projects {
        info!("analysing project {}", project.path_with_namespace);
        let maturity = metrics::project_maturity(&client, project, &cache)?;
        report.insert(project.name.clone(), maturity);
    }

    fs::write(out, serde_json::to_string_pretty(&report)?)?;
    println!(
        "wrote maturity for {} project(s) to {}",
        report.len(),
        out.display()
    );
    Ok(())
}

/// Render histograms from a previously written report. Works offline.
pub fn metrics_plot(days_in_past: Option<i64>, file: &Path) -> Result<()> {
    let raw = fs::read_to_string(file)
        .map_err(|e| Error::Other(format!("cannot read report {}: {e}", file.display())))?;
    let report: metrics::MaturityReport = serde_json::from_str(&raw)?;
    print!("{}", metrics::render_report(&report, days_in_past, Utc::now()));
    Ok(())
}

/// Reconcile the metrics catalog database against the metrics service.
pub fn metrics_sync(env_file: Option<&Path>) -> Result<()> {
    let config = load_config(env_file)?;
    let workspace_config = config.workspace()?;
    let catalog_db = workspace_config
        .catalog_db
        .clone()
        .ok_or(ConfigError::Missing("HAWSER_CATALOG_DB_ID"))?;

    let descriptors = metric_api::Client::new(&config.metric_api()?).available_metrics()?;
    let workspace = workspace::Client::new(&workspace_config);
    driver::sync_metric_catalog(&workspace, &catalog_db, &descriptors)?;
    println!("catalog reconciled against {} metric(s)", descriptors.len());
    Ok(())
}

/// Print an employee's leave report from the HR service.
pub fn leave_status(env_file: Option<&Path>, employee: Option<&str>) -> Result<()> {
    let config = load_config(env_file)?;
    let hr_config = config.hr()?;
    let employee = employee
        .map(str::to_string)
        .or_else(|| hr_config.employee.clone())
        .ok_or(ConfigError::Missing("HAWSER_HR_EMPLOYEE"))?;
    let report = hr::Client::new(&hr_config).leave_report(&employee)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
