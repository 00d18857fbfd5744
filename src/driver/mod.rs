//! The reconciliation driver.
//!
//! Orchestrates the sync operations across all projects on a fixed
//! interval: link newly created issues to task pages, mirror closures and
//! notes into the workspace, label stale issues, force-close long-inactive
//! ones, and mirror fresh workspace page blocks back as tracker notes.
//!
//! The driver owns no transport of its own. It is generic over
//! [`TrackerApi`] and [`WorkspaceApi`], which are injected at startup after
//! both clients have authenticated; tests drive it with in-memory fakes.
//!
//! Failure policy: a vendor call failure is contained to the item or
//! operation it happened in, logged as a warning, and retried naturally on
//! the next pass. Only project enumeration failing aborts a whole pass.
//! The local sync record decides what has been done; marker labels on the
//! tracker are a mirror of the record and are re-applied when missing.

use crate::metric_api::MetricDescriptor;
use crate::models::{
    Block, CLOSED_LABEL, FROM_TRACKER_TAG, FROM_WORKSPACE_PREFIX, INACTIVE_LABEL, Issue,
    LINKED_LABEL, PAGE_TAG, Page, Project, STALE_LABEL, SyncState, WorkspaceUser,
    workspace_status_for,
};
use crate::storage::{SyncRecord, SyncStore};
use crate::text;
use crate::tracker::{IssueFilter, IssueUpdate, TrackerApi};
use crate::workspace::{CreateTask, WorkspaceApi, resolve_user_id};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default seconds between sync passes.
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// The loop never sleeps less than this between passes.
pub const MIN_SLEEP_SECS: u64 = 60;

/// Sleep after a pass that failed outright.
const ERROR_SLEEP_SECS: u64 = 30;

/// Notes younger than this are still being written; leave them alone.
pub const NOTE_SETTLE_MINS: i64 = 10;

/// Days without update before an open issue is labeled stale.
pub const STALE_AFTER_DAYS: i64 = 28;

/// Days without update before an open issue is closed outright.
pub const INACTIVE_AFTER_DAYS: i64 = 180;

/// Bytes of rendered markdown below which a block mirror is not worth a
/// tracker note.
const TRIVIAL_MARKDOWN_LEN: usize = 3;

/// Tunables for one driver instance.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Workspace database that holds task pages.
    pub task_db: String,
    /// Username the bot's own tracker notes are written under.
    pub bot_username: String,
    pub interval_secs: u64,
    pub link_window_mins: i64,
    pub closed_window_mins: i64,
}

impl DriverOptions {
    pub fn new(task_db: impl Into<String>) -> Self {
        DriverOptions {
            task_db: task_db.into(),
            bot_username: "hawser-bot".to_string(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            link_window_mins: 720,
            closed_window_mins: 600,
        }
    }
}

/// The reconciliation driver; see the module docs.
pub struct Driver<T, W> {
    tracker: T,
    workspace: W,
    store: SyncStore,
    options: DriverOptions,
}

impl<T: TrackerApi, W: WorkspaceApi> Driver<T, W> {
    pub fn new(tracker: T, workspace: W, store: SyncStore, options: DriverOptions) -> Self {
        Driver {
            tracker,
            workspace,
            store,
            options,
        }
    }

    /// Look a project up through the injected tracker.
    pub fn find_project(&self, name_or_id: &str) -> Result<Project> {
        Ok(self.tracker.find_project(name_or_id)?)
    }

    /// Link issues created within the link window to new task pages.
    ///
    /// Returns how many pages were created. Already-linked issues are
    /// skipped; an issue whose identities cannot be resolved is skipped
    /// with a warning and retried on the next pass.
    pub fn link_new_issues(&self, project: &Project) -> Result<usize> {
        let created_after = Utc::now() - Duration::minutes(self.options.link_window_mins);
        let filter = IssueFilter {
            state: Some("opened"),
            created_after: Some(created_after),
            ..Default::default()
        };
        let issues = self.tracker.list_issues(project.id, &filter)?;
        if issues.is_empty() {
            return Ok(0);
        }
        let users = self.workspace.list_users()?;
        let mut linked = 0;
        for issue in &issues {
            debug!("issue '{}' was created recently", issue.title);
            match self.link_issue(project, issue, &users) {
                Ok(true) => linked += 1,
                Ok(false) => {}
                Err(e) => warn!("failed to link issue '{}': {e}", issue.title),
            }
        }
        if linked > 0 {
            info!("linked {linked} new issue(s) in {}", project.name);
        }
        Ok(linked)
    }

    fn link_issue(
        &self,
        project: &Project,
        issue: &Issue,
        users: &[WorkspaceUser],
    ) -> Result<bool> {
        let key = issue.cache_key(&project.name);
        let record = self
            .store
            .ensure(&key, &issue.web_url, issue.project_id, issue.iid)?;

        if record.state != SyncState::Unlinked {
            // The record is authoritative; re-apply the marker label if a
            // previous run lost that write.
            if record.state == SyncState::Linked && !issue.is_linked() {
                info!("re-applying '{LINKED_LABEL}' label to '{}'", issue.title);
                self.add_labels(issue, &[LINKED_LABEL])?;
            }
            debug!("issue '{}' is already {}", issue.title, record.state);
            return Ok(false);
        }

        if issue.is_linked() {
            // Labeled by a deployment that predates the local store; adopt
            // the existing page rather than create a duplicate.
            self.adopt_labeled_issue(&key, issue)?;
            return Ok(false);
        }

        let assignee_id = match issue.assignees.first() {
            Some(user) => Some(resolve_user_id(users, &user.username)?),
            None => None,
        };
        let stakeholder_id = resolve_user_id(users, &issue.author.username)?;

        let mut tags = vec![PAGE_TAG.to_string()];
        tags.extend(issue.labels.iter().cloned());
        let task = CreateTask {
            title: issue.page_title(&project.name),
            url: issue.web_url.clone(),
            tags,
            due: issue.due_date,
            assignee_id,
            stakeholder_id: Some(stakeholder_id),
        };
        let page = self.workspace.create_task_page(&self.options.task_db, &task)?;
        self.store.bind_page(&key, &page.id, &page.url)?;
        self.store.transition(&key, SyncState::Linked)?;
        info!("linked issue '{}' to {}", issue.title, page.url);

        // Page and record exist; everything below is decoration the next
        // pass can repair, so failures only warn.
        if let Some(description) = issue.description.as_deref() {
            if !description.trim().is_empty() {
                let body = format!(
                    "{description}. By {}. {FROM_TRACKER_TAG}",
                    issue.author.username
                );
                if let Err(e) = self.workspace.append_text(&page.id, &body) {
                    warn!("failed to copy description of '{}': {e}", issue.title);
                }
            }
        }
        if let Err(e) = self.add_labels(issue, &[LINKED_LABEL]) {
            warn!("failed to label '{}' as linked: {e}", issue.title);
        }
        let pointer = format!("More information may be found at {}", page.url);
        if let Err(e) = self.tracker.create_note(issue.project_id, issue.iid, &pointer) {
            warn!("failed to note the page link on '{}': {e}", issue.title);
        }
        Ok(true)
    }

    /// Bind the page an older deployment created, found through the
    /// pointer note on the issue, and mark the record linked.
    fn adopt_labeled_issue(&self, key: &str, issue: &Issue) -> Result<()> {
        match self.find_page_reference(issue)? {
            Some(page_id) => {
                let page = self.workspace.get_page(&page_id)?;
                self.store.bind_page(key, &page.id, &page.url)?;
                info!("adopted existing page {} for '{}'", page.url, issue.title);
            }
            None => warn!(
                "issue '{}' is labeled linked but no page reference was found",
                issue.title
            ),
        }
        self.store.transition(key, SyncState::Linked)?;
        Ok(())
    }

    /// First page id referenced from the issue's notes, if any.
    fn find_page_reference(&self, issue: &Issue) -> Result<Option<String>> {
        let notes = self.tracker.list_notes(issue.project_id, issue.iid)?;
        for note in &notes {
            let Some(url) = text::first_url(&note.body) else {
                continue;
            };
            if let Some(page_id) = text::page_id_from_url(url) {
                return Ok(Some(page_id));
            }
        }
        Ok(None)
    }

    /// Record for an issue, adopting label-only links from deployments
    /// that predate the local store.
    fn linked_record(&self, key: &str, issue: &Issue) -> Result<Option<SyncRecord>> {
        if let Some(record) = self.store.get(key)? {
            return Ok(Some(record));
        }
        if issue.is_linked() {
            self.store
                .ensure(key, &issue.web_url, issue.project_id, issue.iid)?;
            self.adopt_labeled_issue(key, issue)?;
            return self.store.get(key);
        }
        Ok(None)
    }

    /// Mirror closures from the closed window onto linked task pages.
    pub fn sync_recently_closed(&self, project: &Project) -> Result<usize> {
        let updated_after = Utc::now() - Duration::minutes(self.options.closed_window_mins);
        let filter = IssueFilter {
            state: Some("closed"),
            updated_after: Some(updated_after),
            ..Default::default()
        };
        let issues = self.tracker.list_issues(project.id, &filter)?;
        let mut mirrored = 0;
        for issue in &issues {
            match self.mirror_closure(project, issue) {
                Ok(true) => mirrored += 1,
                Ok(false) => {}
                Err(e) => warn!("failed to mirror closure of '{}': {e}", issue.title),
            }
        }
        if mirrored > 0 {
            info!("mirrored {mirrored} closure(s) in {}", project.name);
        }
        Ok(mirrored)
    }

    fn mirror_closure(&self, project: &Project, issue: &Issue) -> Result<bool> {
        let key = issue.cache_key(&project.name);
        let Some(record) = self.linked_record(&key, issue)? else {
            debug!("issue '{}' has no linked page; skipping", issue.title);
            return Ok(false);
        };
        if record.state == SyncState::ClosedInWorkspace {
            if !issue.has_label(CLOSED_LABEL) {
                info!("re-applying '{CLOSED_LABEL}' label to '{}'", issue.title);
                self.add_labels(issue, &[CLOSED_LABEL])?;
            }
            return Ok(false);
        }
        let Some(page_id) = record.page_id.as_deref() else {
            debug!("issue '{}' has no page bound; skipping", issue.title);
            return Ok(false);
        };

        let status = workspace_status_for(issue);
        self.workspace.set_page_status(page_id, status.as_str())?;
        self.store.transition(&key, SyncState::ClosedInWorkspace)?;
        info!("set '{}' to {} in the workspace", issue.title, status.as_str());

        if let Err(e) = self.tracker.create_note(
            issue.project_id,
            issue.iid,
            "Changed status of the linked workspace page",
        ) {
            warn!("failed to confirm closure on '{}': {e}", issue.title);
        }
        if let Err(e) = self.add_labels(issue, &[CLOSED_LABEL]) {
            warn!("failed to label '{}' as closed in workspace: {e}", issue.title);
        }
        Ok(true)
    }

    /// Append settled notes of linked open issues to their task pages.
    ///
    /// A note qualifies once it has not been edited for [`NOTE_SETTLE_MINS`],
    /// so the mirror never races a comment still being typed. Synced notes
    /// get a sentinel suffix appended and are never re-sent.
    pub fn sync_notes(&self, project: &Project) -> Result<usize> {
        let settled_before = Utc::now() - Duration::minutes(NOTE_SETTLE_MINS);
        let filter = IssueFilter {
            state: Some("opened"),
            updated_before: Some(settled_before),
            ..Default::default()
        };
        let issues = self.tracker.list_issues(project.id, &filter)?;
        let mut synced = 0;
        for issue in &issues {
            if issue.has_label(STALE_LABEL) {
                continue;
            }
            match self.sync_issue_notes(issue, &issue.cache_key(&project.name), settled_before) {
                Ok(count) => synced += count,
                Err(e) => warn!("failed to sync notes of '{}': {e}", issue.title),
            }
        }
        if synced > 0 {
            info!("synced {synced} note(s) to the workspace in {}", project.name);
        }
        Ok(synced)
    }

    fn sync_issue_notes(
        &self,
        issue: &Issue,
        key: &str,
        settled_before: DateTime<Utc>,
    ) -> Result<usize> {
        let Some(record) = self.linked_record(key, issue)? else {
            return Ok(0);
        };
        if record.state != SyncState::Linked {
            return Ok(0);
        }
        let Some(page_id) = record.page_id.as_deref() else {
            return Ok(0);
        };

        let notes = self.tracker.list_notes(issue.project_id, issue.iid)?;
        let mut synced = 0;
        for note in &notes {
            // The tracker cannot filter notes by update time server-side.
            if note.updated_at > settled_before {
                continue;
            }
            if note.system || note.author.username == self.options.bot_username {
                continue;
            }
            if note.body.trim_end().ends_with(LINKED_LABEL) {
                debug!("note {} is already synced", note.id);
                continue;
            }
            let body = format!(
                "{}. By {}. On {}. {FROM_TRACKER_TAG}",
                note.body,
                note.author.username,
                note.created_at.format("%Y-%m-%d %H:%M")
            );
            self.workspace.append_text(page_id, &body)?;
            let marked = format!("{}\n\n{LINKED_LABEL}", note.body);
            if let Err(e) =
                self.tracker
                    .update_note(issue.project_id, issue.iid, note.id, &marked)
            {
                warn!("appended note {} but failed to mark it synced: {e}", note.id);
            }
            synced += 1;
        }
        Ok(synced)
    }

    /// Label open issues idle past the stale window.
    pub fn mark_stale(&self, project: &Project) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(STALE_AFTER_DAYS);
        let filter = IssueFilter {
            state: Some("opened"),
            updated_before: Some(cutoff),
            order_by: Some("created_at"),
            sort: Some("desc"),
            ..Default::default()
        };
        let issues = self.tracker.list_issues(project.id, &filter)?;
        let mut marked = 0;
        for issue in &issues {
            if issue.has_label(STALE_LABEL) {
                debug!("issue '{}' is already stale", issue.title);
                continue;
            }
            match self.add_labels(issue, &[STALE_LABEL]) {
                Ok(()) => {
                    info!("marked issue '{}' stale", issue.title);
                    self.record_state(project, issue, SyncState::Stale);
                    marked += 1;
                }
                Err(e) => warn!("failed to mark '{}' stale: {e}", issue.title),
            }
        }
        Ok(marked)
    }

    /// Close open issues idle past the inactivity window and cascade the
    /// closure into the workspace mirror.
    pub fn close_inactive(&self, project: &Project) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(INACTIVE_AFTER_DAYS);
        let filter = IssueFilter {
            state: Some("opened"),
            updated_before: Some(cutoff),
            order_by: Some("created_at"),
            sort: Some("desc"),
            ..Default::default()
        };
        let issues = self.tracker.list_issues(project.id, &filter)?;
        let mut closed = 0;
        for issue in &issues {
            if issue.has_label(INACTIVE_LABEL) {
                continue;
            }
            let update = IssueUpdate {
                add_labels: vec![INACTIVE_LABEL.to_string()],
                state_event: Some("close"),
            };
            match self.tracker.update_issue(issue.project_id, issue.iid, &update) {
                Ok(updated) => {
                    info!(
                        "closed issue '{}' after {INACTIVE_AFTER_DAYS} days of inactivity",
                        issue.title
                    );
                    self.record_state(project, &updated, SyncState::ClosedInactive);
                    // The closed-window listing may never see this issue;
                    // mirror the closure right away.
                    if let Err(e) = self.mirror_closure(project, &updated) {
                        warn!("failed to mirror forced closure of '{}': {e}", issue.title);
                    }
                    closed += 1;
                }
                Err(e) => warn!("failed to close inactive issue '{}': {e}", issue.title),
            }
        }
        Ok(closed)
    }

    /// Move the record for `issue` to `next`, creating it if needed.
    ///
    /// An invalid move means the tracker and the record disagree about the
    /// issue's lifecycle; the record wins and the mismatch is logged.
    fn record_state(&self, project: &Project, issue: &Issue, next: SyncState) {
        let key = issue.cache_key(&project.name);
        let result = self
            .store
            .ensure(&key, &issue.web_url, issue.project_id, issue.iid)
            .and_then(|record| {
                if record.state == next {
                    Ok(record)
                } else {
                    self.store.transition(&key, next)
                }
            });
        match result {
            Ok(_) => {}
            Err(Error::InvalidTransition { from, to }) => {
                debug!("record for '{}' stays {from}; not moving to {to}", issue.title);
            }
            Err(e) => warn!("failed to record state of '{}': {e}", issue.title),
        }
    }

    /// Mirror fresh blocks of recently edited task pages back as tracker
    /// notes.
    ///
    /// Each page advances a per-page high-water mark (creation time of the
    /// newest mirrored block), so a block is sent at most once even when
    /// the edit window and block timestamps drift. Pages seen for the
    /// first time fall back to the query window as the floor.
    pub fn sync_workspace_blocks(&self) -> Result<usize> {
        let window_start = Utc::now() - Duration::seconds(self.options.interval_secs as i64);
        let pages = self
            .workspace
            .query_pages_edited_since(&self.options.task_db, window_start)?;
        if !pages.is_empty() {
            debug!("{} recently edited page(s)", pages.len());
        }
        let mut mirrored = 0;
        for page in &pages {
            match self.mirror_page_blocks(page, window_start) {
                Ok(true) => mirrored += 1,
                Ok(false) => {}
                Err(e) => warn!("failed to mirror blocks of {}: {e}", page.url),
            }
        }
        if mirrored > 0 {
            info!("mirrored blocks from {mirrored} page(s) back to the tracker");
        }
        Ok(mirrored)
    }

    fn mirror_page_blocks(&self, page: &Page, window_start: DateTime<Utc>) -> Result<bool> {
        let Some(issue_url) = page.issue_url.as_deref() else {
            debug!("page {} has no issue back-reference", page.url);
            return Ok(false);
        };
        let record = self.store.find_by_page(&page.id)?;
        // Strictly greater than the floor, so the boundary block is never
        // sent twice.
        let floor = record
            .as_ref()
            .and_then(|r| r.block_watermark)
            .unwrap_or(window_start);
        let blocks = self.workspace.list_blocks(&page.id)?;
        let fresh: Vec<&Block> = blocks
            .iter()
            .filter(|b| b.created_time > floor && !b.text.contains(FROM_TRACKER_TAG))
            .collect();
        let Some(newest) = fresh.iter().map(|b| b.created_time).max() else {
            return Ok(false);
        };

        let markdown = text::blocks_to_markdown(fresh.iter().copied());
        if markdown.trim().len() <= TRIVIAL_MARKDOWN_LEN {
            debug!("page {} has only trivial new content", page.url);
            return Ok(false);
        }

        let issue = self.tracker.issue_by_url(issue_url)?;
        let body = format!("{FROM_WORKSPACE_PREFIX} <{}>\n\n{markdown}", page.url);
        self.tracker.create_note(issue.project_id, issue.iid, &body)?;
        if record.is_some() {
            self.store.set_block_watermark(&page.id, newest)?;
        }
        info!(
            "mirrored {} block(s) from {} to {}",
            fresh.len(),
            page.url,
            issue.web_url
        );
        Ok(true)
    }

    /// Run every sync operation for one project, containing failures.
    pub fn run_project(&self, project: &Project) {
        info!("analysing project {}", project.path_with_namespace);
        if let Err(e) = self.link_new_issues(project) {
            warn!("linking new issues failed for {}: {e}", project.name);
        }
        if let Err(e) = self.sync_recently_closed(project) {
            warn!("closure sync failed for {}: {e}", project.name);
        }
        if let Err(e) = self.sync_notes(project) {
            warn!("note sync failed for {}: {e}", project.name);
        }
        if let Err(e) = self.mark_stale(project) {
            warn!("stale marking failed for {}: {e}", project.name);
        }
        if let Err(e) = self.close_inactive(project) {
            warn!("inactivity closing failed for {}: {e}", project.name);
        }
    }

    /// One full pass: workspace blocks first, then every project.
    pub fn run_once(&self) -> Result<()> {
        if let Err(e) = self.sync_workspace_blocks() {
            warn!("workspace block sync failed: {e}");
        }
        let projects = self.tracker.list_projects()?;
        info!("analysing {} project(s)", projects.len());
        for project in &projects {
            self.run_project(project);
        }
        Ok(())
    }

    /// The continuous loop. Returns once `shutdown` goes true.
    pub fn run(&self, shutdown: &AtomicBool) {
        info!(
            "starting sync loop with a {}s interval",
            self.options.interval_secs
        );
        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            let sleep_secs = match self.run_once() {
                Ok(()) => {
                    let elapsed = started.elapsed().as_secs();
                    self.options
                        .interval_secs
                        .saturating_sub(elapsed)
                        .max(MIN_SLEEP_SECS)
                }
                Err(e) => {
                    warn!("sync pass failed: {e}");
                    ERROR_SLEEP_SECS
                }
            };
            debug!("sleeping {sleep_secs}s");
            sleep_interruptible(sleep_secs, shutdown);
        }
        info!("shutdown requested; sync loop stopped");
    }

    fn add_labels(&self, issue: &Issue, labels: &[&str]) -> Result<()> {
        let update = IssueUpdate {
            add_labels: labels.iter().map(|l| l.to_string()).collect(),
            state_event: None,
        };
        self.tracker
            .update_issue(issue.project_id, issue.iid, &update)?;
        Ok(())
    }
}

/// Reconcile the metrics catalog database against the metric descriptors
/// the metrics service publishes: rename rows whose display name drifted,
/// create rows for new metrics. Rows for retired metrics are left alone.
pub fn sync_metric_catalog<W: WorkspaceApi>(
    workspace: &W,
    database_id: &str,
    metrics: &[MetricDescriptor],
) -> Result<()> {
    info!("syncing {} metric descriptor(s) into the catalog", metrics.len());
    let mut pending: BTreeMap<&str, &str> = metrics
        .iter()
        .map(|m| (m.id.as_str(), m.name.as_str()))
        .collect();
    for row in workspace.query_catalog(database_id)? {
        let Some(name) = pending.remove(row.unique_id.as_str()) else {
            continue;
        };
        if name != row.long_name {
            info!(
                "renaming catalog metric {} from '{}' to '{name}'",
                row.unique_id, row.long_name
            );
            if let Err(e) = workspace.update_catalog_name(&row.page_id, name) {
                warn!("failed to rename catalog metric {}: {e}", row.unique_id);
            }
        }
    }
    for (id, name) in pending {
        info!("adding metric {id} to the catalog");
        if let Err(e) = workspace.create_catalog_entry(database_id, id, name) {
            warn!("failed to add catalog metric {id}: {e}");
        }
    }
    Ok(())
}

fn sleep_interruptible(secs: u64, shutdown: &AtomicBool) {
    for _ in 0..secs {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}
