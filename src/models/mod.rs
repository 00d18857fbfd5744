//! Data models shared by the tracker and workspace clients.
//!
//! Tracker-side types (`Project`, `Issue`, `Note`, `TrackerUser`) mirror the
//! tracker's wire format and deserialize straight off it. Workspace-side
//! types (`Page`, `Block`, `WorkspaceUser`, `CatalogRow`) are flattened by
//! the workspace client from its nested property JSON. The sync-state
//! machine that the local store enforces also lives here.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label on tracker issues that have a linked workspace page.
pub const LINKED_LABEL: &str = "workspace:linked";
/// Label on tracker issues whose closure has been mirrored to the workspace.
pub const CLOSED_LABEL: &str = "workspace:closed";
/// Label on open issues with no activity for the stale window.
pub const STALE_LABEL: &str = "stale";
/// Label on issues force-closed after the inactivity window.
pub const INACTIVE_LABEL: &str = "closed-due-to-inactivity";
/// Triage label set by intake; drives the workspace status mapping.
pub const TRIAGE_LABEL: &str = "waiting-for-triage";
/// Tag applied to every task page the bot creates.
pub const PAGE_TAG: &str = "FromTracker";
/// Suffix on page blocks the bot wrote, so they are never mirrored back.
pub const FROM_TRACKER_TAG: &str = ":from-tracker:";
/// Prefix on tracker notes mirrored from workspace page edits.
pub const FROM_WORKSPACE_PREFIX: &str = "_from:workspace_:";

/// A project on the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub path_with_namespace: String,
    pub web_url: String,
}

/// A user account on the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerUser {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// An issue on the tracker.
///
/// `state` stays a raw string: the tracker grows states over time and an
/// unknown value must map to a default workspace status, not a parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub iid: u64,
    pub project_id: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub author: TrackerUser,
    #[serde(default)]
    pub assignees: Vec<TrackerUser>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub web_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Issue {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Whether the issue carries the linked-page marker label.
    pub fn is_linked(&self) -> bool {
        self.has_label(LINKED_LABEL)
    }

    /// Title for the issue's task page: `#{iid}:{project} - {title}`.
    pub fn page_title(&self, project_name: &str) -> String {
        format!("#{}:{} - {}", self.iid, project_name, self.title)
    }

    /// Stable key for the issue's sync record: issue URL plus page title.
    pub fn cache_key(&self, project_name: &str) -> String {
        format!("{}-{}", self.web_url, self.page_title(project_name))
    }
}

/// A note (comment) on a tracker issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: u64,
    pub body: String,
    pub author: TrackerUser,
    #[serde(default)]
    pub system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user in the workspace, flattened from the workspace's user object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A task page in the workspace, flattened to the fields the sync uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub url: String,
    pub last_edited_time: DateTime<Utc>,
    /// Back-reference to the tracker issue, from the page's URL property.
    #[serde(default)]
    pub issue_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// A content block on a workspace page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub kind: String,
    /// Concatenated plain text of the block's rich text runs.
    pub text: String,
    pub created_time: DateTime<Utc>,
}

/// A row in the metrics catalog database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRow {
    pub page_id: String,
    pub unique_id: String,
    pub long_name: String,
}

/// Workspace task status values the sync writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Done,
    Todo,
    NotStarted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Done => "Done",
            TaskStatus::Todo => "Todo",
            TaskStatus::NotStarted => "Not Started",
        }
    }
}

/// Map an issue's tracker state to the workspace status to write.
///
/// Closed issues are always `Done`. Open issues still waiting for triage
/// are `Todo`, triaged ones `Not Started`. Any state this version does not
/// know about degrades to `Todo` rather than failing the sync.
pub fn workspace_status_for(issue: &Issue) -> TaskStatus {
    match issue.state.as_str() {
        "closed" => TaskStatus::Done,
        "opened" => {
            if issue.has_label(TRIAGE_LABEL) {
                TaskStatus::Todo
            } else {
                TaskStatus::NotStarted
            }
        }
        _ => TaskStatus::Todo,
    }
}

/// Due-date value in the workspace's date property format.
pub fn format_due(date: NaiveDate) -> String {
    format!("{}T00:00:00.000Z", date.format("%Y-%m-%d"))
}

/// Where an issue sits in its sync lifecycle.
///
/// The local store is the authoritative record of this; marker labels on
/// the tracker are a mirror that can be re-applied if an update was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Known to the store but not yet linked to a page.
    Unlinked,
    /// Linked to a task page; notes and status flow both ways.
    Linked,
    /// Closure has been mirrored to the page. Terminal.
    ClosedInWorkspace,
    /// Open but idle past the stale window.
    Stale,
    /// Force-closed after the inactivity window.
    ClosedInactive,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Unlinked => "unlinked",
            SyncState::Linked => "linked",
            SyncState::ClosedInWorkspace => "closed_in_workspace",
            SyncState::Stale => "stale",
            SyncState::ClosedInactive => "closed_inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unlinked" => Some(SyncState::Unlinked),
            "linked" => Some(SyncState::Linked),
            "closed_in_workspace" => Some(SyncState::ClosedInWorkspace),
            "stale" => Some(SyncState::Stale),
            "closed_inactive" => Some(SyncState::ClosedInactive),
            _ => None,
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Identity transitions are rejected; callers check the current state
    /// first and skip work that is already done.
    pub fn can_transition(&self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (Unlinked, Linked)
                | (Unlinked, Stale)
                | (Unlinked, ClosedInactive)
                | (Linked, ClosedInWorkspace)
                | (Linked, Stale)
                | (Linked, ClosedInactive)
                | (Stale, Linked)
                | (Stale, ClosedInWorkspace)
                | (Stale, ClosedInactive)
                | (ClosedInactive, ClosedInWorkspace)
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
