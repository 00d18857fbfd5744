//! Issue tracker REST client.
//!
//! A thin typed wrapper over the tracker's v4 REST API: project lookup,
//! issue listing with time-window filters, label and state mutation, notes,
//! and user search. Transport, auth, and JSON decoding live here;
//! reconciliation policy lives in the driver.
//!
//! The driver talks to the [`TrackerApi`] trait rather than the concrete
//! client, so tests can substitute an in-memory tracker.

use crate::config::TrackerConfig;
use crate::models::{Issue, Note, Project, TrackerUser};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Path prefix of the tracker's REST API.
const API_PREFIX: &str = "/api/v4";

/// User-Agent header sent with tracker requests.
const USER_AGENT: &str = concat!("hawser/", env!("CARGO_PKG_VERSION"));

/// One page of results is plenty for the windows the bot queries.
const PER_PAGE: &str = "100";

/// Errors from tracker API operations.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("tracker token is invalid or expired (401 Unauthorized)")]
    Unauthorized,

    #[error("tracker resource not found: {0}")]
    NotFound(String),

    #[error("tracker returned HTTP {0}: {1}")]
    Http(u16, String),

    #[error("tracker request failed: {0}")]
    Transport(String),

    #[error("failed to parse tracker response: {0}")]
    Parse(String),

    #[error("not a recognizable issue URL: {0}")]
    BadIssueUrl(String),
}

/// Server-side filters for issue listing.
///
/// Only the filters the sync operations use are modeled; everything is
/// optional and unset fields are simply not sent.
#[derive(Debug, Default, Clone)]
pub struct IssueFilter {
    pub state: Option<&'static str>,
    pub created_after: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
    pub order_by: Option<&'static str>,
    pub sort: Option<&'static str>,
}

/// Mutation request for an issue. Labels are added, never replaced.
#[derive(Debug, Default, Clone)]
pub struct IssueUpdate {
    pub add_labels: Vec<String>,
    /// `"close"` to close the issue.
    pub state_event: Option<&'static str>,
}

/// Operations the sync driver needs from the issue tracker.
pub trait TrackerApi {
    /// The account behind the configured token. Called once at startup to
    /// prove the token works before any sync pass runs.
    fn current_user(&self) -> Result<TrackerUser, TrackerError>;

    /// All projects visible to the bot, most recently active first.
    fn list_projects(&self) -> Result<Vec<Project>, TrackerError>;

    /// Look a project up by numeric id or by name search.
    ///
    /// Name search returns the last match, which the tracker orders as the
    /// closest one.
    fn find_project(&self, name_or_id: &str) -> Result<Project, TrackerError>;

    fn list_issues(
        &self,
        project_id: u64,
        filter: &IssueFilter,
    ) -> Result<Vec<Issue>, TrackerError>;

    /// Fetch one issue by project path and issue iid.
    fn get_issue(&self, project_path: &str, iid: u64) -> Result<Issue, TrackerError>;

    /// Apply an update and return the issue as the tracker now sees it.
    fn update_issue(
        &self,
        project_id: u64,
        iid: u64,
        update: &IssueUpdate,
    ) -> Result<Issue, TrackerError>;

    fn list_notes(&self, project_id: u64, iid: u64) -> Result<Vec<Note>, TrackerError>;

    fn create_note(&self, project_id: u64, iid: u64, body: &str) -> Result<Note, TrackerError>;

    fn update_note(
        &self,
        project_id: u64,
        iid: u64,
        note_id: u64,
        body: &str,
    ) -> Result<Note, TrackerError>;

    /// Users whose username matches `username`.
    fn find_users(&self, username: &str) -> Result<Vec<TrackerUser>, TrackerError>;

    /// Resolve an issue web URL to the issue itself.
    fn issue_by_url(&self, url: &str) -> Result<Issue, TrackerError> {
        let (project_path, iid) = parse_issue_url(url)?;
        self.get_issue(&project_path, iid)
    }
}

/// Split an issue web URL into its project path and issue iid.
pub fn parse_issue_url(url: &str) -> Result<(String, u64), TrackerError> {
    let bad = || TrackerError::BadIssueUrl(url.to_string());
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(bad)?;
    let (_host, path) = rest.split_once('/').ok_or_else(bad)?;
    let (project_path, iid_part) = path.split_once("/-/issues/").ok_or_else(bad)?;
    if project_path.is_empty() {
        return Err(bad());
    }
    let iid = iid_part
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| bad())?;
    Ok((project_path.to_string(), iid))
}

/// Percent-encode a project path for use as a URL path segment.
fn encode_path(path: &str) -> String {
    path.replace('/', "%2F")
}

/// HTTP client for the tracker API.
pub struct Client {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl Client {
    pub fn new(config: &TrackerConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Client {
            agent,
            base_url: config.base_url.clone(),
            token: config.token.clone(),
        }
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let url = format!("{}{}{}", self.base_url, API_PREFIX, path);
        self.agent
            .request(method, &url)
            .set("PRIVATE-TOKEN", &self.token)
            .set("User-Agent", USER_AGENT)
    }

    fn get(&self, path: &str) -> ureq::Request {
        self.request("GET", path)
    }
}

/// Decode a tracker response, mapping HTTP failures onto [`TrackerError`].
fn read_json<T: DeserializeOwned>(
    result: Result<ureq::Response, ureq::Error>,
    what: &str,
) -> Result<T, TrackerError> {
    match result {
        Ok(response) => response
            .into_json()
            .map_err(|e| TrackerError::Parse(e.to_string())),
        Err(ureq::Error::Status(401, _)) => Err(TrackerError::Unauthorized),
        Err(ureq::Error::Status(404, _)) => Err(TrackerError::NotFound(what.to_string())),
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(TrackerError::Http(code, body))
        }
        Err(e) => Err(TrackerError::Transport(e.to_string())),
    }
}

/// Build the JSON body for an issue update.
fn update_payload(update: &IssueUpdate) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    if !update.add_labels.is_empty() {
        body.insert(
            "add_labels".to_string(),
            serde_json::Value::String(update.add_labels.join(",")),
        );
    }
    if let Some(event) = update.state_event {
        body.insert(
            "state_event".to_string(),
            serde_json::Value::String(event.to_string()),
        );
    }
    serde_json::Value::Object(body)
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl TrackerApi for Client {
    fn current_user(&self) -> Result<TrackerUser, TrackerError> {
        read_json(self.get("/user").call(), "current user")
    }

    fn list_projects(&self) -> Result<Vec<Project>, TrackerError> {
        let request = self
            .get("/projects")
            .query("archived", "false")
            .query("order_by", "last_activity_at")
            .query("sort", "desc")
            .query("per_page", PER_PAGE);
        read_json(request.call(), "projects")
    }

    fn find_project(&self, name_or_id: &str) -> Result<Project, TrackerError> {
        if name_or_id.chars().all(|c| c.is_ascii_digit()) && !name_or_id.is_empty() {
            return read_json(
                self.get(&format!("/projects/{name_or_id}")).call(),
                name_or_id,
            );
        }
        let request = self
            .get("/projects")
            .query("search", name_or_id)
            .query("per_page", PER_PAGE);
        let mut matches: Vec<Project> = read_json(request.call(), name_or_id)?;
        // The tracker orders search results worst-first.
        matches
            .pop()
            .ok_or_else(|| TrackerError::NotFound(name_or_id.to_string()))
    }

    fn list_issues(
        &self,
        project_id: u64,
        filter: &IssueFilter,
    ) -> Result<Vec<Issue>, TrackerError> {
        let mut request = self
            .get(&format!("/projects/{project_id}/issues"))
            .query("per_page", PER_PAGE);
        if let Some(state) = filter.state {
            request = request.query("state", state);
        }
        if let Some(t) = filter.created_after {
            request = request.query("created_after", &timestamp(t));
        }
        if let Some(t) = filter.updated_after {
            request = request.query("updated_after", &timestamp(t));
        }
        if let Some(t) = filter.updated_before {
            request = request.query("updated_before", &timestamp(t));
        }
        if let Some(order) = filter.order_by {
            request = request.query("order_by", order);
        }
        if let Some(sort) = filter.sort {
            request = request.query("sort", sort);
        }
        read_json(request.call(), "issues")
    }

    fn get_issue(&self, project_path: &str, iid: u64) -> Result<Issue, TrackerError> {
        let path = format!("/projects/{}/issues/{iid}", encode_path(project_path));
        read_json(self.get(&path).call(), &format!("{project_path}#{iid}"))
    }

    fn update_issue(
        &self,
        project_id: u64,
        iid: u64,
        update: &IssueUpdate,
    ) -> Result<Issue, TrackerError> {
        let request = self.request("PUT", &format!("/projects/{project_id}/issues/{iid}"));
        read_json(
            request.send_json(update_payload(update)),
            &format!("issue #{iid}"),
        )
    }

    fn list_notes(&self, project_id: u64, iid: u64) -> Result<Vec<Note>, TrackerError> {
        let request = self
            .get(&format!("/projects/{project_id}/issues/{iid}/notes"))
            .query("order_by", "created_at")
            .query("sort", "asc")
            .query("per_page", PER_PAGE);
        read_json(request.call(), &format!("notes of #{iid}"))
    }

    fn create_note(&self, project_id: u64, iid: u64, body: &str) -> Result<Note, TrackerError> {
        let request = self.request("POST", &format!("/projects/{project_id}/issues/{iid}/notes"));
        read_json(
            request.send_json(serde_json::json!({ "body": body })),
            &format!("note on #{iid}"),
        )
    }

    fn update_note(
        &self,
        project_id: u64,
        iid: u64,
        note_id: u64,
        body: &str,
    ) -> Result<Note, TrackerError> {
        let request = self.request(
            "PUT",
            &format!("/projects/{project_id}/issues/{iid}/notes/{note_id}"),
        );
        read_json(
            request.send_json(serde_json::json!({ "body": body })),
            &format!("note {note_id}"),
        )
    }

    fn find_users(&self, username: &str) -> Result<Vec<TrackerUser>, TrackerError> {
        let request = self.get("/users").query("username", username);
        read_json(request.call(), username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_issue_url() {
        let (path, iid) =
            parse_issue_url("https://tracker.example.com/team/app/-/issues/42").unwrap();
        assert_eq!(path, "team/app");
        assert_eq!(iid, 42);
    }

    #[test]
    fn test_parse_issue_url_nested_group() {
        let (path, iid) =
            parse_issue_url("https://tracker.example.com/org/team/app/-/issues/7").unwrap();
        assert_eq!(path, "org/team/app");
        assert_eq!(iid, 7);
    }

    #[test]
    fn test_parse_issue_url_with_fragment() {
        let (path, iid) =
            parse_issue_url("https://tracker.example.com/team/app/-/issues/42#note_9").unwrap();
        assert_eq!(path, "team/app");
        assert_eq!(iid, 42);
    }

    #[test]
    fn test_parse_issue_url_rejects_non_issue_urls() {
        assert!(parse_issue_url("https://tracker.example.com/team/app").is_err());
        assert!(parse_issue_url("https://tracker.example.com/team/app/-/issues/abc").is_err());
        assert!(parse_issue_url("not a url").is_err());
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("team/app"), "team%2Fapp");
        assert_eq!(encode_path("solo"), "solo");
    }

    #[test]
    fn test_update_payload_labels_only() {
        let payload = update_payload(&IssueUpdate {
            add_labels: vec!["stale".to_string()],
            state_event: None,
        });
        assert_eq!(payload["add_labels"], "stale");
        assert!(payload.get("state_event").is_none());
    }

    #[test]
    fn test_update_payload_close_with_labels() {
        let payload = update_payload(&IssueUpdate {
            add_labels: vec!["closed-due-to-inactivity".to_string(), "stale".to_string()],
            state_event: Some("close"),
        });
        assert_eq!(payload["add_labels"], "closed-due-to-inactivity,stale");
        assert_eq!(payload["state_event"], "close");
    }

    #[test]
    fn test_timestamp_format() {
        let t = DateTime::parse_from_rfc3339("2024-01-02T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamp(t), "2024-01-02T10:00:00Z");
    }
}
