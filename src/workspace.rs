//! Project-management workspace REST client.
//!
//! Wraps the workspace's HTTP API: task page creation, status updates,
//! block reads and appends, database queries, user listing, and full-text
//! search. The workspace nests everything in typed property objects, so
//! this module also owns the flattening from property JSON to the plain
//! structs in [`crate::models`].
//!
//! Identity resolution (tracker handle or email to workspace user id) lives
//! here too, since it is a pure function of the workspace user directory.

use crate::config::WorkspaceConfig;
use crate::models::{Block, CatalogRow, Page, WorkspaceUser, format_due};
use crate::text;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Value, json};
use std::time::Duration;

/// Base URL of the workspace API.
const API_BASE: &str = "https://api.notion.com/v1";

/// API version pin; property shapes below match this version.
const API_VERSION: &str = "2022-06-28";

const USER_AGENT: &str = concat!("hawser/", env!("CARGO_PKG_VERSION"));

/// Minimum similarity for a fuzzy name match to count.
pub const USER_MATCH_THRESHOLD: f64 = 0.9;

/// Errors from workspace API operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace token is invalid or expired (401 Unauthorized)")]
    Unauthorized,

    #[error("workspace resource not found: {0}")]
    NotFound(String),

    #[error("workspace returned HTTP {0}: {1}")]
    Http(u16, String),

    #[error("workspace request failed: {0}")]
    Transport(String),

    #[error("failed to parse workspace response: {0}")]
    Parse(String),

    #[error("not a valid page id: {0}")]
    BadPageId(String),

    #[error("no workspace user matches '{0}'")]
    UserNotFound(String),
}

/// Everything needed to create a task page.
///
/// People fields carry workspace user ids; resolving tracker handles to
/// those ids happens before this struct is built.
#[derive(Debug, Clone)]
pub struct CreateTask {
    pub title: String,
    /// Back-reference to the tracker issue.
    pub url: String,
    pub tags: Vec<String>,
    pub due: Option<NaiveDate>,
    pub assignee_id: Option<String>,
    pub stakeholder_id: Option<String>,
}

/// Operations the sync driver needs from the workspace.
pub trait WorkspaceApi {
    /// The integration identity behind the configured token. Called once at
    /// startup to prove the token works.
    fn current_bot(&self) -> Result<WorkspaceUser, WorkspaceError>;

    fn create_task_page(
        &self,
        database_id: &str,
        task: &CreateTask,
    ) -> Result<Page, WorkspaceError>;

    fn get_page(&self, page_id: &str) -> Result<Page, WorkspaceError>;

    fn set_page_status(&self, page_id: &str, status: &str) -> Result<(), WorkspaceError>;

    /// Append one paragraph of plain text to the end of a page.
    fn append_text(&self, page_id: &str, text: &str) -> Result<(), WorkspaceError>;

    fn list_blocks(&self, page_id: &str) -> Result<Vec<Block>, WorkspaceError>;

    /// Pages in `database_id` edited on or after `since`.
    fn query_pages_edited_since(
        &self,
        database_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Page>, WorkspaceError>;

    fn list_users(&self) -> Result<Vec<WorkspaceUser>, WorkspaceError>;

    /// Raw full-text search results, newest first.
    fn search(&self, query: &str, limit: u32) -> Result<Vec<Value>, WorkspaceError>;

    fn query_catalog(&self, database_id: &str) -> Result<Vec<CatalogRow>, WorkspaceError>;

    fn update_catalog_name(&self, page_id: &str, long_name: &str) -> Result<(), WorkspaceError>;

    fn create_catalog_entry(
        &self,
        database_id: &str,
        unique_id: &str,
        long_name: &str,
    ) -> Result<(), WorkspaceError>;
}

/// Validate a page id and normalize it to hyphenated form.
pub fn normalize_page_id(raw: &str) -> Result<String, WorkspaceError> {
    uuid::Uuid::try_parse(raw.trim())
        .map(|u| u.hyphenated().to_string())
        .map_err(|_| WorkspaceError::BadPageId(raw.to_string()))
}

/// Resolve a tracker handle, display name, or email to a workspace user.
///
/// Emails match exactly (case-insensitive). Anything else is matched
/// fuzzily against display names after separator normalization, falling
/// back to a substring scan. No match at all is a hard error; silently
/// creating pages with nobody assigned hides real directory gaps.
pub fn resolve_user<'a>(
    users: &'a [WorkspaceUser],
    query: &str,
) -> Result<&'a WorkspaceUser, WorkspaceError> {
    if text::is_email(query) {
        let wanted = query.to_lowercase();
        return users
            .iter()
            .find(|u| {
                u.email
                    .as_deref()
                    .is_some_and(|e| e.to_lowercase() == wanted)
            })
            .ok_or_else(|| WorkspaceError::UserNotFound(query.to_string()));
    }

    let needle = text::normalize_handle(query);
    if needle.is_empty() {
        return Err(WorkspaceError::UserNotFound(query.to_string()));
    }

    let mut best: Option<(&WorkspaceUser, f64)> = None;
    for user in users {
        let Some(name) = user.name.as_deref() else {
            continue;
        };
        let score = text::similarity(&text::normalize_handle(name), &needle);
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((user, score));
        }
    }
    if let Some((user, score)) = best {
        if score >= USER_MATCH_THRESHOLD {
            return Ok(user);
        }
    }

    users
        .iter()
        .find(|u| {
            u.name
                .as_deref()
                .is_some_and(|n| text::normalize_handle(n).contains(&needle))
        })
        .ok_or_else(|| WorkspaceError::UserNotFound(query.to_string()))
}

/// Like [`resolve_user`], but raw user ids pass straight through.
pub fn resolve_user_id(users: &[WorkspaceUser], query: &str) -> Result<String, WorkspaceError> {
    if let Ok(id) = uuid::Uuid::try_parse(query.trim()) {
        return Ok(id.hyphenated().to_string());
    }
    resolve_user(users, query).map(|u| u.id.clone())
}

/// HTTP client for the workspace API.
pub struct Client {
    agent: ureq::Agent,
    token: String,
}

impl Client {
    pub fn new(config: &WorkspaceConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Client {
            agent,
            token: config.token.clone(),
        }
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &format!("{API_BASE}{path}"))
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Notion-Version", API_VERSION)
            .set("User-Agent", USER_AGENT)
    }
}

/// Decode a workspace response, mapping HTTP failures onto [`WorkspaceError`].
fn read_value(
    result: Result<ureq::Response, ureq::Error>,
    what: &str,
) -> Result<Value, WorkspaceError> {
    match result {
        Ok(response) => response
            .into_json()
            .map_err(|e| WorkspaceError::Parse(e.to_string())),
        Err(ureq::Error::Status(401, _)) => Err(WorkspaceError::Unauthorized),
        Err(ureq::Error::Status(404, _)) => Err(WorkspaceError::NotFound(what.to_string())),
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(WorkspaceError::Http(code, body))
        }
        Err(e) => Err(WorkspaceError::Transport(e.to_string())),
    }
}

fn parse_error(what: &str, value: &Value) -> WorkspaceError {
    WorkspaceError::Parse(format!("{what} missing in {value}"))
}

/// Items of a paginated list response.
fn results(value: Value, what: &str) -> Result<Vec<Value>, WorkspaceError> {
    match value.get("results").and_then(Value::as_array) {
        Some(items) => Ok(items.clone()),
        None => Err(parse_error(what, &value)),
    }
}

/// Concatenated plain text of a rich text array.
fn plain_text(rich: &Value) -> String {
    let Some(runs) = rich.as_array() else {
        return String::new();
    };
    runs.iter()
        .map(|run| {
            run.get("plain_text")
                .and_then(Value::as_str)
                .or_else(|| {
                    run.get("text")
                        .and_then(|t| t.get("content"))
                        .and_then(Value::as_str)
                })
                .unwrap_or_default()
        })
        .collect()
}

fn parse_time(value: &Value, key: &str) -> Result<DateTime<Utc>, WorkspaceError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| parse_error(key, value))
}

/// Flatten a page object to the fields the sync uses.
fn page_from_json(value: &Value) -> Result<Page, WorkspaceError> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_error("page id", value))?;
    let url = value
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_error("page url", value))?;
    let properties = value.get("properties").unwrap_or(&Value::Null);
    let issue_url = properties
        .get("URL")
        .and_then(|p| p.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let title = properties
        .get("Task name")
        .and_then(|p| p.get("title"))
        .map(plain_text)
        .filter(|t| !t.is_empty());
    Ok(Page {
        id: id.to_string(),
        url: url.to_string(),
        last_edited_time: parse_time(value, "last_edited_time")?,
        issue_url,
        title,
    })
}

/// Flatten a block object; blocks with no rich text come out empty.
fn block_from_json(value: &Value) -> Result<Block, WorkspaceError> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_error("block id", value))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_error("block type", value))?;
    let text = value
        .get(kind)
        .and_then(|body| body.get("rich_text"))
        .map(plain_text)
        .unwrap_or_default();
    Ok(Block {
        id: id.to_string(),
        kind: kind.to_string(),
        text,
        created_time: parse_time(value, "created_time")?,
    })
}

fn user_from_json(value: &Value) -> Result<WorkspaceUser, WorkspaceError> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_error("user id", value))?;
    Ok(WorkspaceUser {
        id: id.to_string(),
        name: value.get("name").and_then(Value::as_str).map(str::to_string),
        email: value
            .get("person")
            .and_then(|p| p.get("email"))
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Extract a catalog row. Rows that do not fit the expected schema yield
/// `None` and are skipped by the caller.
fn catalog_row_from_json(value: &Value) -> Option<CatalogRow> {
    let id = value.get("id")?.as_str()?;
    let properties = value.get("properties")?;
    let long_name = plain_text(properties.get("LongName")?.get("title")?);
    let unique_id = plain_text(properties.get("UniqueId")?.get("rich_text")?);
    if unique_id.is_empty() {
        return None;
    }
    Some(CatalogRow {
        page_id: id.to_string(),
        unique_id,
        long_name,
    })
}

fn text_run(content: &str) -> Value {
    json!([{ "type": "text", "text": { "content": content } }])
}

/// Property payload for a new task page.
fn task_properties(task: &CreateTask) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert("Task name".to_string(), json!({ "title": text_run(&task.title) }));
    properties.insert("URL".to_string(), json!({ "url": task.url }));
    let tags: Vec<Value> = task.tags.iter().map(|t| json!({ "name": t })).collect();
    properties.insert("Tags".to_string(), json!({ "multi_select": tags }));
    if let Some(due) = task.due {
        properties.insert(
            "Due".to_string(),
            json!({ "date": { "start": format_due(due) } }),
        );
    }
    if let Some(id) = &task.assignee_id {
        properties.insert(
            "Assign".to_string(),
            json!({ "people": [{ "object": "user", "id": id }] }),
        );
    }
    if let Some(id) = &task.stakeholder_id {
        properties.insert(
            "Stakeholders".to_string(),
            json!({ "people": [{ "object": "user", "id": id }] }),
        );
    }
    Value::Object(properties)
}

fn paragraph_children(text: &str) -> Value {
    json!({
        "children": [{
            "object": "block",
            "type": "paragraph",
            "paragraph": { "rich_text": text_run(text) }
        }]
    })
}

impl WorkspaceApi for Client {
    fn current_bot(&self) -> Result<WorkspaceUser, WorkspaceError> {
        let value = read_value(self.request("GET", "/users/me").call(), "current bot")?;
        user_from_json(&value)
    }

    fn create_task_page(
        &self,
        database_id: &str,
        task: &CreateTask,
    ) -> Result<Page, WorkspaceError> {
        let body = json!({
            "parent": { "database_id": database_id },
            "properties": task_properties(task),
        });
        let value = read_value(self.request("POST", "/pages").send_json(body), "new page")?;
        page_from_json(&value)
    }

    fn get_page(&self, page_id: &str) -> Result<Page, WorkspaceError> {
        let id = normalize_page_id(page_id)?;
        let value = read_value(self.request("GET", &format!("/pages/{id}")).call(), &id)?;
        page_from_json(&value)
    }

    fn set_page_status(&self, page_id: &str, status: &str) -> Result<(), WorkspaceError> {
        let id = normalize_page_id(page_id)?;
        let body = json!({
            "properties": { "Status": { "status": { "name": status } } }
        });
        read_value(
            self.request("PATCH", &format!("/pages/{id}")).send_json(body),
            &id,
        )?;
        Ok(())
    }

    fn append_text(&self, page_id: &str, text: &str) -> Result<(), WorkspaceError> {
        let id = normalize_page_id(page_id)?;
        read_value(
            self.request("PATCH", &format!("/blocks/{id}/children"))
                .send_json(paragraph_children(text)),
            &id,
        )?;
        Ok(())
    }

    fn list_blocks(&self, page_id: &str) -> Result<Vec<Block>, WorkspaceError> {
        let id = normalize_page_id(page_id)?;
        let value = read_value(
            self.request("GET", &format!("/blocks/{id}/children"))
                .query("page_size", "100")
                .call(),
            &id,
        )?;
        results(value, "blocks")?
            .iter()
            .map(block_from_json)
            .collect()
    }

    fn query_pages_edited_since(
        &self,
        database_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Page>, WorkspaceError> {
        let body = json!({
            "filter": {
                "timestamp": "last_edited_time",
                "last_edited_time": { "on_or_after": since.to_rfc3339() }
            },
            "page_size": 100,
        });
        let value = read_value(
            self.request("POST", &format!("/databases/{database_id}/query"))
                .send_json(body),
            "edited pages",
        )?;
        results(value, "edited pages")?
            .iter()
            .map(page_from_json)
            .collect()
    }

    fn list_users(&self) -> Result<Vec<WorkspaceUser>, WorkspaceError> {
        let value = read_value(
            self.request("GET", "/users").query("page_size", "100").call(),
            "users",
        )?;
        results(value, "users")?.iter().map(user_from_json).collect()
    }

    fn search(&self, query: &str, limit: u32) -> Result<Vec<Value>, WorkspaceError> {
        let body = json!({ "query": query, "page_size": limit });
        let value = read_value(self.request("POST", "/search").send_json(body), query)?;
        results(value, "search results")
    }

    fn query_catalog(&self, database_id: &str) -> Result<Vec<CatalogRow>, WorkspaceError> {
        let value = read_value(
            self.request("POST", &format!("/databases/{database_id}/query"))
                .send_json(json!({ "page_size": 100 })),
            "catalog",
        )?;
        Ok(results(value, "catalog")?
            .iter()
            .filter_map(catalog_row_from_json)
            .collect())
    }

    fn update_catalog_name(&self, page_id: &str, long_name: &str) -> Result<(), WorkspaceError> {
        let id = normalize_page_id(page_id)?;
        let body = json!({
            "properties": { "LongName": { "title": text_run(long_name) } }
        });
        read_value(
            self.request("PATCH", &format!("/pages/{id}")).send_json(body),
            &id,
        )?;
        Ok(())
    }

    fn create_catalog_entry(
        &self,
        database_id: &str,
        unique_id: &str,
        long_name: &str,
    ) -> Result<(), WorkspaceError> {
        let body = json!({
            "parent": { "type": "database_id", "database_id": database_id },
            "properties": {
                "LongName": { "title": text_run(long_name) },
                "UniqueId": { "rich_text": text_run(unique_id) },
            }
        });
        read_value(self.request("POST", "/pages").send_json(body), unique_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> Vec<WorkspaceUser> {
        vec![
            WorkspaceUser {
                id: "11111111-1111-1111-1111-111111111111".to_string(),
                name: Some("Bob Smith".to_string()),
                email: Some("bob@example.com".to_string()),
            },
            WorkspaceUser {
                id: "22222222-2222-2222-2222-222222222222".to_string(),
                name: Some("Ana de la Cruz".to_string()),
                email: Some("ana@example.com".to_string()),
            },
            WorkspaceUser {
                id: "33333333-3333-3333-3333-333333333333".to_string(),
                name: None,
                email: None,
            },
        ]
    }

    #[test]
    fn test_resolve_user_by_email() {
        let users = directory();
        let user = resolve_user(&users, "Bob@Example.com").unwrap();
        assert_eq!(user.name.as_deref(), Some("Bob Smith"));
    }

    #[test]
    fn test_resolve_user_fuzzy_dotted_handle() {
        let users = directory();
        let user = resolve_user(&users, "bob.smith").unwrap();
        assert_eq!(user.id, "11111111-1111-1111-1111-111111111111");
    }

    #[test]
    fn test_resolve_user_substring_fallback() {
        let users = directory();
        let user = resolve_user(&users, "cruz").unwrap();
        assert_eq!(user.name.as_deref(), Some("Ana de la Cruz"));
    }

    #[test]
    fn test_resolve_user_unmatched_is_an_error() {
        let users = directory();
        let err = resolve_user(&users, "nobody.here").unwrap_err();
        assert!(matches!(err, WorkspaceError::UserNotFound(_)));
        assert!(err.to_string().contains("nobody.here"));
    }

    #[test]
    fn test_resolve_user_id_accepts_raw_id() {
        let id = resolve_user_id(&[], "44444444444444444444444444444444").unwrap();
        assert_eq!(id, "44444444-4444-4444-4444-444444444444");
    }

    #[test]
    fn test_normalize_page_id() {
        assert_eq!(
            normalize_page_id("0123456789abcdef0123456789abcdef").unwrap(),
            "01234567-89ab-cdef-0123-456789abcdef"
        );
        assert!(normalize_page_id("not-a-page").is_err());
    }

    #[test]
    fn test_task_properties_full() {
        let task = CreateTask {
            title: "#42:app - Fix login".to_string(),
            url: "https://tracker.example.com/team/app/-/issues/42".to_string(),
            tags: vec!["FromTracker".to_string(), "bug".to_string()],
            due: Some(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()),
            assignee_id: Some("11111111-1111-1111-1111-111111111111".to_string()),
            stakeholder_id: Some("22222222-2222-2222-2222-222222222222".to_string()),
        };
        let props = task_properties(&task);
        assert_eq!(
            props["Task name"]["title"][0]["text"]["content"],
            "#42:app - Fix login"
        );
        assert_eq!(
            props["URL"]["url"],
            "https://tracker.example.com/team/app/-/issues/42"
        );
        assert_eq!(props["Tags"]["multi_select"][0]["name"], "FromTracker");
        assert_eq!(props["Due"]["date"]["start"], "2024-01-10T00:00:00.000Z");
        assert_eq!(
            props["Assign"]["people"][0]["id"],
            "11111111-1111-1111-1111-111111111111"
        );
        assert_eq!(
            props["Stakeholders"]["people"][0]["id"],
            "22222222-2222-2222-2222-222222222222"
        );
    }

    #[test]
    fn test_task_properties_minimal() {
        let task = CreateTask {
            title: "#3:app - Bare issue".to_string(),
            url: "https://tracker.example.com/team/app/-/issues/3".to_string(),
            tags: vec!["FromTracker".to_string()],
            due: None,
            assignee_id: None,
            stakeholder_id: None,
        };
        let props = task_properties(&task);
        assert!(props.get("Due").is_none());
        assert!(props.get("Assign").is_none());
        assert!(props.get("Stakeholders").is_none());
    }

    #[test]
    fn test_page_from_json() {
        let value = json!({
            "id": "01234567-89ab-cdef-0123-456789abcdef",
            "url": "https://pages.example.com/Fix-login-0123456789abcdef0123456789abcdef",
            "last_edited_time": "2024-01-02T10:00:00.000Z",
            "properties": {
                "URL": { "url": "https://tracker.example.com/team/app/-/issues/42" },
                "Task name": { "title": [{ "plain_text": "#42:app - Fix login" }] }
            }
        });
        let page = page_from_json(&value).unwrap();
        assert_eq!(page.id, "01234567-89ab-cdef-0123-456789abcdef");
        assert_eq!(
            page.issue_url.as_deref(),
            Some("https://tracker.example.com/team/app/-/issues/42")
        );
        assert_eq!(page.title.as_deref(), Some("#42:app - Fix login"));
    }

    #[test]
    fn test_page_from_json_without_issue_url() {
        let value = json!({
            "id": "p1",
            "url": "https://pages.example.com/p1",
            "last_edited_time": "2024-01-02T10:00:00.000Z",
            "properties": {}
        });
        let page = page_from_json(&value).unwrap();
        assert!(page.issue_url.is_none());
        assert!(page.title.is_none());
    }

    #[test]
    fn test_block_from_json() {
        let value = json!({
            "id": "b1",
            "type": "paragraph",
            "created_time": "2024-01-02T10:00:00.000Z",
            "paragraph": {
                "rich_text": [
                    { "plain_text": "retry loop " },
                    { "text": { "content": "never fires" } }
                ]
            }
        });
        let block = block_from_json(&value).unwrap();
        assert_eq!(block.kind, "paragraph");
        assert_eq!(block.text, "retry loop never fires");
    }

    #[test]
    fn test_block_from_json_without_text() {
        let value = json!({
            "id": "b2",
            "type": "divider",
            "created_time": "2024-01-02T10:00:00.000Z",
            "divider": {}
        });
        let block = block_from_json(&value).unwrap();
        assert_eq!(block.kind, "divider");
        assert!(block.text.is_empty());
    }

    #[test]
    fn test_catalog_row_from_json() {
        let value = json!({
            "id": "row1",
            "properties": {
                "LongName": { "title": [{ "plain_text": "Deploy frequency" }] },
                "UniqueId": { "rich_text": [{ "plain_text": "deploy_freq" }] }
            }
        });
        let row = catalog_row_from_json(&value).unwrap();
        assert_eq!(row.unique_id, "deploy_freq");
        assert_eq!(row.long_name, "Deploy frequency");

        // Rows without the expected columns are skipped, not fatal.
        assert!(catalog_row_from_json(&json!({ "id": "row2", "properties": {} })).is_none());
    }
}
