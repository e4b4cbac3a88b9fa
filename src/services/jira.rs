//! Jira import: fetch issues from Jira Cloud and convert them to tasks.
//!
//! Thin HTTP wrapper for `/rest/api/2/search` with basic auth. Response
//! parsing, filtering, and field mapping are pure functions for
//! testability. The `IssueTracker` trait is the seam the import route
//! depends on.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::now_ms;
use crate::services::persistence::env_parse;
use crate::services::task::{self, Task, TaskError, TaskKind, TaskPriority, TaskStatus};
use crate::state::AppState;

const DEFAULT_JIRA_TIMEOUT_SECS: u64 = 15;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const MAX_RESULTS: u32 = 100;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum JiraError {
    #[error("{0}")]
    Validation(String),
    #[error("http client build failed: {0}")]
    HttpClientBuild(String),
    #[error("jira request failed: {0}")]
    Request(String),
    #[error("jira returned {status}: {body}")]
    Response { status: u16, body: String },
    #[error("unexpected jira response: {0}")]
    Parse(String),
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl crate::frame::ErrorCode for JiraError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::HttpClientBuild(_) | Self::Request(_) => "E_JIRA_UNREACHABLE",
            Self::Response { .. } => "E_JIRA_RESPONSE",
            Self::Parse(_) => "E_JIRA_PARSE",
            Self::Task(e) => crate::frame::ErrorCode::error_code(e),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_)) || matches!(self, Self::Response { status, .. } if *status >= 500)
    }
}

/// Connection settings supplied per import.
#[derive(Debug, Clone, Deserialize)]
pub struct JiraConfig {
    pub server_url: String,
    pub email: String,
    pub api_token: String,
    pub project_key: String,
}

impl JiraConfig {
    /// # Errors
    ///
    /// `Validation` if any field is blank.
    pub fn validate(&self) -> Result<(), JiraError> {
        let fields = [&self.server_url, &self.email, &self.api_token, &self.project_key];
        if fields.iter().any(|f| f.trim().is_empty()) {
            return Err(JiraError::Validation("server url, email, api token and project key are required".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn search_url(&self) -> String {
        format!("{}/rest/api/2/search", self.server_url.trim().trim_end_matches('/'))
    }
}

/// A Jira issue reduced to the fields the import uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JiraIssue {
    pub id: String,
    pub key: String,
    pub summary: String,
    pub description: Option<String>,
    /// Jira status name, e.g. `In Review`.
    pub status: String,
    /// Jira priority name, e.g. `Highest`.
    pub priority: String,
    pub issue_type: String,
    pub story_points: Option<f64>,
}

// =============================================================================
// WIRE FORMAT
// =============================================================================

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<RawIssue>,
}

#[derive(Deserialize)]
struct RawIssue {
    id: String,
    key: String,
    fields: RawFields,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct RawFields {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: Option<String>,
    status: Option<Named>,
    priority: Option<Named>,
    issuetype: Option<Named>,
    /// Story points on Jira Cloud's default scrum template.
    #[serde(default)]
    customfield_10016: Option<f64>,
}

/// Parse a `/search` response body.
///
/// # Errors
///
/// `Parse` if the body is not a search response.
pub fn parse_search_response(body: &str) -> Result<Vec<JiraIssue>, JiraError> {
    let resp: SearchResponse = serde_json::from_str(body).map_err(|e| JiraError::Parse(e.to_string()))?;
    Ok(resp
        .issues
        .into_iter()
        .map(|raw| JiraIssue {
            id: raw.id,
            key: raw.key,
            summary: raw.fields.summary,
            description: raw.fields.description.filter(|d| !d.trim().is_empty()),
            status: raw.fields.status.map(|n| n.name).unwrap_or_default(),
            priority: raw.fields.priority.map(|n| n.name).unwrap_or_default(),
            issue_type: raw.fields.issuetype.map(|n| n.name).unwrap_or_default(),
            story_points: raw.fields.customfield_10016,
        })
        .collect())
}

// =============================================================================
// CLIENT
// =============================================================================

/// Source of issues for an import.
#[async_trait::async_trait]
pub trait IssueTracker: Send + Sync {
    /// Fetch the issues of `config.project_key`.
    ///
    /// # Errors
    ///
    /// Returns a [`JiraError`] if the request fails or the response is malformed.
    async fn fetch_issues(&self, config: &JiraConfig) -> Result<Vec<JiraIssue>, JiraError>;
}

pub struct JiraClient {
    http: reqwest::Client,
}

impl JiraClient {
    /// Build a client with `JIRA_TIMEOUT_SECS` as the request timeout.
    ///
    /// # Errors
    ///
    /// `HttpClientBuild` if the TLS backend cannot be initialized.
    pub fn from_env() -> Result<Self, JiraError> {
        let timeout = env_parse("JIRA_TIMEOUT_SECS", DEFAULT_JIRA_TIMEOUT_SECS);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| JiraError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl IssueTracker for JiraClient {
    async fn fetch_issues(&self, config: &JiraConfig) -> Result<Vec<JiraIssue>, JiraError> {
        config.validate()?;
        let jql = format!("project={}", config.project_key.trim());
        let max_results = MAX_RESULTS.to_string();

        let response = self
            .http
            .get(config.search_url())
            .query(&[("jql", jql.as_str()), ("maxResults", max_results.as_str())])
            .basic_auth(config.email.trim(), Some(config.api_token.trim()))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| JiraError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| JiraError::Request(e.to_string()))?;

        if status != 200 {
            return Err(JiraError::Response { status, body: text });
        }
        parse_search_response(&text)
    }
}

// =============================================================================
// MAPPING
// =============================================================================

#[must_use]
pub fn map_status(jira_status: &str) -> TaskStatus {
    match jira_status {
        "In Progress" => TaskStatus::InProgress,
        "In Review" | "Code Review" | "Testing" => TaskStatus::Review,
        "Done" | "Closed" | "Resolved" => TaskStatus::Done,
        // "To Do", "Backlog", "Selected for Development", and anything unknown.
        _ => TaskStatus::Todo,
    }
}

#[must_use]
pub fn map_priority(jira_priority: &str) -> TaskPriority {
    match jira_priority {
        "Lowest" | "Low" => TaskPriority::Low,
        "High" => TaskPriority::High,
        "Highest" | "Critical" | "Blocker" => TaskPriority::Urgent,
        _ => TaskPriority::Medium,
    }
}

/// Which fetched issues to import.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueSelection {
    #[serde(default)]
    pub search: Option<String>,
    /// Exact Jira status name or `all`.
    #[serde(default)]
    pub status: Option<String>,
    /// Exact Jira priority name or `all`.
    #[serde(default)]
    pub priority: Option<String>,
    /// Explicit issue ids; `None` imports every match.
    #[serde(default)]
    pub issue_ids: Option<Vec<String>>,
}

fn exact_or_all(filter: Option<&str>, value: &str) -> bool {
    match filter.map(str::trim) {
        None | Some("" | "all") => true,
        Some(f) => f == value,
    }
}

#[must_use]
pub fn filter_issues(issues: &[JiraIssue], selection: &IssueSelection) -> Vec<JiraIssue> {
    let needle = selection.search.as_deref().unwrap_or("").trim().to_lowercase();
    issues
        .iter()
        .filter(|issue| {
            needle.is_empty()
                || issue.summary.to_lowercase().contains(&needle)
                || issue.key.to_lowercase().contains(&needle)
                || issue
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle))
        })
        .filter(|issue| exact_or_all(selection.status.as_deref(), &issue.status))
        .filter(|issue| exact_or_all(selection.priority.as_deref(), &issue.priority))
        .filter(|issue| selection.issue_ids.as_ref().is_none_or(|ids| ids.contains(&issue.id)))
        .cloned()
        .collect()
}

/// Convert an issue to an unnumbered backlog task reported by `reporter_id`.
#[must_use]
pub fn convert_issue(issue: &JiraIssue, project_id: Uuid, reporter_id: Uuid, now: i64) -> Task {
    #[allow(clippy::cast_possible_truncation)]
    let story_points = issue
        .story_points
        .map(|p| p.round() as i32)
        .filter(|p| *p > 0);
    let title = if issue.summary.trim().is_empty() { issue.key.clone() } else { issue.summary.trim().to_owned() };

    Task {
        id: Uuid::new_v4(),
        project_id,
        task_number: 0,
        title,
        description: issue.description.clone(),
        status: map_status(&issue.status),
        priority: map_priority(&issue.priority),
        assignee_id: None,
        reporter_id,
        story_points,
        kind: TaskKind::Backlog,
        sprint_id: None,
        created_at: now,
        updated_at: now,
    }
}

/// Fetch, select, convert, and insert issues as backlog tasks numbered
/// after the project's current maximum.
///
/// # Errors
///
/// Any fetch error, or a task error from the insert.
pub async fn import_issues(
    state: &AppState,
    project_id: Uuid,
    reporter_id: Uuid,
    config: &JiraConfig,
    selection: &IssueSelection,
) -> Result<Vec<Task>, JiraError> {
    config.validate()?;
    let issues = state.issue_tracker.fetch_issues(config).await?;
    let selected = filter_issues(&issues, selection);
    tracing::info!(%project_id, fetched = issues.len(), selected = selected.len(), "jira import");
    if selected.is_empty() {
        return Ok(Vec::new());
    }

    let now = now_ms();
    let tasks = selected
        .iter()
        .map(|issue| convert_issue(issue, project_id, reporter_id, now))
        .collect();
    Ok(task::insert_numbered(&state.pool, project_id, tasks).await?)
}

#[cfg(test)]
#[path = "jira_test.rs"]
mod tests;
