use super::*;
use crate::state::test_helpers;

fn issue(id: &str, summary: &str, status: &str, priority: &str) -> JiraIssue {
    JiraIssue {
        id: id.into(),
        key: format!("PROJ-{id}"),
        summary: summary.into(),
        description: None,
        status: status.into(),
        priority: priority.into(),
        issue_type: "Story".into(),
        story_points: None,
    }
}

fn config() -> JiraConfig {
    JiraConfig {
        server_url: "https://acme.atlassian.net/".into(),
        email: "dev@acme.io".into(),
        api_token: "token".into(),
        project_key: "PROJ".into(),
    }
}

// =============================================================================
// config
// =============================================================================

#[test]
fn config_requires_all_fields() {
    assert!(config().validate().is_ok());
    let missing = JiraConfig { api_token: "  ".into(), ..config() };
    assert!(matches!(missing.validate(), Err(JiraError::Validation(_))));
}

#[test]
fn search_url_strips_trailing_slash() {
    assert_eq!(config().search_url(), "https://acme.atlassian.net/rest/api/2/search");
}

// =============================================================================
// parse_search_response
// =============================================================================

#[test]
fn parse_search_response_extracts_fields() {
    let body = r#"{
        "startAt": 0, "total": 2,
        "issues": [
            {"id": "10001", "key": "PROJ-1", "fields": {
                "summary": "Login page", "description": "Build it",
                "status": {"name": "In Review", "statusCategory": {"key": "indeterminate"}},
                "priority": {"name": "Highest"}, "issuetype": {"name": "Story"},
                "customfield_10016": 5.0
            }},
            {"id": "10002", "key": "PROJ-2", "fields": {
                "summary": "Bare", "description": null, "status": {"name": "Done"}, "priority": null
            }}
        ]
    }"#;
    let issues = parse_search_response(body).unwrap();
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].status, "In Review");
    assert_eq!(issues[0].priority, "Highest");
    assert_eq!(issues[0].story_points, Some(5.0));
    assert_eq!(issues[1].description, None);
    assert_eq!(issues[1].priority, "");
    assert_eq!(issues[1].issue_type, "");
}

#[test]
fn parse_search_response_rejects_garbage() {
    assert!(matches!(parse_search_response("<html>"), Err(JiraError::Parse(_))));
}

#[test]
fn parse_search_response_empty_issues() {
    assert!(parse_search_response(r#"{"total":0}"#).unwrap().is_empty());
}

// =============================================================================
// mapping
// =============================================================================

#[test]
fn status_mapping_table() {
    for name in ["To Do", "Backlog", "Selected for Development", "Something Custom", ""] {
        assert_eq!(map_status(name), TaskStatus::Todo, "{name}");
    }
    assert_eq!(map_status("In Progress"), TaskStatus::InProgress);
    for name in ["In Review", "Code Review", "Testing"] {
        assert_eq!(map_status(name), TaskStatus::Review, "{name}");
    }
    for name in ["Done", "Closed", "Resolved"] {
        assert_eq!(map_status(name), TaskStatus::Done, "{name}");
    }
}

#[test]
fn priority_mapping_table() {
    assert_eq!(map_priority("Lowest"), TaskPriority::Low);
    assert_eq!(map_priority("Low"), TaskPriority::Low);
    assert_eq!(map_priority("Medium"), TaskPriority::Medium);
    assert_eq!(map_priority("High"), TaskPriority::High);
    for name in ["Highest", "Critical", "Blocker"] {
        assert_eq!(map_priority(name), TaskPriority::Urgent, "{name}");
    }
    assert_eq!(map_priority("Trivial"), TaskPriority::Medium);
}

// =============================================================================
// selection & conversion
// =============================================================================

#[test]
fn filter_issues_by_search_status_priority_and_ids() {
    let mut with_desc = issue("3", "Refactor", "Done", "Low");
    with_desc.description = Some("touches the LOGIN flow".into());
    let issues = vec![
        issue("1", "Login page", "To Do", "High"),
        issue("2", "Payments", "To Do", "Low"),
        with_desc,
    ];

    let by_search = IssueSelection { search: Some("login".into()), ..IssueSelection::default() };
    assert_eq!(filter_issues(&issues, &by_search).len(), 2);

    let by_key = IssueSelection { search: Some("proj-2".into()), ..IssueSelection::default() };
    assert_eq!(filter_issues(&issues, &by_key)[0].id, "2");

    let by_status = IssueSelection { status: Some("To Do".into()), priority: Some("Low".into()), ..IssueSelection::default() };
    assert_eq!(filter_issues(&issues, &by_status).iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["2"]);

    let by_ids = IssueSelection { issue_ids: Some(vec!["1".into(), "3".into()]), status: Some("all".into()), ..IssueSelection::default() };
    assert_eq!(filter_issues(&issues, &by_ids).len(), 2);
}

#[test]
fn convert_issue_builds_backlog_task() {
    let reporter = Uuid::new_v4();
    let project = Uuid::new_v4();
    let mut src = issue("7", "  Checkout ", "Code Review", "Blocker");
    src.story_points = Some(3.0);
    let t = convert_issue(&src, project, reporter, 99);

    assert_eq!(t.title, "Checkout");
    assert_eq!(t.status, TaskStatus::Review);
    assert_eq!(t.priority, TaskPriority::Urgent);
    assert_eq!(t.kind, TaskKind::Backlog);
    assert_eq!(t.sprint_id, None);
    assert_eq!(t.assignee_id, None);
    assert_eq!(t.reporter_id, reporter);
    assert_eq!(t.project_id, project);
    assert_eq!(t.story_points, Some(3));
    assert_eq!((t.created_at, t.updated_at), (99, 99));
}

#[test]
fn convert_issue_zero_points_and_blank_summary() {
    let mut src = issue("8", " ", "Done", "Medium");
    src.story_points = Some(0.0);
    let t = convert_issue(&src, Uuid::nil(), Uuid::nil(), 0);
    assert_eq!(t.story_points, None);
    assert_eq!(t.title, "PROJ-8");
}

// =============================================================================
// import_issues
// =============================================================================

#[tokio::test]
async fn import_with_no_matching_issues_skips_database() {
    let state = test_helpers::test_app_state_with_issues(vec![issue("1", "A", "Done", "High")]);
    let selection = IssueSelection { status: Some("To Do".into()), ..IssueSelection::default() };
    let tasks = import_issues(&state, Uuid::new_v4(), Uuid::new_v4(), &config(), &selection)
        .await
        .unwrap();
    assert!(tasks.is_empty());
}

#[tokio::test]
async fn import_rejects_incomplete_config_before_fetch() {
    let state = test_helpers::test_app_state();
    let bad = JiraConfig { project_key: String::new(), ..config() };
    let err = import_issues(&state, Uuid::nil(), Uuid::nil(), &bad, &IssueSelection::default())
        .await
        .unwrap_err();
    assert!(matches!(err, JiraError::Validation(_)));
}

#[test]
fn error_codes_and_retryable() {
    use crate::frame::ErrorCode;
    assert_eq!(JiraError::Request("x".into()).error_code(), "E_JIRA_UNREACHABLE");
    assert!(JiraError::Request("x".into()).retryable());
    assert!(JiraError::Response { status: 503, body: String::new() }.retryable());
    assert!(!JiraError::Response { status: 401, body: String::new() }.retryable());
    assert_eq!(JiraError::Task(TaskError::ProjectNotFound(Uuid::nil())).error_code(), "E_PROJECT_NOT_FOUND");
}
