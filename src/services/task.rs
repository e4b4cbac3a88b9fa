//! Task service: task records, Kanban partitioning, filtering, and the
//! comment/link side tables.
//!
//! DESIGN
//! ======
//! Pure helpers (`build_task`, `apply_patch`, `filter_tasks`,
//! `partition_by_status`, `backlog_sections`, `resolve_drop`) work on
//! in-memory slices so the HTTP layer can load a project's tasks once and
//! shape them per view. Database functions only read and write rows.
//!
//! Task numbers are allocated per project as `max + 1` while holding a row
//! lock on the project, so concurrent creates never collide.

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::frame::now_ms;
use crate::services::sprint::{Sprint, SprintStatus};

// =============================================================================
// ENUMS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    /// Kanban column order.
    pub const ALL: [TaskStatus; 4] = [Self::Todo, Self::InProgress, Self::Review, Self::Done];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        [Self::Low, Self::Medium, Self::High, Self::Urgent]
            .into_iter()
            .find(|p| p.as_str() == raw)
    }
}

/// Whether a task sits in the backlog or is committed to a sprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    Backlog,
    Sprint,
}

impl TaskKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Sprint => "sprint",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Blocks,
    BlockedBy,
    RelatesTo,
}

impl LinkType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::BlockedBy => "blocked_by",
            Self::RelatesTo => "relates_to",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        [Self::Blocks, Self::BlockedBy, Self::RelatesTo]
            .into_iter()
            .find(|l| l.as_str() == raw)
    }
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(Uuid),
    #[error("project not found: {0}")]
    ProjectNotFound(Uuid),
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for TaskError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_TASK_NOT_FOUND",
            Self::ProjectNotFound(_) => "E_PROJECT_NOT_FOUND",
            Self::Validation(_) => "E_VALIDATION",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub task_number: i32,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee_id: Option<Uuid>,
    pub reporter_id: Uuid,
    pub story_points: Option<i32>,
    pub kind: TaskKind,
    pub sprint_id: Option<Uuid>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// Human key such as `WEB-12`.
    #[must_use]
    pub fn display_key(&self, project_key: &str) -> String {
        format!("{project_key}-{}", self.task_number)
    }

    #[must_use]
    pub fn points(&self) -> i64 {
        i64::from(self.story_points.unwrap_or(0))
    }
}

/// Input for a new task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub assignee_id: Option<Uuid>,
    #[serde(default)]
    pub story_points: Option<i32>,
    #[serde(default)]
    pub kind: Option<TaskKind>,
    #[serde(default)]
    pub sprint_id: Option<Uuid>,
}

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update. Absent fields are left unchanged; `null` clears optional ones.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default, deserialize_with = "nullable")]
    pub assignee_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub story_points: Option<Option<i32>>,
    #[serde(default)]
    pub kind: Option<TaskKind>,
    #[serde(default, deserialize_with = "nullable")]
    pub sprint_id: Option<Option<Uuid>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskComment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskLink {
    pub task_id: Uuid,
    pub linked_task_id: Uuid,
    pub link_type: LinkType,
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

/// Next task number given the current maximum in the project.
#[must_use]
pub fn next_task_number(current_max: Option<i32>) -> i32 {
    current_max.unwrap_or(0).max(0) + 1
}

fn normalize_points(points: Option<i32>) -> Result<Option<i32>, TaskError> {
    match points {
        Some(p) if p < 0 => Err(TaskError::Validation("story points cannot be negative".into())),
        Some(0) | None => Ok(None),
        Some(p) => Ok(Some(p)),
    }
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description.filter(|d| !d.trim().is_empty())
}

/// Build a new task record.
///
/// Status starts at `todo`. A sprint task lands in `sprint_id` or, when
/// omitted, in `active_sprint`; a backlog task never carries a sprint.
///
/// # Errors
///
/// `Validation` for a blank title or negative story points.
pub fn build_task(
    project_id: Uuid,
    task_number: i32,
    input: NewTask,
    reporter_id: Uuid,
    active_sprint: Option<Uuid>,
) -> Result<Task, TaskError> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(TaskError::Validation("task title required".into()));
    }
    let kind = input.kind.unwrap_or_default();
    let sprint_id = match kind {
        TaskKind::Sprint => input.sprint_id.or(active_sprint),
        TaskKind::Backlog => None,
    };
    let now = now_ms();

    Ok(Task {
        id: Uuid::new_v4(),
        project_id,
        task_number,
        title: title.to_owned(),
        description: normalize_description(input.description),
        status: TaskStatus::Todo,
        priority: input.priority.unwrap_or_default(),
        assignee_id: input.assignee_id,
        reporter_id,
        story_points: normalize_points(input.story_points)?,
        kind,
        sprint_id,
        created_at: now,
        updated_at: now,
    })
}

/// Apply a partial update in place and refresh `updated_at`.
///
/// # Errors
///
/// `Validation` for a blank title or negative story points. The task is
/// untouched on error.
pub fn apply_patch(task: &mut Task, patch: TaskPatch) -> Result<(), TaskError> {
    let title = match patch.title {
        Some(t) if t.trim().is_empty() => return Err(TaskError::Validation("task title required".into())),
        Some(t) => Some(t.trim().to_owned()),
        None => None,
    };
    let story_points = patch.story_points.map(normalize_points).transpose()?;

    if let Some(title) = title {
        task.title = title;
    }
    if let Some(description) = patch.description {
        task.description = normalize_description(description);
    }
    if let Some(status) = patch.status {
        task.status = status;
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
    }
    if let Some(assignee_id) = patch.assignee_id {
        task.assignee_id = assignee_id;
    }
    if let Some(points) = story_points {
        task.story_points = points;
    }
    if let Some(sprint_id) = patch.sprint_id {
        task.sprint_id = sprint_id;
    }
    if let Some(kind) = patch.kind {
        task.kind = kind;
    }
    if task.kind == TaskKind::Backlog {
        task.sprint_id = None;
    }
    task.updated_at = now_ms();
    Ok(())
}

// =============================================================================
// VIEWS
// =============================================================================

/// Query-string form of a task filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    pub search: Option<String>,
    /// `all` or a status name.
    pub status: Option<String>,
    /// `all`, `backlog`, or `sprint`.
    pub scope: Option<String>,
    /// Sprint for `scope=sprint`; defaults to the active sprint.
    pub sprint_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskScope {
    All,
    Backlog,
    /// Sprint tasks in the given sprint. `None` matches nothing.
    Sprint(Option<Uuid>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilter {
    /// Lowercased search needle. Empty matches everything.
    pub search: String,
    pub status: Option<TaskStatus>,
    pub scope: TaskScope,
}

impl TaskFilter {
    /// Resolve a query against the project's active sprint.
    ///
    /// # Errors
    ///
    /// `Validation` for an unknown status or scope.
    pub fn from_query(query: &TaskQuery, active_sprint: Option<Uuid>) -> Result<Self, TaskError> {
        let status = match query.status.as_deref().map(str::trim) {
            None | Some("" | "all") => None,
            Some(raw) => Some(
                TaskStatus::parse(raw).ok_or_else(|| TaskError::Validation(format!("unknown status: {raw}")))?,
            ),
        };
        let scope = match query.scope.as_deref().map(str::trim) {
            None | Some("" | "all") => TaskScope::All,
            Some("backlog") => TaskScope::Backlog,
            Some("sprint") => TaskScope::Sprint(query.sprint_id.or(active_sprint)),
            Some(raw) => return Err(TaskError::Validation(format!("unknown scope: {raw}"))),
        };
        Ok(Self {
            search: query.search.as_deref().unwrap_or("").trim().to_lowercase(),
            status,
            scope,
        })
    }

    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        let matches_search = self.search.is_empty()
            || task.title.to_lowercase().contains(&self.search)
            || task
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&self.search));
        let matches_status = self.status.is_none_or(|s| task.status == s);
        let matches_scope = match self.scope {
            TaskScope::All => true,
            TaskScope::Backlog => task.kind == TaskKind::Backlog,
            TaskScope::Sprint(sprint) => task.kind == TaskKind::Sprint && sprint.is_some() && task.sprint_id == sprint,
        };
        matches_search && matches_status && matches_scope
    }
}

/// Tasks matching `filter`, order preserved.
#[must_use]
pub fn filter_tasks(tasks: &[Task], filter: &TaskFilter) -> Vec<Task> {
    tasks.iter().filter(|t| filter.matches(t)).cloned().collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct KanbanColumn {
    pub status: TaskStatus,
    /// Drop-target id, `column-<status>`.
    pub column_id: String,
    pub count: usize,
    pub story_points: i64,
    pub tasks: Vec<Task>,
}

/// Split tasks into one column per status, in Kanban order.
#[must_use]
pub fn partition_by_status(tasks: &[Task]) -> Vec<KanbanColumn> {
    TaskStatus::ALL
        .into_iter()
        .map(|status| {
            let tasks: Vec<Task> = tasks.iter().filter(|t| t.status == status).cloned().collect();
            KanbanColumn {
                status,
                column_id: format!("column-{}", status.as_str()),
                count: tasks.len(),
                story_points: tasks.iter().map(Task::points).sum(),
                tasks,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct SprintSection {
    pub sprint: Sprint,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacklogView {
    pub active_sprint: Option<SprintSection>,
    pub backlog: Vec<Task>,
}

/// The backlog page: the active sprint's tasks (if a sprint is active)
/// followed by unscheduled backlog tasks.
#[must_use]
pub fn backlog_sections(sprints: &[Sprint], tasks: &[Task]) -> BacklogView {
    let active_sprint = sprints.iter().find(|s| s.status == SprintStatus::Active).map(|sprint| SprintSection {
        sprint: sprint.clone(),
        tasks: tasks
            .iter()
            .filter(|t| t.kind == TaskKind::Sprint && t.sprint_id == Some(sprint.id))
            .cloned()
            .collect(),
    });
    let backlog = tasks.iter().filter(|t| t.kind == TaskKind::Backlog).cloned().collect();
    BacklogView { active_sprint, backlog }
}

/// Resolve a Kanban drop to a new status.
///
/// `target` is either a column id (`column-<status>`) or the id of the task
/// dropped onto, whose status is adopted. Returns `None` when nothing
/// changes or the target is unknown.
#[must_use]
pub fn resolve_drop(tasks: &[Task], dragged: Uuid, target: &str) -> Option<TaskStatus> {
    let dragged = tasks.iter().find(|t| t.id == dragged)?;
    let new_status = match target.strip_prefix("column-") {
        Some(status) => TaskStatus::parse(status)?,
        None => {
            let over: Uuid = target.parse().ok()?;
            tasks.iter().find(|t| t.id == over)?.status
        }
    };
    (new_status != dragged.status).then_some(new_status)
}

// =============================================================================
// DATABASE
// =============================================================================

const TASK_COLUMNS: &str = "id, project_id, task_number, title, description, status, priority, assignee_id, \
                            reporter_id, story_points, kind, sprint_id, created_at, updated_at";

fn task_from_row(r: &sqlx::postgres::PgRow) -> Task {
    Task {
        id: r.get("id"),
        project_id: r.get("project_id"),
        task_number: r.get("task_number"),
        title: r.get("title"),
        description: r.get("description"),
        status: TaskStatus::parse(r.get("status")).unwrap_or(TaskStatus::Todo),
        priority: TaskPriority::parse(r.get("priority")).unwrap_or_default(),
        assignee_id: r.get("assignee_id"),
        reporter_id: r.get("reporter_id"),
        story_points: r.get("story_points"),
        kind: if r.get::<&str, _>("kind") == "sprint" { TaskKind::Sprint } else { TaskKind::Backlog },
        sprint_id: r.get("sprint_id"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

async fn insert_task(tx: &mut Transaction<'_, Postgres>, task: &Task) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO tasks (id, project_id, task_number, title, description, status, priority, assignee_id,
                            reporter_id, story_points, kind, sprint_id, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(task.id)
    .bind(task.project_id)
    .bind(task.task_number)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status.as_str())
    .bind(task.priority.as_str())
    .bind(task.assignee_id)
    .bind(task.reporter_id)
    .bind(task.story_points)
    .bind(task.kind.as_str())
    .bind(task.sprint_id)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Lock the project row and return the current max task number.
async fn lock_project_numbering(tx: &mut Transaction<'_, Postgres>, project_id: Uuid) -> Result<Option<i32>, TaskError> {
    let exists = sqlx::query("SELECT id FROM projects WHERE id = $1 FOR UPDATE")
        .bind(project_id)
        .fetch_optional(&mut **tx)
        .await?;
    if exists.is_none() {
        return Err(TaskError::ProjectNotFound(project_id));
    }
    let max: Option<i32> = sqlx::query_scalar("SELECT MAX(task_number) FROM tasks WHERE project_id = $1")
        .bind(project_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(max)
}

/// Reject a sprint that does not exist in the task's project.
async fn ensure_sprint_in_project(
    tx: &mut Transaction<'_, Postgres>,
    sprint_id: Uuid,
    project_id: Uuid,
) -> Result<(), TaskError> {
    let found: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sprints WHERE id = $1 AND project_id = $2)")
        .bind(sprint_id)
        .bind(project_id)
        .fetch_one(&mut **tx)
        .await?;
    if !found {
        return Err(TaskError::Validation("sprint does not belong to this project".into()));
    }
    Ok(())
}

/// Create a task with the next number in its project.
pub async fn create_task(pool: &PgPool, project_id: Uuid, input: NewTask, reporter_id: Uuid) -> Result<Task, TaskError> {
    let mut tx = pool.begin().await?;
    let max = lock_project_numbering(&mut tx, project_id).await?;
    let active: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM sprints WHERE project_id = $1 AND status = 'active' ORDER BY start_date LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(tx.as_mut())
    .await?;

    let task = build_task(project_id, next_task_number(max), input, reporter_id, active)?;
    if let Some(sprint_id) = task.sprint_id.filter(|id| Some(*id) != active) {
        ensure_sprint_in_project(&mut tx, sprint_id, project_id).await?;
    }
    insert_task(&mut tx, &task).await?;
    tx.commit().await?;
    Ok(task)
}

/// Insert prepared tasks, renumbering them after the project's current max.
pub async fn insert_numbered(pool: &PgPool, project_id: Uuid, mut tasks: Vec<Task>) -> Result<Vec<Task>, TaskError> {
    let mut tx = pool.begin().await?;
    let mut number = lock_project_numbering(&mut tx, project_id).await?;
    for task in &mut tasks {
        let n = next_task_number(number);
        task.task_number = n;
        task.project_id = project_id;
        number = Some(n);
        insert_task(&mut tx, task).await?;
    }
    tx.commit().await?;
    Ok(tasks)
}

/// All tasks in a project, newest first.
pub async fn list_tasks(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>, TaskError> {
    let rows = sqlx::query(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = $1 ORDER BY created_at DESC, task_number DESC"
    ))
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(task_from_row).collect())
}

/// Tasks a user is assigned to or reported, across projects.
pub async fn list_user_tasks(pool: &PgPool, user_id: Uuid) -> Result<Vec<Task>, TaskError> {
    let rows = sqlx::query(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE assignee_id = $1 OR reporter_id = $1 ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(task_from_row).collect())
}

pub async fn get_task(pool: &PgPool, task_id: Uuid) -> Result<Task, TaskError> {
    let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
        .bind(task_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(task_from_row).ok_or(TaskError::NotFound(task_id))
}

/// Load, patch, and write back a task under a row lock.
///
/// A newly assigned sprint must belong to the task's project.
pub async fn update_task(pool: &PgPool, task_id: Uuid, patch: TaskPatch) -> Result<Task, TaskError> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE"))
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?;
    let mut task = row.as_ref().map(task_from_row).ok_or(TaskError::NotFound(task_id))?;
    let previous_sprint = task.sprint_id;
    apply_patch(&mut task, patch)?;
    if let Some(sprint_id) = task.sprint_id.filter(|id| Some(*id) != previous_sprint) {
        ensure_sprint_in_project(&mut tx, sprint_id, task.project_id).await?;
    }
    sqlx::query(
        "UPDATE tasks SET title = $2, description = $3, status = $4, priority = $5, assignee_id = $6,
                          story_points = $7, kind = $8, sprint_id = $9, updated_at = $10
         WHERE id = $1",
    )
    .bind(task.id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status.as_str())
    .bind(task.priority.as_str())
    .bind(task.assignee_id)
    .bind(task.story_points)
    .bind(task.kind.as_str())
    .bind(task.sprint_id)
    .bind(task.updated_at)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(task)
}

/// Move a task to any status. There is no transition table.
pub async fn change_status(pool: &PgPool, task_id: Uuid, status: TaskStatus) -> Result<Task, TaskError> {
    let row = sqlx::query(&format!(
        "UPDATE tasks SET status = $2, updated_at = $3 WHERE id = $1 RETURNING {TASK_COLUMNS}"
    ))
    .bind(task_id)
    .bind(status.as_str())
    .bind(now_ms())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(task_from_row).ok_or(TaskError::NotFound(task_id))
}

pub async fn delete_task(pool: &PgPool, task_id: Uuid) -> Result<(), TaskError> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = $1").bind(task_id).execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(TaskError::NotFound(task_id));
    }
    Ok(())
}

// =============================================================================
// COMMENTS & LINKS
// =============================================================================

pub async fn add_comment(
    pool: &PgPool,
    task_id: Uuid,
    author_id: Uuid,
    author_name: &str,
    content: &str,
) -> Result<TaskComment, TaskError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(TaskError::Validation("comment content required".into()));
    }
    let comment = TaskComment {
        id: Uuid::new_v4(),
        task_id,
        author_id,
        author_name: author_name.to_owned(),
        content: content.to_owned(),
        created_at: now_ms(),
    };
    let result = sqlx::query(
        "INSERT INTO task_comments (id, task_id, author_id, author_name, content, created_at)
         SELECT $1, $2, $3, $4, $5, $6 WHERE EXISTS (SELECT 1 FROM tasks WHERE id = $2)",
    )
    .bind(comment.id)
    .bind(comment.task_id)
    .bind(comment.author_id)
    .bind(&comment.author_name)
    .bind(&comment.content)
    .bind(comment.created_at)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(TaskError::NotFound(task_id));
    }
    Ok(comment)
}

/// Comments on a task, oldest first.
pub async fn list_comments(pool: &PgPool, task_id: Uuid) -> Result<Vec<TaskComment>, TaskError> {
    let rows = sqlx::query(
        "SELECT id, task_id, author_id, author_name, content, created_at
         FROM task_comments WHERE task_id = $1 ORDER BY created_at",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| TaskComment {
            id: r.get("id"),
            task_id: r.get("task_id"),
            author_id: r.get("author_id"),
            author_name: r.get("author_name"),
            content: r.get("content"),
            created_at: r.get("created_at"),
        })
        .collect())
}

/// Link two tasks. Re-linking the same pair replaces the link type.
pub async fn add_link(pool: &PgPool, task_id: Uuid, linked_task_id: Uuid, link_type: LinkType) -> Result<TaskLink, TaskError> {
    if task_id == linked_task_id {
        return Err(TaskError::Validation("a task cannot link to itself".into()));
    }
    let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE id = $1 OR id = $2")
        .bind(task_id)
        .bind(linked_task_id)
        .fetch_one(pool)
        .await?;
    if found < 2 {
        return Err(TaskError::NotFound(linked_task_id));
    }
    sqlx::query(
        "INSERT INTO task_links (task_id, linked_task_id, link_type) VALUES ($1, $2, $3)
         ON CONFLICT (task_id, linked_task_id) DO UPDATE SET link_type = EXCLUDED.link_type",
    )
    .bind(task_id)
    .bind(linked_task_id)
    .bind(link_type.as_str())
    .execute(pool)
    .await?;
    Ok(TaskLink { task_id, linked_task_id, link_type })
}

pub async fn list_links(pool: &PgPool, task_id: Uuid) -> Result<Vec<TaskLink>, TaskError> {
    let rows = sqlx::query("SELECT task_id, linked_task_id, link_type FROM task_links WHERE task_id = $1")
        .bind(task_id)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .filter_map(|r| {
            Some(TaskLink {
                task_id: r.get("task_id"),
                linked_task_id: r.get("linked_task_id"),
                link_type: LinkType::parse(r.get("link_type"))?,
            })
        })
        .collect())
}

pub async fn remove_link(pool: &PgPool, task_id: Uuid, linked_task_id: Uuid) -> Result<(), TaskError> {
    let result = sqlx::query("DELETE FROM task_links WHERE task_id = $1 AND linked_task_id = $2")
        .bind(task_id)
        .bind(linked_task_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(TaskError::NotFound(linked_task_id));
    }
    Ok(())
}

#[cfg(test)]
#[path = "task_test.rs"]
mod tests;
