//! Sprint service: sprint lifecycle and per-sprint analytics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use time::Date;
use uuid::Uuid;

use crate::frame::now_ms;
use crate::services::task::{Task, TaskKind, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SprintStatus {
    Planned,
    Active,
    Completed,
}

impl SprintStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        [Self::Planned, Self::Active, Self::Completed]
            .into_iter()
            .find(|s| s.as_str() == raw)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SprintError {
    #[error("sprint not found: {0}")]
    NotFound(Uuid),
    #[error("project not found: {0}")]
    ProjectNotFound(Uuid),
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for SprintError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_SPRINT_NOT_FOUND",
            Self::ProjectNotFound(_) => "E_PROJECT_NOT_FOUND",
            Self::Validation(_) => "E_VALIDATION",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sprint {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub goal: Option<String>,
    pub start_date: Date,
    pub end_date: Date,
    pub status: SprintStatus,
    /// Derived from the sprint's tasks on read.
    pub total_story_points: i64,
    pub completed_story_points: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSprint {
    pub name: String,
    #[serde(default)]
    pub goal: Option<String>,
    pub start_date: Date,
    pub end_date: Date,
}

impl NewSprint {
    /// # Errors
    ///
    /// `Validation` for a blank name or an end date before the start date.
    pub fn validate(mut self) -> Result<Self, SprintError> {
        self.name = self.name.trim().to_owned();
        if self.name.is_empty() {
            return Err(SprintError::Validation("sprint name required".into()));
        }
        if self.end_date < self.start_date {
            return Err(SprintError::Validation("sprint end date is before its start date".into()));
        }
        self.goal = self.goal.map(|g| g.trim().to_owned()).filter(|g| !g.is_empty());
        Ok(self)
    }
}

// =============================================================================
// ANALYTICS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssigneeStats {
    /// `None` groups unassigned tasks.
    pub assignee_id: Option<Uuid>,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub completed_points: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SprintAnalytics {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub total_story_points: i64,
    pub completed_story_points: i64,
    /// Percent of tasks done; 0 without tasks.
    pub completion_rate: f64,
    /// Percent of story points done; 0 without points.
    pub story_points_rate: f64,
    pub points_by_status: BTreeMap<&'static str, i64>,
    pub assignees: Vec<AssigneeStats>,
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: i64, whole: i64) -> f64 {
    if whole == 0 { 0.0 } else { part as f64 / whole as f64 * 100.0 }
}

/// Analytics over the tasks committed to `sprint_id`. Other tasks are ignored.
#[must_use]
pub fn sprint_analytics(sprint_id: Uuid, tasks: &[Task]) -> SprintAnalytics {
    let sprint_tasks: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.kind == TaskKind::Sprint && t.sprint_id == Some(sprint_id))
        .collect();
    let is_done = |t: &Task| t.status == TaskStatus::Done;

    let total_tasks = sprint_tasks.len();
    let completed_tasks = sprint_tasks.iter().filter(|t| is_done(t)).count();
    let total_story_points: i64 = sprint_tasks.iter().map(|t| t.points()).sum();
    let completed_story_points: i64 = sprint_tasks.iter().filter(|t| is_done(t)).map(|t| t.points()).sum();

    let mut points_by_status: BTreeMap<&'static str, i64> =
        TaskStatus::ALL.into_iter().map(|s| (s.as_str(), 0)).collect();
    for t in &sprint_tasks {
        *points_by_status.entry(t.status.as_str()).or_default() += t.points();
    }

    let mut assignees: Vec<AssigneeStats> = Vec::new();
    for t in &sprint_tasks {
        let idx = match assignees.iter().position(|a| a.assignee_id == t.assignee_id) {
            Some(i) => i,
            None => {
                assignees.push(AssigneeStats {
                    assignee_id: t.assignee_id,
                    total_tasks: 0,
                    completed_tasks: 0,
                    completed_points: 0,
                });
                assignees.len() - 1
            }
        };
        let stats = &mut assignees[idx];
        stats.total_tasks += 1;
        if is_done(t) {
            stats.completed_tasks += 1;
            stats.completed_points += t.points();
        }
    }

    SprintAnalytics {
        total_tasks,
        completed_tasks,
        total_story_points,
        completed_story_points,
        completion_rate: percent(
            i64::try_from(completed_tasks).unwrap_or(i64::MAX),
            i64::try_from(total_tasks).unwrap_or(i64::MAX),
        ),
        story_points_rate: percent(completed_story_points, total_story_points),
        points_by_status,
        assignees,
    }
}

// =============================================================================
// DATABASE
// =============================================================================

const SPRINT_SELECT: &str = "SELECT s.id, s.project_id, s.name, s.goal, s.start_date, s.end_date, s.status,
        s.created_at, s.updated_at,
        COALESCE(SUM(t.story_points), 0)::BIGINT AS total_story_points,
        COALESCE(SUM(t.story_points) FILTER (WHERE t.status = 'done'), 0)::BIGINT AS completed_story_points
    FROM sprints s
    LEFT JOIN tasks t ON t.sprint_id = s.id AND t.project_id = s.project_id AND t.kind = 'sprint'";

fn sprint_from_row(r: &sqlx::postgres::PgRow) -> Sprint {
    Sprint {
        id: r.get("id"),
        project_id: r.get("project_id"),
        name: r.get("name"),
        goal: r.get("goal"),
        start_date: r.get("start_date"),
        end_date: r.get("end_date"),
        status: SprintStatus::parse(r.get("status")).unwrap_or(SprintStatus::Planned),
        total_story_points: r.get("total_story_points"),
        completed_story_points: r.get("completed_story_points"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

pub async fn create_sprint(pool: &PgPool, project_id: Uuid, input: NewSprint) -> Result<Sprint, SprintError> {
    let input = input.validate()?;
    let now = now_ms();
    let sprint = Sprint {
        id: Uuid::new_v4(),
        project_id,
        name: input.name,
        goal: input.goal,
        start_date: input.start_date,
        end_date: input.end_date,
        status: SprintStatus::Planned,
        total_story_points: 0,
        completed_story_points: 0,
        created_at: now,
        updated_at: now,
    };
    let result = sqlx::query(
        "INSERT INTO sprints (id, project_id, name, goal, start_date, end_date, status, created_at, updated_at)
         SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9 WHERE EXISTS (SELECT 1 FROM projects WHERE id = $2)",
    )
    .bind(sprint.id)
    .bind(sprint.project_id)
    .bind(&sprint.name)
    .bind(&sprint.goal)
    .bind(sprint.start_date)
    .bind(sprint.end_date)
    .bind(sprint.status.as_str())
    .bind(sprint.created_at)
    .bind(sprint.updated_at)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(SprintError::ProjectNotFound(project_id));
    }
    Ok(sprint)
}

/// Sprints of a project, newest first.
pub async fn list_sprints(pool: &PgPool, project_id: Uuid) -> Result<Vec<Sprint>, SprintError> {
    let rows = sqlx::query(&format!(
        "{SPRINT_SELECT} WHERE s.project_id = $1 GROUP BY s.id ORDER BY s.created_at DESC"
    ))
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(sprint_from_row).collect())
}

pub async fn get_sprint(pool: &PgPool, sprint_id: Uuid) -> Result<Sprint, SprintError> {
    let row = sqlx::query(&format!("{SPRINT_SELECT} WHERE s.id = $1 GROUP BY s.id"))
        .bind(sprint_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(sprint_from_row).ok_or(SprintError::NotFound(sprint_id))
}

/// The first active sprint in a list, if any.
#[must_use]
pub fn active_sprint(sprints: &[Sprint]) -> Option<&Sprint> {
    sprints.iter().find(|s| s.status == SprintStatus::Active)
}

/// Set a sprint's status. Any status may follow any other.
pub async fn set_status(pool: &PgPool, sprint_id: Uuid, status: SprintStatus) -> Result<Sprint, SprintError> {
    let result = sqlx::query("UPDATE sprints SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(sprint_id)
        .bind(status.as_str())
        .bind(now_ms())
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(SprintError::NotFound(sprint_id));
    }
    get_sprint(pool, sprint_id).await
}

#[cfg(test)]
#[path = "sprint_test.rs"]
mod tests;
