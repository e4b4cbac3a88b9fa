//! Dashboard: per-user summary counts and the recent activity feed.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::frame::now_ms;
use crate::services::activity::{self, ActivityItem, RECENT_ACTIVITY_LIMIT};
use crate::services::task::{self, TaskError, TaskStatus};
use crate::services::{user, voting};

const MS_PER_MINUTE: i64 = 60_000;

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for DashboardError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Task(e) => crate::frame::ErrorCode::error_code(e),
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    #[serde(flatten)]
    pub item: ActivityItem,
    /// Relative age such as `5m ago`.
    pub time_ago: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub active_voting_sessions: i64,
    pub team_members: i64,
    /// Whole percent.
    pub completion_rate: i64,
    pub recent_activity: Vec<ActivityEntry>,
}

/// `round(completed / total * 100)`, or 0 with no tasks.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn completion_rate(completed: usize, total: usize) -> i64 {
    if total == 0 {
        return 0;
    }
    (completed as f64 / total as f64 * 100.0).round() as i64
}

/// Relative age in whole minutes, hours, or days. Future timestamps read as `0m ago`.
#[must_use]
pub fn format_time_ago(now: i64, ts: i64) -> String {
    let minutes = (now - ts).max(0) / MS_PER_MINUTE;
    if minutes < 60 {
        format!("{minutes}m ago")
    } else if minutes < 1440 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / 1440)
    }
}

/// Assemble the dashboard for `user_id`.
pub async fn dashboard_stats(pool: &PgPool, user_id: Uuid) -> Result<DashboardStats, DashboardError> {
    let tasks = task::list_user_tasks(pool, user_id).await?;
    let completed_tasks = tasks.iter().filter(|t| t.status == TaskStatus::Done).count();
    let active_voting_sessions = voting::count_active_managed(pool, user_id).await?;
    let team_members = user::count_users(pool).await?.max(1);
    let now = now_ms();
    let recent_activity = activity::recent(pool, RECENT_ACTIVITY_LIMIT)
        .await?
        .into_iter()
        .map(|item| ActivityEntry { time_ago: format_time_ago(now, item.ts), item })
        .collect();

    Ok(DashboardStats {
        total_tasks: tasks.len(),
        completed_tasks,
        active_voting_sessions,
        team_members,
        completion_rate: completion_rate(completed_tasks, tasks.len()),
        recent_activity,
    })
}
