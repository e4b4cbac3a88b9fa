//! Activity feed: recent team events shown on the dashboard.
//!
//! Events are stored in `activity` and mirrored live on the
//! `team-activity` channel. Recording is best-effort: a failed insert is
//! logged and the live publication still goes out.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::frame::now_ms;
use crate::services::channel;
use crate::state::AppState;

/// Number of items the dashboard shows.
pub const RECENT_ACTIVITY_LIMIT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    TaskCreated,
    TaskCompleted,
    VotingStarted,
    RetroCreated,
}

impl ActivityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskCompleted => "task_completed",
            Self::VotingStarted => "voting_started",
            Self::RetroCreated => "retro_created",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "task_created" => Some(Self::TaskCreated),
            "task_completed" => Some(Self::TaskCompleted),
            "voting_started" => Some(Self::VotingStarted),
            "retro_created" => Some(Self::RetroCreated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub title: String,
    pub description: String,
    pub user_id: Option<Uuid>,
    pub user_name: String,
    pub ts: i64,
}

impl ActivityItem {
    #[must_use]
    pub fn new(kind: ActivityKind, title: impl Into<String>, description: impl Into<String>, user_id: Uuid, user_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            description: description.into(),
            user_id: Some(user_id),
            user_name: user_name.to_owned(),
            ts: now_ms(),
        }
    }
}

/// Persist an activity item and publish it on the team activity channel.
pub async fn record(state: &AppState, item: ActivityItem) {
    let result = sqlx::query(
        "INSERT INTO activity (id, kind, title, description, user_id, user_name, ts)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(item.id)
    .bind(item.kind.as_str())
    .bind(&item.title)
    .bind(&item.description)
    .bind(item.user_id)
    .bind(&item.user_name)
    .bind(item.ts)
    .execute(&state.pool)
    .await;
    if let Err(e) = result {
        warn!(error = %e, kind = item.kind.as_str(), "failed to persist activity");
    }

    let data = serde_json::to_value(&item).unwrap_or_default();
    channel::publish(state, channel::TEAM_ACTIVITY_CHANNEL, "activity", data, item.user_id, None).await;
}

/// Most recent activity, newest first.
pub async fn recent(pool: &PgPool, limit: i64) -> Result<Vec<ActivityItem>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, kind, title, description, user_id, user_name, ts
         FROM activity ORDER BY ts DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .filter_map(|r| {
            let kind = ActivityKind::parse(r.get::<&str, _>("kind"))?;
            Some(ActivityItem {
                id: r.get("id"),
                kind,
                title: r.get("title"),
                description: r.get("description"),
                user_id: r.get("user_id"),
                user_name: r.get("user_name"),
                ts: r.get("ts"),
            })
        })
        .collect())
}
