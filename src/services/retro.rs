//! Retrospective boards: items in three categories with an open vote counter.
//!
//! Voting increments a counter with no per-user dedup; anyone may vote on
//! an item any number of times.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::frame::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetroStatus {
    Active,
    Completed,
    Archived,
}

impl RetroStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        [Self::Active, Self::Completed, Self::Archived]
            .into_iter()
            .find(|s| s.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetroCategory {
    WentWell,
    Improve,
    ActionItems,
}

impl RetroCategory {
    /// Column order on the board.
    pub const ALL: [RetroCategory; 3] = [Self::WentWell, Self::Improve, Self::ActionItems];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WentWell => "went_well",
            Self::Improve => "improve",
            Self::ActionItems => "action_items",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetroError {
    #[error("retro board not found: {0}")]
    NotFound(Uuid),
    #[error("retro item not found: {0}")]
    ItemNotFound(Uuid),
    #[error("{0}")]
    Validation(String),
    #[error("only the facilitator can do that")]
    Forbidden,
    #[error("retro board is {0}")]
    BoardClosed(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for RetroError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_RETRO_NOT_FOUND",
            Self::ItemNotFound(_) => "E_RETRO_ITEM_NOT_FOUND",
            Self::Validation(_) => "E_VALIDATION",
            Self::Forbidden => "E_FORBIDDEN",
            Self::BoardClosed(_) => "E_RETRO_CLOSED",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetroBoard {
    pub id: Uuid,
    pub name: String,
    pub facilitator_id: Uuid,
    pub status: RetroStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetroItem {
    pub id: Uuid,
    pub board_id: Uuid,
    pub user_id: Uuid,
    pub category: RetroCategory,
    pub content: String,
    pub votes: i32,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetroColumn {
    pub category: RetroCategory,
    pub items: Vec<RetroItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetroBoardView {
    pub board: RetroBoard,
    pub columns: Vec<RetroColumn>,
}

/// Items in one category, most votes first. Ties keep their input order.
#[must_use]
pub fn items_by_category(items: &[RetroItem], category: RetroCategory) -> Vec<RetroItem> {
    let mut out: Vec<RetroItem> = items.iter().filter(|i| i.category == category).cloned().collect();
    out.sort_by(|a, b| b.votes.cmp(&a.votes));
    out
}

#[must_use]
pub fn board_view(board: RetroBoard, items: &[RetroItem]) -> RetroBoardView {
    let columns = RetroCategory::ALL
        .into_iter()
        .map(|category| RetroColumn { category, items: items_by_category(items, category) })
        .collect();
    RetroBoardView { board, columns }
}

// =============================================================================
// DATABASE
// =============================================================================

fn board_from_row(r: &sqlx::postgres::PgRow) -> RetroBoard {
    RetroBoard {
        id: r.get("id"),
        name: r.get("name"),
        facilitator_id: r.get("facilitator_id"),
        status: RetroStatus::parse(r.get("status")).unwrap_or(RetroStatus::Active),
        created_at: r.get("created_at"),
    }
}

fn item_from_row(r: &sqlx::postgres::PgRow) -> Option<RetroItem> {
    Some(RetroItem {
        id: r.get("id"),
        board_id: r.get("board_id"),
        user_id: r.get("user_id"),
        category: RetroCategory::parse(r.get("category"))?,
        content: r.get("content"),
        votes: r.get("votes"),
        created_at: r.get("created_at"),
    })
}

pub async fn create_board(pool: &PgPool, name: &str, facilitator_id: Uuid) -> Result<RetroBoard, RetroError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RetroError::Validation("retro name required".into()));
    }
    let board = RetroBoard {
        id: Uuid::new_v4(),
        name: name.to_owned(),
        facilitator_id,
        status: RetroStatus::Active,
        created_at: now_ms(),
    };
    sqlx::query("INSERT INTO retro_boards (id, name, facilitator_id, status, created_at) VALUES ($1, $2, $3, $4, $5)")
        .bind(board.id)
        .bind(&board.name)
        .bind(board.facilitator_id)
        .bind(board.status.as_str())
        .bind(board.created_at)
        .execute(pool)
        .await?;
    Ok(board)
}

/// Boards, newest first. Archived boards are included only on request.
pub async fn list_boards(pool: &PgPool, include_archived: bool) -> Result<Vec<RetroBoard>, RetroError> {
    let rows = sqlx::query(
        "SELECT id, name, facilitator_id, status, created_at FROM retro_boards
         WHERE $1 OR status <> 'archived'
         ORDER BY created_at DESC",
    )
    .bind(include_archived)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(board_from_row).collect())
}

pub async fn get_board(pool: &PgPool, board_id: Uuid) -> Result<RetroBoard, RetroError> {
    let row = sqlx::query("SELECT id, name, facilitator_id, status, created_at FROM retro_boards WHERE id = $1")
        .bind(board_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(board_from_row).ok_or(RetroError::NotFound(board_id))
}

/// Items on a board in creation order.
pub async fn list_items(pool: &PgPool, board_id: Uuid) -> Result<Vec<RetroItem>, RetroError> {
    let rows = sqlx::query(
        "SELECT id, board_id, user_id, category, content, votes, created_at
         FROM retro_items WHERE board_id = $1 ORDER BY created_at, id",
    )
    .bind(board_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().filter_map(item_from_row).collect())
}

/// Change a board's status. Facilitator only.
pub async fn set_status(pool: &PgPool, board_id: Uuid, user_id: Uuid, status: RetroStatus) -> Result<RetroBoard, RetroError> {
    let mut board = get_board(pool, board_id).await?;
    if board.facilitator_id != user_id {
        return Err(RetroError::Forbidden);
    }
    sqlx::query("UPDATE retro_boards SET status = $2 WHERE id = $1")
        .bind(board_id)
        .bind(status.as_str())
        .execute(pool)
        .await?;
    board.status = status;
    Ok(board)
}

/// Add an item to an active board.
pub async fn add_item(
    pool: &PgPool,
    board_id: Uuid,
    user_id: Uuid,
    category: RetroCategory,
    content: &str,
) -> Result<RetroItem, RetroError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(RetroError::Validation("item content required".into()));
    }
    let board = get_board(pool, board_id).await?;
    if board.status != RetroStatus::Active {
        return Err(RetroError::BoardClosed(board.status.as_str()));
    }

    let item = RetroItem {
        id: Uuid::new_v4(),
        board_id,
        user_id,
        category,
        content: content.to_owned(),
        votes: 0,
        created_at: now_ms(),
    };
    sqlx::query(
        "INSERT INTO retro_items (id, board_id, user_id, category, content, votes, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(item.id)
    .bind(item.board_id)
    .bind(item.user_id)
    .bind(item.category.as_str())
    .bind(&item.content)
    .bind(item.votes)
    .bind(item.created_at)
    .execute(pool)
    .await?;
    Ok(item)
}

/// Increment an item's vote counter.
pub async fn vote_item(pool: &PgPool, item_id: Uuid) -> Result<RetroItem, RetroError> {
    let row = sqlx::query(
        "UPDATE retro_items SET votes = votes + 1 WHERE id = $1
         RETURNING id, board_id, user_id, category, content, votes, created_at",
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().and_then(item_from_row).ok_or(RetroError::ItemNotFound(item_id))
}
