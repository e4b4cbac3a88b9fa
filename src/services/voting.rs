//! Voting service: planning-poker rooms, live vote state, and tallies.
//!
//! DESIGN
//! ======
//! Room metadata lives in Postgres. While anyone is connected the room is
//! also held in `AppState::rooms` together with its participants and the
//! votes for the current story. Live mutations mark the room dirty and the
//! persistence task flushes it; votes themselves are only persisted as a
//! `voting_sessions` row when a round ends.
//!
//! ERROR HANDLING
//! ==============
//! On last-client leave a dirty room is flushed before eviction. If that
//! flush fails the room stays in memory with its dirty flag so the
//! background task can retry.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{error, info};
use uuid::Uuid;

use crate::frame::now_ms;
use crate::state::{AppState, RoomState};

/// Alphabet for shareable room codes.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Numeric card values on the deck.
pub const POINT_VALUES: [u8; 7] = [1, 2, 3, 5, 8, 13, 21];

const CODE_ATTEMPTS: usize = 5;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum VotingError {
    #[error("room not found: {0}")]
    NotFound(Uuid),
    #[error("no room with code {0}")]
    CodeNotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("only the room manager can do that")]
    Forbidden,
    #[error("voting is not active")]
    VotingInactive,
    #[error("already voted on this story")]
    AlreadyVoted,
    #[error("invalid vote value: {0}")]
    InvalidVote(String),
    #[error("not a participant in this room")]
    NotInRoom,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for VotingError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) | Self::CodeNotFound(_) => "E_ROOM_NOT_FOUND",
            Self::Validation(_) => "E_VALIDATION",
            Self::Forbidden => "E_FORBIDDEN",
            Self::VotingInactive => "E_VOTING_INACTIVE",
            Self::AlreadyVoted => "E_ALREADY_VOTED",
            Self::InvalidVote(_) => "E_INVALID_VOTE",
            Self::NotInRoom => "E_NOT_IN_ROOM",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Persistent room metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingRoom {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub manager_id: Uuid,
    pub current_story: Option<String>,
    pub voting_active: bool,
    pub created_at: i64,
}

/// A user present in a live room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomParticipant {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub is_manager: bool,
    pub joined_at: i64,
}

/// A card played on the current story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VoteValue {
    Points(u8),
    /// `?`
    Unsure,
    /// `☕`
    Pass,
}

impl VoteValue {
    /// Parse a card value. Only values on the deck are accepted.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "?" => Some(Self::Unsure),
            "☕" => Some(Self::Pass),
            other => other
                .parse::<u8>()
                .ok()
                .filter(|n| POINT_VALUES.contains(n))
                .map(Self::Points),
        }
    }

    #[must_use]
    pub fn points(self) -> Option<u8> {
        match self {
            Self::Points(n) => Some(n),
            Self::Unsure | Self::Pass => None,
        }
    }
}

impl fmt::Display for VoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Points(n) => write!(f, "{n}"),
            Self::Unsure => f.write_str("?"),
            Self::Pass => f.write_str("☕"),
        }
    }
}

impl TryFrom<String> for VoteValue {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(value)
    }
}

impl From<VoteValue> for String {
    fn from(value: VoteValue) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub story_title: String,
    pub value: VoteValue,
    pub created_at: i64,
}

/// Aggregate over the numeric votes of one round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteTally {
    /// Rounded to one decimal. `None` when no numeric votes were cast.
    pub average: Option<f64>,
    pub min: Option<u8>,
    pub max: Option<u8>,
    pub numeric_votes: usize,
    pub total_votes: usize,
}

/// A finished voting round as stored in `voting_sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct VotingSessionRecord {
    pub id: Uuid,
    pub room_id: Uuid,
    pub story_title: String,
    pub started_at: i64,
    pub ended_at: i64,
    pub average_vote: Option<f64>,
    pub min_vote: Option<i32>,
    pub max_vote: Option<i32>,
    pub total_votes: i32,
    pub votes: serde_json::Value,
}

/// A vote as shown to room members. `value` is hidden while voting is open.
#[derive(Debug, Clone, Serialize)]
pub struct VoteView {
    pub user_id: Uuid,
    pub user_name: String,
    pub value: Option<VoteValue>,
}

/// Everything a client needs to render a room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room: VotingRoom,
    pub participants: Vec<RoomParticipant>,
    pub votes: Vec<VoteView>,
    /// Present once a round has ended and votes were cast.
    pub tally: Option<VoteTally>,
}

// =============================================================================
// PURE HELPERS
// =============================================================================

/// Generate a random shareable room code.
#[must_use]
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| char::from(ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())]))
        .collect()
}

/// Canonical form used for code lookups.
#[must_use]
pub fn normalize_room_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Tally numeric votes. `?` and `☕` count toward `total_votes` only.
#[must_use]
pub fn tally(votes: &[Vote]) -> VoteTally {
    let numeric: Vec<u8> = votes.iter().filter_map(|v| v.value.points()).collect();
    let average = if numeric.is_empty() {
        None
    } else {
        let sum: f64 = numeric.iter().map(|&n| f64::from(n)).sum();
        #[allow(clippy::cast_precision_loss)]
        let avg = sum / numeric.len() as f64;
        Some((avg * 10.0).round() / 10.0)
    };

    VoteTally {
        average,
        min: numeric.iter().copied().min(),
        max: numeric.iter().copied().max(),
        numeric_votes: numeric.len(),
        total_votes: votes.len(),
    }
}

fn snapshot_of(rs: &RoomState) -> RoomSnapshot {
    let mut participants: Vec<RoomParticipant> = rs.participants.values().cloned().collect();
    participants.sort_by_key(|p| (p.joined_at, p.user_id));

    let reveal = !rs.room.voting_active;
    let votes = rs
        .votes
        .iter()
        .map(|v| VoteView {
            user_id: v.user_id,
            user_name: v.user_name.clone(),
            value: reveal.then_some(v.value),
        })
        .collect();
    let tally = (reveal && !rs.votes.is_empty()).then(|| tally(&rs.votes));

    RoomSnapshot { room: rs.room.clone(), participants, votes, tally }
}

fn session_record(room: &VotingRoom, story_title: String, started_at: i64, votes: &[Vote]) -> VotingSessionRecord {
    let summary = tally(votes);
    VotingSessionRecord {
        id: Uuid::new_v4(),
        room_id: room.id,
        story_title,
        started_at,
        ended_at: now_ms(),
        average_vote: summary.average,
        min_vote: summary.min.map(i32::from),
        max_vote: summary.max.map(i32::from),
        total_votes: i32::try_from(summary.total_votes).unwrap_or(i32::MAX),
        votes: serde_json::to_value(votes).unwrap_or_default(),
    }
}

// =============================================================================
// LIVE ROOM OPERATIONS
// =============================================================================

/// Join a room, hydrating it from Postgres if it is not live yet.
///
/// Re-joining replaces the user's participant entry. Returns the room
/// snapshot and the participant record.
///
/// # Errors
///
/// Returns `NotFound` if the room does not exist.
pub async fn join_room(
    state: &AppState,
    room_id: Uuid,
    user_id: Uuid,
    user_name: &str,
    client_id: Uuid,
) -> Result<(RoomSnapshot, RoomParticipant), VotingError> {
    let mut hydrated = None;
    loop {
        let mut rooms = state.rooms.write().await;
        if let Some(room) = hydrated.take()
            && !rooms.contains_key(&room_id)
        {
            rooms.insert(room_id, RoomState::new(room));
            info!(%room_id, "hydrated voting room from database");
        }
        if let Some(rs) = rooms.get_mut(&room_id) {
            return Ok(enter_room(rs, user_id, user_name, client_id));
        }
        drop(rooms);

        // Not live: load without holding the lock, then re-check.
        hydrated = Some(get_room(&state.pool, room_id).await?.ok_or(VotingError::NotFound(room_id))?);
    }
}

fn enter_room(rs: &mut RoomState, user_id: Uuid, user_name: &str, client_id: Uuid) -> (RoomSnapshot, RoomParticipant) {
    let room_id = rs.room.id;
    let participant = RoomParticipant {
        room_id,
        user_id,
        user_name: user_name.to_owned(),
        is_manager: rs.room.manager_id == user_id,
        joined_at: now_ms(),
    };
    rs.participants.insert(user_id, participant.clone());
    rs.clients.insert(client_id, user_id);
    info!(%room_id, %user_id, %client_id, participants = rs.participants.len(), "joined voting room");

    (snapshot_of(rs), participant)
}

/// Remove a connection from a room.
///
/// Returns the participant that left when this was the user's last
/// connection in the room. Evicts the room once no connections remain.
pub async fn leave_room(state: &AppState, room_id: Uuid, client_id: Uuid) -> Option<RoomParticipant> {
    let mut rooms = state.rooms.write().await;
    let rs = rooms.get_mut(&room_id)?;

    let user_id = rs.clients.remove(&client_id)?;
    let left = if rs.clients.values().any(|u| *u == user_id) {
        None
    } else {
        rs.participants.remove(&user_id)
    };
    info!(%room_id, %client_id, remaining = rs.clients.len(), "left voting room");

    if !rs.clients.is_empty() {
        return left;
    }

    if !rs.dirty {
        rooms.remove(&room_id);
        info!(%room_id, "evicted voting room from memory");
        return left;
    }

    // PHASE: FINAL FLUSH BEFORE EVICTION
    // WHY: perform DB I/O outside the lock; keep the dirty flag until written.
    let written = rs.room.clone();
    drop(rooms);
    let flush_result = flush_rooms(&state.pool, std::slice::from_ref(&written)).await;

    let mut rooms = state.rooms.write().await;
    let Some(rs) = rooms.get(&room_id) else {
        return left;
    };
    if !rs.clients.is_empty() {
        return left;
    }
    let unchanged = rs.room == written;
    match flush_result {
        Ok(()) if unchanged => {
            rooms.remove(&room_id);
            info!(%room_id, "flushed and evicted voting room");
        }
        Ok(()) => {}
        Err(e) => {
            error!(%room_id, error = %e, "final room flush failed; keeping room in memory");
        }
    }
    left
}

/// Open a voting round on `story`. Manager only.
///
/// # Errors
///
/// `NotFound` if the room is not live, `Forbidden` for non-managers,
/// `Validation` for a blank story.
pub async fn start_voting(state: &AppState, room_id: Uuid, user_id: Uuid, story: &str) -> Result<VotingRoom, VotingError> {
    let story = story.trim();
    let mut rooms = state.rooms.write().await;
    let rs = rooms.get_mut(&room_id).ok_or(VotingError::NotFound(room_id))?;
    if rs.room.manager_id != user_id {
        return Err(VotingError::Forbidden);
    }
    if story.is_empty() {
        return Err(VotingError::Validation("story title required".into()));
    }

    rs.room.current_story = Some(story.to_owned());
    rs.room.voting_active = true;
    rs.votes.clear();
    rs.voting_started_at = Some(now_ms());
    rs.dirty = true;
    info!(%room_id, %story, "voting started");
    Ok(rs.room.clone())
}

/// Close the current round and record it as a voting session. Manager only.
///
/// Session history is best-effort: a failed insert is logged and the round
/// still ends.
///
/// # Errors
///
/// `NotFound`, `Forbidden`, or `VotingInactive` when no round is open.
pub async fn end_voting(
    state: &AppState,
    room_id: Uuid,
    user_id: Uuid,
) -> Result<(RoomSnapshot, VotingSessionRecord), VotingError> {
    let (snapshot, record) = {
        let mut rooms = state.rooms.write().await;
        let rs = rooms.get_mut(&room_id).ok_or(VotingError::NotFound(room_id))?;
        if rs.room.manager_id != user_id {
            return Err(VotingError::Forbidden);
        }
        if !rs.room.voting_active {
            return Err(VotingError::VotingInactive);
        }

        rs.room.voting_active = false;
        rs.dirty = true;
        let started_at = rs.voting_started_at.take().unwrap_or(rs.room.created_at);
        let story = rs.room.current_story.clone().unwrap_or_default();
        let record = session_record(&rs.room, story, started_at, &rs.votes);
        (snapshot_of(rs), record)
    };

    if let Err(e) = record_session(&state.pool, &record).await {
        error!(%room_id, error = %e, "failed to record voting session");
    }
    info!(%room_id, total_votes = record.total_votes, average = ?record.average_vote, "voting ended");
    Ok((snapshot, record))
}

/// Cast a vote on the open round.
///
/// # Errors
///
/// `InvalidVote` for values off the deck, `NotFound`, `NotInRoom`,
/// `VotingInactive`, or `AlreadyVoted`.
pub async fn cast_vote(state: &AppState, room_id: Uuid, user_id: Uuid, raw_value: &str) -> Result<Vote, VotingError> {
    let value = VoteValue::parse(raw_value).ok_or_else(|| VotingError::InvalidVote(raw_value.to_owned()))?;

    let mut rooms = state.rooms.write().await;
    let rs = rooms.get_mut(&room_id).ok_or(VotingError::NotFound(room_id))?;
    let Some(participant) = rs.participants.get(&user_id) else {
        return Err(VotingError::NotInRoom);
    };
    if !rs.room.voting_active {
        return Err(VotingError::VotingInactive);
    }
    if rs.votes.iter().any(|v| v.user_id == user_id) {
        return Err(VotingError::AlreadyVoted);
    }

    let vote = Vote {
        id: Uuid::new_v4(),
        room_id,
        user_id,
        user_name: participant.user_name.clone(),
        story_title: rs.room.current_story.clone().unwrap_or_default(),
        value,
        created_at: now_ms(),
    };
    rs.votes.push(vote.clone());
    Ok(vote)
}

/// Current live snapshot of a room.
///
/// # Errors
///
/// `NotFound` if the room is not live.
pub async fn snapshot(state: &AppState, room_id: Uuid) -> Result<RoomSnapshot, VotingError> {
    let rooms = state.rooms.read().await;
    rooms.get(&room_id).map(snapshot_of).ok_or(VotingError::NotFound(room_id))
}

/// Live room metadata if the room is in memory.
pub async fn live_room(state: &AppState, room_id: Uuid) -> Option<VotingRoom> {
    state.rooms.read().await.get(&room_id).map(|rs| rs.room.clone())
}

// =============================================================================
// DATABASE
// =============================================================================

fn room_from_row(row: &sqlx::postgres::PgRow) -> VotingRoom {
    VotingRoom {
        id: row.get("id"),
        name: row.get("name"),
        code: row.get("code"),
        manager_id: row.get("manager_id"),
        current_story: row.get("current_story"),
        voting_active: row.get("voting_active"),
        created_at: row.get("created_at"),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.kind() == sqlx::error::ErrorKind::UniqueViolation)
}

/// Create a room managed by `manager_id` with a fresh code.
///
/// # Errors
///
/// `Validation` for a blank name, `Database` on failure (including
/// exhausting code retries on collisions).
pub async fn create_room(pool: &PgPool, name: &str, manager_id: Uuid) -> Result<VotingRoom, VotingError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(VotingError::Validation("room name required".into()));
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        let room = VotingRoom {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            code: generate_room_code(),
            manager_id,
            current_story: None,
            voting_active: false,
            created_at: now_ms(),
        };
        let result = sqlx::query(
            "INSERT INTO voting_rooms (id, name, code, manager_id, voting_active, created_at)
             VALUES ($1, $2, $3, $4, false, $5)",
        )
        .bind(room.id)
        .bind(&room.name)
        .bind(&room.code)
        .bind(room.manager_id)
        .bind(room.created_at)
        .execute(pool)
        .await;

        match result {
            Ok(_) => {
                info!(room_id = %room.id, code = %room.code, "voting room created");
                return Ok(room);
            }
            Err(e) if is_unique_violation(&e) && attempt < CODE_ATTEMPTS => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// All rooms, newest first.
pub async fn list_rooms(pool: &PgPool) -> Result<Vec<VotingRoom>, VotingError> {
    let rows = sqlx::query(
        "SELECT id, name, code, manager_id, current_story, voting_active, created_at
         FROM voting_rooms ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(room_from_row).collect())
}

pub async fn get_room(pool: &PgPool, room_id: Uuid) -> Result<Option<VotingRoom>, VotingError> {
    let row = sqlx::query(
        "SELECT id, name, code, manager_id, current_story, voting_active, created_at
         FROM voting_rooms WHERE id = $1",
    )
    .bind(room_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(room_from_row))
}

/// Look up a room by its share code (case and whitespace insensitive).
///
/// # Errors
///
/// `CodeNotFound` when no room matches.
pub async fn find_room_by_code(pool: &PgPool, raw_code: &str) -> Result<VotingRoom, VotingError> {
    let code = normalize_room_code(raw_code);
    let row = sqlx::query(
        "SELECT id, name, code, manager_id, current_story, voting_active, created_at
         FROM voting_rooms WHERE code = $1",
    )
    .bind(&code)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(room_from_row).ok_or(VotingError::CodeNotFound(code))
}

/// Number of rooms managed by `user_id` with a round open.
pub async fn count_active_managed(pool: &PgPool, user_id: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM voting_rooms WHERE manager_id = $1 AND voting_active")
        .bind(user_id)
        .fetch_one(pool)
        .await
}

/// Write live room metadata back to Postgres in one transaction.
pub async fn flush_rooms(pool: &PgPool, rooms: &[VotingRoom]) -> Result<(), sqlx::Error> {
    if rooms.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    for room in rooms {
        sqlx::query("UPDATE voting_rooms SET current_story = $2, voting_active = $3 WHERE id = $1")
            .bind(room.id)
            .bind(&room.current_story)
            .bind(room.voting_active)
            .execute(tx.as_mut())
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn record_session(pool: &PgPool, record: &VotingSessionRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO voting_sessions
             (id, room_id, story_title, started_at, ended_at, average_vote, min_vote, max_vote, total_votes, votes)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(record.id)
    .bind(record.room_id)
    .bind(&record.story_title)
    .bind(record.started_at)
    .bind(record.ended_at)
    .bind(record.average_vote)
    .bind(record.min_vote)
    .bind(record.max_vote)
    .bind(record.total_votes)
    .bind(&record.votes)
    .execute(pool)
    .await?;
    Ok(())
}

/// Past rounds for a room, most recent first.
pub async fn list_sessions(pool: &PgPool, room_id: Uuid) -> Result<Vec<VotingSessionRecord>, VotingError> {
    let rows = sqlx::query(
        "SELECT id, room_id, story_title, started_at, ended_at, average_vote, min_vote, max_vote, total_votes, votes
         FROM voting_sessions WHERE room_id = $1 ORDER BY ended_at DESC",
    )
    .bind(room_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| VotingSessionRecord {
            id: r.get("id"),
            room_id: r.get("room_id"),
            story_title: r.get("story_title"),
            started_at: r.get("started_at"),
            ended_at: r.get("ended_at"),
            average_vote: r.get("average_vote"),
            min_vote: r.get("min_vote"),
            max_vote: r.get("max_vote"),
            total_votes: r.get("total_votes"),
            votes: r.get("votes"),
        })
        .collect())
}

#[cfg(test)]
#[path = "voting_test.rs"]
mod tests;
