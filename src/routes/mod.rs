//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the JSON API and the websocket endpoint under a single
//! Axum router. Anything outside `/api` falls through to the static frontend
//! bundle in `STATIC_DIR`.

pub mod auth;
pub mod dashboard;
pub mod projects;
pub mod retro;
pub mod sprints;
pub mod tasks;
pub mod users;
pub mod voting;
pub mod ws;

use std::path::PathBuf;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// JSON API and websocket routes.
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/ws-ticket", post(auth::ws_ticket))
        .route("/api/projects", get(projects::list_projects).post(projects::create_project))
        .route("/api/projects/{id}", get(projects::get_project).delete(projects::delete_project))
        .route("/api/projects/{id}/sprints", get(sprints::list_sprints).post(sprints::create_sprint))
        .route("/api/projects/{id}/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/api/projects/{id}/board", get(tasks::board))
        .route("/api/projects/{id}/backlog", get(tasks::backlog))
        .route("/api/projects/{id}/import/jira", post(tasks::import_jira))
        .route("/api/sprints/{id}/start", post(sprints::start_sprint))
        .route("/api/sprints/{id}/complete", post(sprints::complete_sprint))
        .route("/api/sprints/{id}/analytics", get(sprints::sprint_analytics))
        .route("/api/tasks/{id}", axum::routing::patch(tasks::update_task).delete(tasks::delete_task))
        .route("/api/tasks/{id}/status", post(tasks::change_status))
        .route("/api/tasks/{id}/drop", post(tasks::drop_task))
        .route("/api/tasks/{id}/comments", get(tasks::list_comments).post(tasks::add_comment))
        .route("/api/tasks/{id}/links", get(tasks::list_links).post(tasks::add_link))
        .route("/api/tasks/{id}/links/{linked_id}", delete(tasks::remove_link))
        .route("/api/rooms", get(voting::list_rooms).post(voting::create_room))
        .route("/api/rooms/code/{code}", get(voting::find_by_code))
        .route("/api/rooms/{id}", get(voting::get_room))
        .route("/api/rooms/{id}/sessions", get(voting::list_sessions))
        .route("/api/retros", get(retro::list_boards).post(retro::create_board))
        .route("/api/retros/{id}", get(retro::get_board))
        .route("/api/retros/{id}/complete", post(retro::complete_board))
        .route("/api/retros/{id}/archive", post(retro::archive_board))
        .route("/api/retros/{id}/items", post(retro::add_item))
        .route("/api/retro-items/{id}/vote", post(retro::vote_item))
        .route("/api/dashboard", get(dashboard::dashboard))
        .route("/api/users/me", get(users::get_profile).patch(users::update_profile))
        .route(
            "/api/users/me/preferences",
            get(users::get_preferences).put(users::update_preferences),
        )
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
}

/// Resolve the directory holding the built frontend.
fn static_dir() -> PathBuf {
    std::env::var("STATIC_DIR").map_or_else(|_| PathBuf::from("static"), PathBuf::from)
}

/// Full application router: API + websocket + static frontend.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api_routes()
        .fallback_service(ServeDir::new(static_dir()).append_index_html_on_directories(true))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
