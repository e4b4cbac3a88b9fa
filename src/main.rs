mod db;
mod frame;
mod routes;
mod services;
mod state;

use std::sync::Arc;

#[tokio::main]
async fn main() {
    // A missing .env file is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let pool = db::init_pool(&database_url)
        .await
        .expect("database init failed");
    let frame_tx = services::persistence::spawn_frame_persistence_worker(pool.clone());
    let jira = services::jira::JiraClient::from_env().expect("jira http client init failed");
    let state = state::AppState::new(pool, Some(frame_tx), Arc::new(jira));

    // Spawn background room persistence task.
    let _persistence = services::persistence::spawn_persistence_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "teamboard listening");
    axum::serve(listener, app).await.expect("server failed");
}
