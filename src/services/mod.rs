pub mod activity;
pub mod channel;
pub mod dashboard;
pub mod jira;
pub mod persistence;
pub mod project;
pub mod retro;
pub mod session;
pub mod sprint;
pub mod task;
pub mod user;
pub mod voting;
