//! Project service: CRUD for projects, the container of sprints and tasks.

use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::frame::now_ms;

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("project not found: {0}")]
    NotFound(Uuid),
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for ProjectError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_PROJECT_NOT_FOUND",
            Self::Validation(_) => "E_VALIDATION",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    /// Short uppercase prefix for task keys, e.g. `WEB` in `WEB-12`.
    pub key: String,
    pub description: Option<String>,
    pub owner_id: Uuid,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Validated input for a new project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    pub name: String,
    pub key: String,
    pub description: Option<String>,
}

impl NewProject {
    /// Trim fields, uppercase the key, and drop a blank description.
    ///
    /// # Errors
    ///
    /// `Validation` if the name or key is blank.
    pub fn parse(name: &str, key: &str, description: Option<&str>) -> Result<Self, ProjectError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProjectError::Validation("project name required".into()));
        }
        let key = key.trim().to_uppercase();
        if key.is_empty() {
            return Err(ProjectError::Validation("project key required".into()));
        }
        let description = description.map(str::trim).filter(|d| !d.is_empty()).map(str::to_owned);
        Ok(Self { name: name.to_owned(), key, description })
    }
}

fn project_from_row(r: &sqlx::postgres::PgRow) -> Project {
    Project {
        id: r.get("id"),
        name: r.get("name"),
        key: r.get("key"),
        description: r.get("description"),
        owner_id: r.get("owner_id"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

pub async fn create_project(pool: &PgPool, input: NewProject, owner_id: Uuid) -> Result<Project, ProjectError> {
    let now = now_ms();
    let project = Project {
        id: Uuid::new_v4(),
        name: input.name,
        key: input.key,
        description: input.description,
        owner_id,
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO projects (id, name, key, description, owner_id, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(project.id)
    .bind(&project.name)
    .bind(&project.key)
    .bind(&project.description)
    .bind(project.owner_id)
    .bind(project.created_at)
    .bind(project.updated_at)
    .execute(pool)
    .await?;
    Ok(project)
}

/// All projects, newest first.
pub async fn list_projects(pool: &PgPool) -> Result<Vec<Project>, ProjectError> {
    let rows = sqlx::query(
        "SELECT id, name, key, description, owner_id, created_at, updated_at
         FROM projects ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(project_from_row).collect())
}

/// # Errors
///
/// `NotFound` if no such project.
pub async fn get_project(pool: &PgPool, project_id: Uuid) -> Result<Project, ProjectError> {
    let row = sqlx::query(
        "SELECT id, name, key, description, owner_id, created_at, updated_at
         FROM projects WHERE id = $1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(project_from_row).ok_or(ProjectError::NotFound(project_id))
}

/// Delete a project. Sprints and tasks cascade.
pub async fn delete_project(pool: &PgPool, project_id: Uuid) -> Result<(), ProjectError> {
    let result = sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(project_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ProjectError::NotFound(project_id));
    }
    Ok(())
}
