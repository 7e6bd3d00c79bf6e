//! Core activity and project repositories.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use evidentia_core::{ActivityRepository, CoreActivity, Error, Project, ProjectRepository, Result};

/// PostgreSQL implementation of ActivityRepository.
pub struct PgActivityRepository {
    pool: Pool<Postgres>,
}

impl PgActivityRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_activity_row(row: sqlx::postgres::PgRow) -> CoreActivity {
        CoreActivity {
            id: row.get("id"),
            project_id: row.get("project_id"),
            name: row.get("name"),
            uncertainty: row.get("uncertainty"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl ActivityRepository for PgActivityRepository {
    async fn insert(&self, activity: &CoreActivity) -> Result<()> {
        sqlx::query(
            "INSERT INTO core_activities (id, project_id, name, uncertainty, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(activity.id)
        .bind(activity.project_id)
        .bind(&activity.name)
        .bind(&activity.uncertainty)
        .bind(activity.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<CoreActivity>> {
        let row = sqlx::query(
            "SELECT id, project_id, name, uncertainty, created_at
             FROM core_activities WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_activity_row))
    }

    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<CoreActivity>> {
        let rows = sqlx::query(
            "SELECT id, project_id, name, uncertainty, created_at
             FROM core_activities WHERE project_id = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_activity_row).collect())
    }
}

/// PostgreSQL implementation of ProjectRepository.
pub struct PgProjectRepository {
    pool: Pool<Postgres>,
}

impl PgProjectRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_project_row(row: sqlx::postgres::PgRow) -> Project {
        Project {
            id: row.get("id"),
            name: row.get("name"),
            hypothesis: row.get("hypothesis"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl ProjectRepository for PgProjectRepository {
    async fn insert(&self, project: &Project) -> Result<()> {
        sqlx::query(
            "INSERT INTO projects (id, name, hypothesis, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(project.id)
        .bind(&project.name)
        .bind(&project.hypothesis)
        .bind(project.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, hypothesis, created_at FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(Self::parse_project_row))
    }

    async fn list(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT id, name, hypothesis, created_at FROM projects ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_project_row).collect())
    }
}
