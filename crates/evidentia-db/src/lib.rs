//! # evidentia-db
//!
//! Storage layer for the evidentia evidence pipeline.
//!
//! This crate provides:
//! - Connection pool sizing
//! - PostgreSQL repositories for evidence, activities, projects, narrative
//!   jobs and cached narratives
//! - An in-memory store with the same semantics for tests and local runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use evidentia_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/evidentia").await?;
//!     let repos = db.repositories();
//!     let projects = repos.projects.list().await?;
//!     println!("{} projects", projects.len());
//!     Ok(())
//! }
//! ```

pub mod activities;
pub mod evidence;
pub mod memory;
pub mod narratives;
pub mod pool;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

use std::sync::Arc;

// Re-export core types
pub use evidentia_core::*;

pub use activities::{PgActivityRepository, PgProjectRepository};
pub use evidence::PgEvidenceRepository;
pub use memory::MemoryStore;
pub use narratives::{PgNarrativeJobRepository, PgNarrativeRepository};
pub use pool::{connect_pool, PoolConfig};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Evidence items and their link state.
    pub evidence: Arc<PgEvidenceRepository>,
    /// Core activities (read-only to the pipeline).
    pub activities: Arc<PgActivityRepository>,
    /// Projects.
    pub projects: Arc<PgProjectRepository>,
    /// Pending narrative jobs.
    pub narrative_jobs: Arc<PgNarrativeJobRepository>,
    /// Cached activity narratives.
    pub narratives: Arc<PgNarrativeRepository>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            evidence: Arc::new(PgEvidenceRepository::new(pool.clone())),
            activities: Arc::new(PgActivityRepository::new(pool.clone())),
            projects: Arc::new(PgProjectRepository::new(pool.clone())),
            narrative_jobs: Arc::new(PgNarrativeJobRepository::new(pool.clone())),
            narratives: Arc::new(PgNarrativeRepository::new(pool.clone())),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::default()).await
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = connect_pool(url, &config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Repository bundle for the pipeline.
    pub fn repositories(&self) -> Repositories {
        Repositories {
            evidence: self.evidence.clone(),
            activities: self.activities.clone(),
            projects: self.projects.clone(),
            narrative_jobs: self.narrative_jobs.clone(),
            narratives: self.narratives.clone(),
        }
    }
}
