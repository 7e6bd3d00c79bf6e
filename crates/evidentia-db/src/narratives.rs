//! Narrative job queue and narrative cache repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use evidentia_core::{
    ActivityNarrative, Confidence, Error, NarrativeJob, NarrativeJobRepository, NarrativeRepository,
    NarrativeUpsert, Result, SystematicStep,
};

const JOB_COLUMNS: &str =
    "activity_id, project_id, priority, created_at, updated_at, claimed_at, attempts, last_error";

const NARRATIVE_COLUMNS: &str = "activity_id, project_id, text, confidence, missing_steps, \
     generated_at, input_hash, version, is_placeholder, model";

/// PostgreSQL implementation of NarrativeJobRepository.
pub struct PgNarrativeJobRepository {
    pool: Pool<Postgres>,
}

impl PgNarrativeJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> NarrativeJob {
        NarrativeJob {
            activity_id: row.get("activity_id"),
            project_id: row.get("project_id"),
            priority: row.get("priority"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            claimed_at: row.get("claimed_at"),
            attempts: row.get("attempts"),
            last_error: row.get("last_error"),
        }
    }
}

#[async_trait]
impl NarrativeJobRepository for PgNarrativeJobRepository {
    async fn enqueue(
        &self,
        project_id: Uuid,
        activity_id: Uuid,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // Single statement upsert so concurrent enqueues never create two rows.
        sqlx::query(
            "INSERT INTO narrative_jobs (activity_id, project_id, priority, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $4)
             ON CONFLICT (activity_id) DO UPDATE
             SET priority = GREATEST(narrative_jobs.priority, EXCLUDED.priority),
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(activity_id)
        .bind(project_id)
        .bind(priority)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn claim_batch(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        lease_expired_before: DateTime<Utc>,
    ) -> Result<Vec<NarrativeJob>> {
        // FOR UPDATE SKIP LOCKED keeps overlapping drain runs on disjoint jobs.
        let rows = sqlx::query(&format!(
            "UPDATE narrative_jobs
             SET claimed_at = $2
             WHERE activity_id IN (
                 SELECT activity_id FROM narrative_jobs
                 WHERE claimed_at IS NULL OR claimed_at < $3
                 ORDER BY priority DESC, created_at ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(limit)
        .bind(now)
        .bind(lease_expired_before)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut jobs: Vec<NarrativeJob> = rows.into_iter().map(Self::parse_job_row).collect();
        // RETURNING does not preserve the subquery order.
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(jobs)
    }

    async fn complete(&self, job: &NarrativeJob) -> Result<bool> {
        let deleted = sqlx::query(
            "DELETE FROM narrative_jobs WHERE activity_id = $1 AND updated_at = $2",
        )
        .bind(job.activity_id)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if deleted == 0 {
            self.release(job.activity_id, None).await?;
        }
        Ok(deleted > 0)
    }

    async fn delete(&self, activity_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM narrative_jobs WHERE activity_id = $1")
            .bind(activity_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn release(&self, activity_id: Uuid, error: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE narrative_jobs
             SET claimed_at = NULL,
                 attempts = attempts + CASE WHEN $2::text IS NULL THEN 0 ELSE 1 END,
                 last_error = COALESCE($2::text, last_error)
             WHERE activity_id = $1",
        )
        .bind(activity_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, activity_id: Uuid) -> Result<Option<NarrativeJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM narrative_jobs WHERE activity_id = $1"
        ))
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_job_row))
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM narrative_jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count)
    }
}

/// PostgreSQL implementation of NarrativeRepository.
pub struct PgNarrativeRepository {
    pool: Pool<Postgres>,
}

impl PgNarrativeRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_narrative_row(row: sqlx::postgres::PgRow) -> ActivityNarrative {
        let confidence: String = row.get("confidence");
        let missing: Vec<String> = row.get("missing_steps");

        ActivityNarrative {
            activity_id: row.get("activity_id"),
            project_id: row.get("project_id"),
            text: row.get("text"),
            confidence: confidence.parse().unwrap_or(Confidence::Low),
            missing_steps: missing
                .iter()
                .map(|s| s.parse().unwrap_or(SystematicStep::Unknown))
                .collect(),
            generated_at: row.get("generated_at"),
            input_hash: row.get("input_hash"),
            version: row.get("version"),
            is_placeholder: row.get("is_placeholder"),
            model: row.get("model"),
        }
    }
}

#[async_trait]
impl NarrativeRepository for PgNarrativeRepository {
    async fn get(&self, activity_id: Uuid) -> Result<Option<ActivityNarrative>> {
        let row = sqlx::query(&format!(
            "SELECT {NARRATIVE_COLUMNS} FROM activity_narratives WHERE activity_id = $1"
        ))
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_narrative_row))
    }

    async fn upsert(&self, narrative: &NarrativeUpsert) -> Result<ActivityNarrative> {
        let missing: Vec<&str> = narrative.missing_steps.iter().map(|s| s.as_str()).collect();

        // The generation log row is written by the same statement.
        let row = sqlx::query(&format!(
            "WITH stored AS (
                 INSERT INTO activity_narratives
                     (activity_id, project_id, text, confidence, missing_steps, generated_at,
                      input_hash, version, is_placeholder, model)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, $9)
                 ON CONFLICT (activity_id) DO UPDATE
                 SET project_id = EXCLUDED.project_id,
                     text = EXCLUDED.text,
                     confidence = EXCLUDED.confidence,
                     missing_steps = EXCLUDED.missing_steps,
                     generated_at = EXCLUDED.generated_at,
                     input_hash = EXCLUDED.input_hash,
                     version = activity_narratives.version + 1,
                     is_placeholder = EXCLUDED.is_placeholder,
                     model = EXCLUDED.model
                 RETURNING {NARRATIVE_COLUMNS}
             ),
             logged AS (
                 INSERT INTO narrative_generations (project_id, activity_id, generated_at)
                 SELECT project_id, activity_id, generated_at FROM stored
                 WHERE NOT is_placeholder
             )
             SELECT {NARRATIVE_COLUMNS} FROM stored"
        ))
        .bind(narrative.activity_id)
        .bind(narrative.project_id)
        .bind(&narrative.text)
        .bind(narrative.confidence.as_str())
        .bind(&missing)
        .bind(narrative.generated_at)
        .bind(&narrative.input_hash)
        .bind(narrative.is_placeholder)
        .bind(&narrative.model)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_narrative_row(row))
    }

    async fn count_generated_since(&self, project_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM narrative_generations
             WHERE project_id = $1 AND generated_at >= $2",
        )
        .bind(project_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }
}
