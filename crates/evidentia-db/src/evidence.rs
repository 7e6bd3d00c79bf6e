//! Evidence repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use evidentia_core::{
    AutoLink, Error, EvidenceItem, EvidenceRepository, EvidenceSource, LinkAttempt, LinkSource,
    Result, SystematicStep,
};

const EVIDENCE_COLUMNS: &str = "id, project_id, content, source, systematic_step, created_at, \
     deleted_at, linked_activity_id, link_source, link_reason, link_updated_at, \
     link_attempted_at, content_hash";

/// PostgreSQL implementation of EvidenceRepository.
pub struct PgEvidenceRepository {
    pool: Pool<Postgres>,
}

impl PgEvidenceRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_evidence_row(row: sqlx::postgres::PgRow) -> EvidenceItem {
        let source: String = row.get("source");
        let step: String = row.get("systematic_step");
        let link_source: Option<String> = row.get("link_source");

        EvidenceItem {
            id: row.get("id"),
            project_id: row.get("project_id"),
            content: row.get("content"),
            source: source.parse().unwrap_or(EvidenceSource::Note),
            systematic_step: step.parse().unwrap_or(SystematicStep::Unknown),
            created_at: row.get("created_at"),
            deleted_at: row.get("deleted_at"),
            linked_activity_id: row.get("linked_activity_id"),
            link_source: link_source.and_then(|s| s.parse::<LinkSource>().ok()),
            link_reason: row.get("link_reason"),
            link_updated_at: row.get("link_updated_at"),
            link_attempted_at: row.get("link_attempted_at"),
            content_hash: row.get("content_hash"),
        }
    }
}

#[async_trait]
impl EvidenceRepository for PgEvidenceRepository {
    async fn insert(&self, item: &EvidenceItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO evidence (id, project_id, content, source, systematic_step, created_at,
                                   deleted_at, linked_activity_id, link_source, link_reason,
                                   link_updated_at, link_attempted_at, content_hash)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(item.id)
        .bind(item.project_id)
        .bind(&item.content)
        .bind(item.source.as_str())
        .bind(item.systematic_step.as_str())
        .bind(item.created_at)
        .bind(item.deleted_at)
        .bind(item.linked_activity_id)
        .bind(item.link_source.map(|s| s.as_str()))
        .bind(&item.link_reason)
        .bind(item.link_updated_at)
        .bind(item.link_attempted_at)
        .bind(&item.content_hash)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EvidenceItem>> {
        let row = sqlx::query(&format!(
            "SELECT {EVIDENCE_COLUMNS} FROM evidence WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_evidence_row))
    }

    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<EvidenceItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVIDENCE_COLUMNS} FROM evidence
             WHERE project_id = $1
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_evidence_row).collect())
    }

    async fn list_linked(&self, activity_id: Uuid) -> Result<Vec<EvidenceItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVIDENCE_COLUMNS} FROM evidence
             WHERE linked_activity_id = $1 AND deleted_at IS NULL
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(activity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_evidence_row).collect())
    }

    async fn count_attempted_since(&self, project_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM evidence
             WHERE project_id = $1 AND link_attempted_at >= $2",
        )
        .bind(project_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    async fn record_link(&self, link: &AutoLink) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE evidence
             SET linked_activity_id = $2,
                 link_source = 'auto',
                 link_reason = $3,
                 link_updated_at = $4,
                 link_attempted_at = $4,
                 content_hash = $5
             WHERE id = $1 AND link_source IS DISTINCT FROM 'manual'",
        )
        .bind(link.evidence_id)
        .bind(link.activity_id)
        .bind(&link.reason)
        .bind(link.at)
        .bind(&link.content_hash)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_attempt(&self, attempt: &LinkAttempt) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE evidence
             SET link_attempted_at = $2,
                 content_hash = COALESCE($3, content_hash)
             WHERE id = $1 AND link_source IS DISTINCT FROM 'manual'",
        )
        .bind(attempt.evidence_id)
        .bind(attempt.at)
        .bind(&attempt.content_hash)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
