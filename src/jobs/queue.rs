/// Sync job queue
use crate::{
    db::{from_millis, to_millis},
    error::{LinkError, LinkResult},
    models::{JobStatus, SyncJob},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job for a user; returns false if one is already pending
    async fn enqueue(&self, user_id: &str) -> LinkResult<bool>;

    /// Up to `max` pending jobs, oldest first. Jobs stay pending until marked.
    async fn dequeue(&self, max: usize) -> LinkResult<Vec<SyncJob>>;

    async fn mark_completed(&self, job_id: Uuid) -> LinkResult<()>;

    /// Record the failure and bump the retry count
    async fn mark_failed(&self, job_id: Uuid, error: &str) -> LinkResult<()>;

    async fn pending_count(&self) -> LinkResult<i64>;

    async fn get(&self, job_id: Uuid) -> LinkResult<Option<SyncJob>>;
}

/// Job queue stored in the `sync_job` table
#[derive(Clone)]
pub struct SqliteJobQueue {
    db: SqlitePool,
}

impl SqliteJobQueue {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    fn job_from_row(row: &SqliteRow) -> LinkResult<SyncJob> {
        let id: String = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        let enqueued_at: i64 = row.try_get("enqueued_at")?;
        let processed_at: Option<i64> = row.try_get("processed_at")?;

        Ok(SyncJob {
            id: Uuid::parse_str(&id).map_err(|e| LinkError::Internal(format!("Invalid job id {}: {}", id, e)))?,
            user_id: row.try_get("user_id")?,
            status: JobStatus::parse(&status)
                .ok_or_else(|| LinkError::Internal(format!("Invalid job status: {}", status)))?,
            enqueued_at: from_millis(enqueued_at),
            processed_at: processed_at.map(from_millis),
            retries: row.try_get("retries")?,
            error: row.try_get("error")?,
        })
    }

    async fn settle(&self, job_id: Uuid, status: JobStatus, error: Option<&str>) -> LinkResult<()> {
        let retry_increment = if status == JobStatus::Failed { 1 } else { 0 };

        let result = sqlx::query(
            "UPDATE sync_job
             SET status = ?2, processed_at = ?3, error = ?4, retries = retries + ?5
             WHERE id = ?1 AND status = 'pending'",
        )
        .bind(job_id.to_string())
        .bind(status.as_str())
        .bind(to_millis(Utc::now()))
        .bind(error)
        .bind(retry_increment)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LinkError::NotFound(format!("No pending job {}", job_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, user_id: &str) -> LinkResult<bool> {
        // The partial unique index collapses duplicate pending jobs
        let result = sqlx::query(
            "INSERT INTO sync_job (id, user_id, status, enqueued_at)
             VALUES (?1, ?2, 'pending', ?3)
             ON CONFLICT DO NOTHING",
        )
        .bind(Uuid::now_v7().to_string())
        .bind(user_id)
        .bind(to_millis(Utc::now()))
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn dequeue(&self, max: usize) -> LinkResult<Vec<SyncJob>> {
        let rows = sqlx::query(
            "SELECT id, user_id, status, enqueued_at, processed_at, retries, error
             FROM sync_job
             WHERE status = 'pending'
             ORDER BY enqueued_at ASC, rowid ASC
             LIMIT ?1",
        )
        .bind(max as i64)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::job_from_row).collect()
    }

    async fn mark_completed(&self, job_id: Uuid) -> LinkResult<()> {
        self.settle(job_id, JobStatus::Completed, None).await
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> LinkResult<()> {
        self.settle(job_id, JobStatus::Failed, Some(error)).await
    }

    async fn pending_count(&self) -> LinkResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_job WHERE status = 'pending'")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    async fn get(&self, job_id: Uuid) -> LinkResult<Option<SyncJob>> {
        let row = sqlx::query(
            "SELECT id, user_id, status, enqueued_at, processed_at, retries, error
             FROM sync_job WHERE id = ?1",
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(Self::job_from_row).transpose()
    }
}
