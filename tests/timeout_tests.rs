/// Per-job timeout against a file-backed database
mod common;

use async_trait::async_trait;
use common::*;
use linkpulse::{
    db,
    error::LinkResult,
    ingest::Normalizer,
    jobs::{JobProcessor, JobQueue, ProcessorConfig, SqliteJobQueue, SyncReport, UserSync},
    links::detect_link,
    models::JobStatus,
    platforms::RawActivity,
    store::SqliteEntityStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// File-backed store with migrations applied
async fn file_store(dir: &tempfile::TempDir) -> Arc<SqliteEntityStore> {
    let pool = db::create_pool(&dir.path().join("linkpulse.sqlite"), db::DatabaseOptions::default())
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    Arc::new(SqliteEntityStore::new(pool))
}

/// Ingests one activity after a delay longer than the job timeout
struct SlowSync {
    normalizer: Arc<Normalizer>,
    activity: RawActivity,
    delay: Duration,
    finished: AtomicBool,
}

#[async_trait]
impl UserSync for SlowSync {
    async fn sync_user(&self, user_id: &str) -> LinkResult<SyncReport> {
        tokio::time::sleep(self.delay).await;
        let link = detect_link(&self.activity).unwrap();
        self.normalizer.ingest(user_id, &self.activity, &link).await?;
        self.finished.store(true, Ordering::SeqCst);
        Ok(SyncReport::default())
    }
}

#[tokio::test]
async fn test_timed_out_job_fails_and_late_write_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir).await;
    let queue = Arc::new(SqliteJobQueue::new(store.pool().clone()));
    store.create_user("user-1").await.unwrap();

    let shared = activity("7", "ann", Some("https://example.com/slow"), minutes_ago(2));
    let normalizer = Arc::new(Normalizer::new(store.clone()));
    let link = detect_link(&shared).unwrap();
    normalizer.ingest("user-1", &shared, &link).await.unwrap();

    queue.enqueue("user-1").await.unwrap();
    sqlx::query("UPDATE sync_job SET retries = 2 WHERE user_id = 'user-1'")
        .execute(store.pool())
        .await
        .unwrap();
    let job = queue.dequeue(1).await.unwrap().remove(0);
    assert_eq!(job.retries, 2);

    let sync = Arc::new(SlowSync {
        normalizer,
        activity: shared,
        delay: Duration::from_millis(2500),
        finished: AtomicBool::new(false),
    });
    let processor = JobProcessor::new(
        queue.clone(),
        store.clone(),
        sync.clone(),
        ProcessorConfig {
            job_timeout: Duration::from_secs(1),
            ..ProcessorConfig::default()
        },
    );

    let report = processor.run_batch().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(report.duration < Duration::from_millis(2500));

    let failed = queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.retries, 3);
    assert_eq!(failed.error.as_deref(), Some("Job timed out after 1 seconds"));

    // The abandoned task still finishes and writes through the idempotent path
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(sync.finished.load(Ordering::SeqCst));

    let edges: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM link_post")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(edges, 1);

    let settled = queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(settled.status, JobStatus::Failed);
    assert_eq!(settled.retries, 3);
}
