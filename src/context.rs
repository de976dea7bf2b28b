/// Application context and dependency injection
use crate::{
    config::WorkerConfig,
    db,
    error::LinkResult,
    ingest::Normalizer,
    jobs::{JobProcessor, SqliteJobQueue, SyncPipeline},
    links::{HtmlMetadataFetcher, MetadataBackfill},
    platforms::HttpAdapterFactory,
    ranking::RankingEngine,
    store::SqliteEntityStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Pending backfill requests held before new ones are dropped
const BACKFILL_QUEUE_CAPACITY: usize = 1024;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<WorkerConfig>,
    pub db: SqlitePool,
    pub store: Arc<SqliteEntityStore>,
    pub queue: Arc<SqliteJobQueue>,
    pub adapters: Arc<HttpAdapterFactory>,
    pub normalizer: Arc<Normalizer>,
    pub ranking: Arc<RankingEngine>,
    pub backfill: MetadataBackfill,
    backfill_worker: Arc<JoinHandle<()>>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: WorkerConfig) -> LinkResult<Self> {
        // Validate configuration
        config.validate()?;

        let db = db::create_pool(
            &config.database.path,
            db::DatabaseOptions {
                max_connections: config.database.max_connections,
                ..Default::default()
            },
        )
        .await?;

        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        tracing::info!(path = %config.database.path.display(), "Database ready");

        Self::with_pool(config, db)
    }

    /// Build services over an already migrated pool
    pub fn with_pool(config: WorkerConfig, db: SqlitePool) -> LinkResult<Self> {
        let store = Arc::new(SqliteEntityStore::new(db.clone()));
        let queue = Arc::new(SqliteJobQueue::new(db.clone()));

        let adapters = Arc::new(HttpAdapterFactory::new(
            &config.fetch.user_agent,
            config.request_timeout(),
            config.fetch_settings(),
        )?);

        let fetcher = Arc::new(HtmlMetadataFetcher::new(
            &config.fetch.user_agent,
            config.metadata_timeout(),
        )?);
        let (backfill, backfill_worker) = MetadataBackfill::spawn(
            store.clone(),
            fetcher,
            config.metadata.concurrency,
            BACKFILL_QUEUE_CAPACITY,
        );

        let normalizer = Arc::new(Normalizer::new(store.clone()));
        let ranking = Arc::new(RankingEngine::new(store.clone()));

        Ok(Self {
            config: Arc::new(config),
            db,
            store,
            queue,
            adapters,
            normalizer,
            ranking,
            backfill,
            backfill_worker: Arc::new(backfill_worker),
        })
    }

    /// Job processor wired to the HTTP adapters and the metadata backfill
    pub fn processor(&self) -> JobProcessor {
        let pipeline = SyncPipeline::new(
            self.store.clone(),
            self.adapters.clone(),
            self.normalizer.clone(),
            Some(self.backfill.clone()),
        );

        JobProcessor::new(
            self.queue.clone(),
            self.store.clone(),
            Arc::new(pipeline),
            self.config.processor_config(),
        )
    }

    /// Whether the metadata backfill worker is still running
    pub fn backfill_running(&self) -> bool {
        !self.backfill_worker.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobQueue;

    #[tokio::test]
    async fn test_context_over_memory_pool() {
        let pool = db::create_memory_pool().await.unwrap();
        let ctx = AppContext::with_pool(WorkerConfig::default(), pool).unwrap();
        assert!(ctx.backfill_running());

        ctx.store.create_user("user-1").await.unwrap();
        let processor = ctx.processor();
        assert_eq!(processor.reseed().await.unwrap(), 1);
        assert_eq!(ctx.queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let mut config = WorkerConfig::default();
        config.jobs.batch_size = 0;
        assert!(AppContext::new(config).await.is_err());
    }
}
