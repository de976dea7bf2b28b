/// Background metadata backfill for stub links
///
/// Ingestion never waits on page fetches. Stub links are queued here and
/// filled in by a worker task with bounded parallelism. A failed or dropped
/// request leaves the stub in place; the next sighting queues it again.
use crate::{
    error::LinkResult,
    links::metadata::MetadataFetcher,
    metrics,
    models::Link,
    store::EntityStore,
};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Handle for queueing backfill requests
#[derive(Clone)]
pub struct MetadataBackfill {
    tx: mpsc::Sender<String>,
}

impl MetadataBackfill {
    /// Start the worker; it stops once every handle has been dropped
    pub fn spawn(
        store: Arc<dyn EntityStore>,
        fetcher: Arc<dyn MetadataFetcher>,
        concurrency: usize,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));

        let worker = tokio::spawn(async move {
            while let Some(url) = rx.recv().await {
                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let store = store.clone();
                let fetcher = fetcher.clone();

                tokio::spawn(async move {
                    if let Err(e) = backfill_link(store.as_ref(), fetcher.as_ref(), &url).await {
                        warn!(url = %url, error = %e, "Metadata backfill failed");
                    }
                    drop(permit);
                });
            }
            debug!("Metadata backfill worker stopped");
        });

        (Self { tx }, worker)
    }

    /// Queue a link; returns false if the queue is full or closed
    pub fn request(&self, url: &str) -> bool {
        match self.tx.try_send(url.to_string()) {
            Ok(()) => true,
            Err(e) => {
                debug!(url, error = %e, "Dropping metadata backfill request");
                false
            }
        }
    }
}

/// Fetch and store metadata for one link unless it already has a description.
/// Returns whether anything was written.
pub async fn backfill_link(
    store: &dyn EntityStore,
    fetcher: &dyn MetadataFetcher,
    url: &str,
) -> LinkResult<bool> {
    let existing = store.get_link(url).await?;
    if existing.as_ref().map_or(false, |link| !link.is_stub()) {
        metrics::record_metadata_fetch("skipped");
        return Ok(false);
    }

    let metadata = match fetcher.fetch(url).await {
        Ok(metadata) => metadata,
        Err(e) => {
            metrics::record_metadata_fetch("error");
            return Err(e);
        }
    };

    // A page without a description is stored as empty so the link is not queued again
    let previous_title = existing.map(|link| link.title).unwrap_or_default();
    let link = Link {
        url: url.to_string(),
        title: metadata.title.unwrap_or(previous_title),
        description: Some(metadata.description.unwrap_or_default()),
        image_url: metadata.image_url,
    };
    store.save_link_metadata(&link).await?;
    metrics::record_metadata_fetch("success");

    debug!(
        url,
        has_description = link.description.as_deref().map_or(false, |d| !d.is_empty()),
        "Stored link metadata"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::create_memory_pool,
        error::LinkError,
        links::metadata::PageMetadata,
        store::SqliteEntityStore,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeFetcher {
        result: Option<PageMetadata>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> LinkResult<PageMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .ok_or_else(|| LinkError::Metadata(format!("{}: timed out", url)))
        }
    }

    fn fetcher(result: Option<PageMetadata>) -> Arc<FakeFetcher> {
        Arc::new(FakeFetcher {
            result,
            calls: AtomicUsize::new(0),
        })
    }

    fn page() -> PageMetadata {
        PageMetadata {
            title: Some("Fetched".to_string()),
            description: Some("From the page".to_string()),
            image_url: Some("https://example.com/og.png".to_string()),
        }
    }

    async fn store_with_stub(url: &str) -> Arc<SqliteEntityStore> {
        let store = Arc::new(SqliteEntityStore::new(create_memory_pool().await.unwrap()));
        store
            .save_link_metadata(&Link {
                url: url.to_string(),
                title: String::new(),
                description: None,
                image_url: None,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_fills_stub() {
        let store = store_with_stub("https://example.com/a").await;
        let fetcher = fetcher(Some(page()));

        let written = backfill_link(store.as_ref(), fetcher.as_ref(), "https://example.com/a")
            .await
            .unwrap();
        assert!(written);

        let link = store.get_link("https://example.com/a").await.unwrap().unwrap();
        assert_eq!(link.title, "Fetched");
        assert_eq!(link.description.as_deref(), Some("From the page"));
    }

    #[tokio::test]
    async fn test_skips_populated_link() {
        let store = store_with_stub("https://example.com/a").await;
        backfill_link(store.as_ref(), fetcher(Some(page())).as_ref(), "https://example.com/a")
            .await
            .unwrap();

        let second = fetcher(Some(PageMetadata::default()));
        let written = backfill_link(store.as_ref(), second.as_ref(), "https://example.com/a")
            .await
            .unwrap();
        assert!(!written);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_page_without_description_is_fetched_once() {
        let store = store_with_stub("https://example.com/a").await;
        let bare = fetcher(Some(PageMetadata {
            title: Some("Bare".to_string()),
            description: None,
            image_url: None,
        }));

        assert!(backfill_link(store.as_ref(), bare.as_ref(), "https://example.com/a")
            .await
            .unwrap());
        let link = store.get_link("https://example.com/a").await.unwrap().unwrap();
        assert_eq!(link.title, "Bare");
        assert_eq!(link.description.as_deref(), Some(""));

        // The next sighting does not fetch the page again
        assert!(!backfill_link(store.as_ref(), bare.as_ref(), "https://example.com/a")
            .await
            .unwrap());
        assert_eq!(bare.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_stub() {
        let store = store_with_stub("https://example.com/a").await;
        let result = backfill_link(store.as_ref(), fetcher(None).as_ref(), "https://example.com/a").await;
        assert!(matches!(result, Err(LinkError::Metadata(_))));

        let link = store.get_link("https://example.com/a").await.unwrap().unwrap();
        assert!(link.is_stub());
    }

    #[tokio::test]
    async fn test_worker_processes_requests() {
        let store = store_with_stub("https://example.com/a").await;
        let fetcher = fetcher(Some(page()));
        let (backfill, worker) = MetadataBackfill::spawn(store.clone(), fetcher.clone(), 2, 8);

        assert!(backfill.request("https://example.com/a"));
        drop(backfill);
        worker.await.unwrap();

        // The last fetch task may still be writing after the worker loop exits
        for _ in 0..50 {
            if !store.get_link("https://example.com/a").await.unwrap().unwrap().is_stub() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let link = store.get_link("https://example.com/a").await.unwrap().unwrap();
        assert_eq!(link.description.as_deref(), Some("From the page"));
    }
}
