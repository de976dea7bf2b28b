/// Per-user sync pipeline run by each job
///
/// fetch (per account) -> detect link -> ingest, strictly in that order
/// within a job.
use crate::{
    error::LinkResult,
    ingest::{IngestOutcome, Normalizer},
    jobs::UserSync,
    links::{detect_link, MetadataBackfill},
    models::Account,
    platforms::{fetch_and_advance, AdapterFactory},
    store::EntityStore,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters for one user's sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub accounts: usize,
    pub failed_accounts: usize,
    pub activities: usize,
    pub links_detected: usize,
    pub created: usize,
    pub attached: usize,
    pub skipped: usize,
    pub backfill_requested: usize,
}

pub struct SyncPipeline {
    store: Arc<dyn EntityStore>,
    adapters: Arc<dyn AdapterFactory>,
    normalizer: Arc<Normalizer>,
    backfill: Option<MetadataBackfill>,
}

impl SyncPipeline {
    pub fn new(
        store: Arc<dyn EntityStore>,
        adapters: Arc<dyn AdapterFactory>,
        normalizer: Arc<Normalizer>,
        backfill: Option<MetadataBackfill>,
    ) -> Self {
        Self {
            store,
            adapters,
            normalizer,
            backfill,
        }
    }

    async fn sync_account(&self, account: &Account, report: &mut SyncReport) -> LinkResult<()> {
        let adapter = self.adapters.adapter_for(account)?;
        let activities = fetch_and_advance(adapter.as_ref(), self.store.as_ref(), account).await?;
        report.activities += activities.len();

        for activity in &activities {
            let Some(link) = detect_link(activity) else {
                continue;
            };
            report.links_detected += 1;

            match self.normalizer.ingest(&account.user_id, activity, &link).await? {
                IngestOutcome::Created(_) => report.created += 1,
                IngestOutcome::Attached(_) => report.attached += 1,
                IngestOutcome::Skipped(_) => {
                    report.skipped += 1;
                    continue;
                }
            }

            // Stubs get another backfill attempt on every sighting
            if link.description.is_none() {
                if let Some(backfill) = &self.backfill {
                    if backfill.request(&link.url) {
                        report.backfill_requested += 1;
                    }
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl UserSync for SyncPipeline {
    async fn sync_user(&self, user_id: &str) -> LinkResult<SyncReport> {
        let accounts = self.store.accounts_for_user(user_id).await?;
        let mut report = SyncReport::default();
        let mut first_error = None;

        for account in &accounts {
            report.accounts += 1;
            if let Err(e) = self.sync_account(account, &mut report).await {
                warn!(
                    user_id,
                    account_id = %account.id,
                    platform = %account.platform,
                    error = %e,
                    "Account sync failed"
                );
                report.failed_accounts += 1;
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        if report.created > 0 || report.attached > 0 {
            info!(
                user_id,
                activities = report.activities,
                created = report.created,
                attached = report.attached,
                "Synced user"
            );
        } else {
            debug!(user_id, activities = report.activities, "Synced user, no new links");
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::create_memory_pool,
        error::LinkError,
        models::{Actor, AccountCursor, Platform},
        platforms::{FetchOutcome, LinkCard, RawActivity, RawPost, TimelineAdapter},
        store::SqliteEntityStore,
    };
    use chrono::{Duration, Utc};

    struct FixedAdapter {
        platform: Platform,
        outcome: Option<FetchOutcome>,
    }

    #[async_trait]
    impl TimelineAdapter for FixedAdapter {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn fetch_new_activity(&self, _account: &Account) -> LinkResult<FetchOutcome> {
            self.outcome.clone().ok_or(LinkError::AuthExpired {
                platform: self.platform,
            })
        }
    }

    /// Mastodon accounts get the fixed activity; Bluesky accounts fail
    struct FixedFactory {
        activities: Vec<RawActivity>,
    }

    impl AdapterFactory for FixedFactory {
        fn adapter_for(&self, account: &Account) -> LinkResult<Arc<dyn TimelineAdapter>> {
            let outcome = match account.platform {
                Platform::Mastodon => Some(FetchOutcome {
                    newest: self.activities.first().map(|a| AccountCursor {
                        post_id: Some(a.id.clone()),
                        position_at: Some(a.position_at),
                    }),
                    activities: self.activities.clone(),
                }),
                Platform::Bluesky => None,
            };
            Ok(Arc::new(FixedAdapter {
                platform: account.platform,
                outcome,
            }))
        }
    }

    fn activity(id: &str, card_url: Option<&str>) -> RawActivity {
        RawActivity {
            platform: Platform::Mastodon,
            id: id.to_string(),
            position_at: Utc::now(),
            post: RawPost {
                url: format!("https://social.example/@ann/{}", id),
                text: "text".to_string(),
                published_at: Utc::now() - Duration::minutes(1),
                author: Actor {
                    handle: "ann@social.example".to_string(),
                    name: None,
                    url: "https://social.example/@ann".to_string(),
                    avatar_url: None,
                },
                images: vec![],
                card: card_url.map(|url| LinkCard {
                    url: url.to_string(),
                    title: "Card".to_string(),
                    description: None,
                    image_url: None,
                }),
                link_spans: vec![],
                quoted: None,
            },
            reposted_by: None,
        }
    }

    async fn pipeline(activities: Vec<RawActivity>) -> (SyncPipeline, Arc<SqliteEntityStore>) {
        let store = Arc::new(SqliteEntityStore::new(create_memory_pool().await.unwrap()));
        store.create_user("user-1").await.unwrap();
        let normalizer = Arc::new(Normalizer::new(store.clone()));
        let pipeline = SyncPipeline::new(
            store.clone(),
            Arc::new(FixedFactory { activities }),
            normalizer,
            None,
        );
        (pipeline, store)
    }

    #[tokio::test]
    async fn test_sync_ingests_linked_activity_only() {
        let (pipeline, store) =
            pipeline(vec![activity("2", Some("https://example.com/a")), activity("1", None)]).await;
        store
            .add_account("user-1", Platform::Mastodon, "https://social.example/", "token")
            .await
            .unwrap();

        let report = pipeline.sync_user("user-1").await.unwrap();
        assert_eq!(report.activities, 2);
        assert_eq!(report.links_detected, 1);
        assert_eq!(report.created, 1);

        // Second run sees the same items and only attaches
        let again = pipeline.sync_user("user-1").await.unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(again.attached, 1);
    }

    #[tokio::test]
    async fn test_failing_account_does_not_block_others() {
        let (pipeline, store) = pipeline(vec![activity("1", Some("https://example.com/a"))]).await;
        store
            .add_account("user-1", Platform::Bluesky, "https://bsky.social", "token")
            .await
            .unwrap();
        store
            .add_account("user-1", Platform::Mastodon, "https://social.example", "token")
            .await
            .unwrap();

        let result = pipeline.sync_user("user-1").await;
        assert!(matches!(result, Err(LinkError::AuthExpired { platform: Platform::Bluesky })));
        assert!(store.get_link("https://example.com/a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_user_without_accounts() {
        let (pipeline, _store) = pipeline(vec![]).await;
        assert_eq!(pipeline.sync_user("user-1").await.unwrap(), SyncReport::default());
    }
}
