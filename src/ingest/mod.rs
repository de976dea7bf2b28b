/// Entity normalizer
///
/// Turns a fetched activity plus its detected link into entities, creating
/// them only when the sharing edge is new. Duplicate-key conflicts from
/// concurrent jobs are resolved by re-checking and attaching, so the same
/// activity can be ingested any number of times by any number of jobs.
use crate::{
    error::{LinkError, LinkResult},
    links::DetectedLink,
    metrics,
    models::{Actor, LinkPost, Post},
    platforms::{RawActivity, RawPost},
    store::{EntityStore, IngestUnit},
};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_CONFLICT_RETRIES: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// A new edge was created
    Created(LinkPost),
    /// The edge already existed; the user was attached to it
    Attached(Uuid),
    /// Nothing was written
    Skipped(&'static str),
}

impl IngestOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Created(_) => "created",
            IngestOutcome::Attached(_) => "attached",
            IngestOutcome::Skipped(_) => "skipped",
        }
    }
}

pub struct Normalizer {
    store: Arc<dyn EntityStore>,
    max_conflict_retries: usize,
}

impl Normalizer {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            max_conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    pub fn with_conflict_retries(mut self, retries: usize) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Create-or-attach the sharing edge for `activity` on behalf of `user_id`
    pub async fn ingest(
        &self,
        user_id: &str,
        activity: &RawActivity,
        link: &DetectedLink,
    ) -> LinkResult<IngestOutcome> {
        let outcome = self.ingest_inner(user_id, activity, link).await?;
        metrics::record_link_post_ingested(outcome.label());
        Ok(outcome)
    }

    async fn ingest_inner(
        &self,
        user_id: &str,
        activity: &RawActivity,
        link: &DetectedLink,
    ) -> LinkResult<IngestOutcome> {
        if let Some(reason) = malformed(activity, link) {
            debug!(activity_id = %activity.id, reason, "Skipping malformed activity");
            return Ok(IngestOutcome::Skipped(reason));
        }

        let actor_handle = activity.sharing_actor().handle.as_str();
        let post_url = activity.post.url.as_str();

        for attempt in 0..=self.max_conflict_retries {
            // Step 1: existing edge, just attach
            if let Some(existing) = self
                .store
                .find_link_post(&link.url, post_url, actor_handle)
                .await?
            {
                self.store.attach_user(existing.id, user_id).await?;
                return Ok(IngestOutcome::Attached(existing.id));
            }

            // Step 2: create everything in one unit
            let unit = build_unit(activity, link);
            match self.store.create_link_post(&unit, user_id).await {
                Ok(created) => {
                    debug!(
                        user_id,
                        link_url = %created.link_url,
                        post_url = %created.post_url,
                        "Created link post"
                    );
                    return Ok(IngestOutcome::Created(created));
                }
                // Step 3: someone else created it first, go back to step 1
                Err(LinkError::Conflict(message)) => {
                    debug!(attempt, %message, "Link post conflict, retrying as attach");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            user_id,
            link_url = %link.url,
            post_url,
            "Giving up on link post after repeated conflicts"
        );
        Ok(IngestOutcome::Skipped("conflict retries exhausted"))
    }
}

fn malformed(activity: &RawActivity, link: &DetectedLink) -> Option<&'static str> {
    if activity.post.url.trim().is_empty() {
        return Some("missing post url");
    }
    if activity.post.author.handle.trim().is_empty() {
        return Some("missing author");
    }
    if activity.reposted_by.as_ref().map_or(false, |a| a.handle.trim().is_empty()) {
        return Some("missing reposter");
    }
    if link.url.trim().is_empty() {
        return Some("missing link url");
    }
    // With no card and no quote, the text is the only thing left to show
    let post = &activity.post;
    if post.text.trim().is_empty() && post.card.is_none() && post.quoted.is_none() {
        return Some("missing text");
    }
    None
}

fn post_from(raw: &RawPost, activity: &RawActivity) -> Post {
    Post {
        url: raw.url.clone(),
        text: raw.text.clone(),
        platform: activity.platform,
        published_at: raw.published_at,
        author_handle: raw.author.handle.clone(),
        repost_handle: None,
        quoting_url: None,
        images: raw.images.clone(),
    }
}

fn push_actor(actors: &mut Vec<Actor>, actor: &Actor) {
    if !actors.iter().any(|a| a.handle == actor.handle) {
        actors.push(actor.clone());
    }
}

fn build_unit(activity: &RawActivity, link: &DetectedLink) -> IngestUnit {
    let raw = &activity.post;

    let mut actors = Vec::new();
    push_actor(&mut actors, &raw.author);
    if let Some(reposter) = &activity.reposted_by {
        push_actor(&mut actors, reposter);
    }

    // A quote without a usable author or url is dropped, the post itself is kept
    let quoted = raw
        .quoted
        .as_deref()
        .filter(|q| !q.url.trim().is_empty() && !q.author.handle.trim().is_empty())
        .map(|q| {
            push_actor(&mut actors, &q.author);
            post_from(q, activity)
        });

    let mut post = post_from(raw, activity);
    post.repost_handle = activity.reposted_by.as_ref().map(|a| a.handle.clone());
    post.quoting_url = quoted.as_ref().map(|q| q.url.clone());

    IngestUnit {
        actors,
        quoted,
        post,
        link: link.to_link(),
        actor_handle: activity.sharing_actor().handle.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::create_memory_pool,
        links::{detect_link, LinkSource},
        models::{Account, AccountCursor, Link, LinkPostDetail, Platform},
        platforms::LinkCard,
        store::SqliteEntityStore,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn actor(handle: &str) -> Actor {
        Actor {
            handle: handle.to_string(),
            name: Some(handle.to_string()),
            url: format!("https://bsky.app/profile/{}", handle),
            avatar_url: None,
        }
    }

    fn activity(reposted_by: Option<&str>) -> RawActivity {
        RawActivity {
            platform: Platform::Bluesky,
            id: "at://did:plc:ann/app.bsky.feed.post/1".to_string(),
            position_at: Utc::now(),
            post: RawPost {
                url: "https://bsky.app/profile/ann.bsky.social/post/1".to_string(),
                text: "worth a read".to_string(),
                published_at: Utc::now() - Duration::minutes(10),
                author: actor("ann.bsky.social"),
                images: vec![],
                card: Some(LinkCard {
                    url: "https://example.com/a".to_string(),
                    title: "A".to_string(),
                    description: None,
                    image_url: None,
                }),
                link_spans: vec![],
                quoted: None,
            },
            reposted_by: reposted_by.map(actor),
        }
    }

    async fn create_test_store() -> Arc<SqliteEntityStore> {
        let store = SqliteEntityStore::new(create_memory_pool().await.unwrap());
        store.create_user("user-1").await.unwrap();
        store.create_user("user-2").await.unwrap();
        Arc::new(store)
    }

    async fn visible(store: &SqliteEntityStore, user_id: &str) -> Vec<LinkPostDetail> {
        store
            .link_posts_for_user(user_id, Utc::now() - Duration::hours(24), Utc::now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_twice_is_a_no_op() {
        let store = create_test_store().await;
        let normalizer = Normalizer::new(store.clone());
        let activity = activity(None);
        let link = detect_link(&activity).unwrap();

        let first = normalizer.ingest("user-1", &activity, &link).await.unwrap();
        let second = normalizer.ingest("user-1", &activity, &link).await.unwrap();

        let created = match first {
            IngestOutcome::Created(lp) => lp,
            other => panic!("expected created, got {:?}", other),
        };
        assert_eq!(second, IngestOutcome::Attached(created.id));
        assert_eq!(visible(&store, "user-1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_second_user_attaches_to_existing_edge() {
        let store = create_test_store().await;
        let normalizer = Normalizer::new(store.clone());
        let activity = activity(None);
        let link = detect_link(&activity).unwrap();

        normalizer.ingest("user-1", &activity, &link).await.unwrap();
        let outcome = normalizer.ingest("user-2", &activity, &link).await.unwrap();

        assert!(matches!(outcome, IngestOutcome::Attached(_)));
        assert_eq!(visible(&store, "user-2").await.len(), 1);
    }

    #[tokio::test]
    async fn test_repost_is_a_separate_edge_with_repost_handle() {
        let store = create_test_store().await;
        let normalizer = Normalizer::new(store.clone());

        let original = activity(None);
        let repost = activity(Some("cat.bsky.social"));
        let link = detect_link(&original).unwrap();

        normalizer.ingest("user-1", &original, &link).await.unwrap();
        let outcome = normalizer.ingest("user-1", &repost, &link).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Created(_)));

        let edges = visible(&store, "user-1").await;
        assert_eq!(edges.len(), 2);
        assert_eq!(edges.iter().filter(|e| e.is_repost()).count(), 1);
        assert!(store.get_actor("cat.bsky.social").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_quoted_post_is_stored() {
        let store = create_test_store().await;
        let normalizer = Normalizer::new(store.clone());

        let mut activity = activity(None);
        let mut quoted = activity.post.clone();
        quoted.url = "https://bsky.app/profile/bob.bsky.social/post/9".to_string();
        quoted.author = actor("bob.bsky.social");
        activity.post.quoted = Some(Box::new(quoted));
        activity.post.card = None;

        let link = detect_link(&activity).unwrap();
        assert_eq!(link.source, LinkSource::QuotedCard);
        normalizer.ingest("user-1", &activity, &link).await.unwrap();

        let post = store.get_post(&activity.post.url).await.unwrap().unwrap();
        assert_eq!(
            post.quoting_url.as_deref(),
            Some("https://bsky.app/profile/bob.bsky.social/post/9")
        );
        let quoted = store.get_post(post.quoting_url.as_deref().unwrap()).await.unwrap().unwrap();
        assert_eq!(quoted.author_handle, "bob.bsky.social");
    }

    #[tokio::test]
    async fn test_malformed_activity_is_skipped() {
        let store = create_test_store().await;
        let normalizer = Normalizer::new(store.clone());

        let mut activity = activity(None);
        activity.post.author.handle = String::new();
        let link = detect_link(&activity).unwrap();

        let outcome = normalizer.ingest("user-1", &activity, &link).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Skipped("missing author"));
        assert!(store.get_link("https://example.com/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bare_link_without_text_is_skipped() {
        let store = create_test_store().await;
        let normalizer = Normalizer::new(store.clone());

        let mut activity = activity(None);
        activity.post.text = "  ".to_string();
        let link = detect_link(&activity).unwrap();
        activity.post.card = None;

        let outcome = normalizer.ingest("user-1", &activity, &link).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Skipped("missing text"));
        assert!(visible(&store, "user-1").await.is_empty());

        // A card alone is enough to render the post
        let mut with_card = activity.clone();
        with_card.post.card = self::activity(None).post.card;
        let outcome = normalizer.ingest("user-1", &with_card, &link).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Created(_)));
    }

    #[tokio::test]
    async fn test_racing_ingests_create_one_edge() {
        let store = create_test_store().await;
        let normalizer = Arc::new(Normalizer::new(store.clone()));
        let activity = activity(None);
        let link = detect_link(&activity).unwrap();

        let runs = (0..8).map(|i| {
            let normalizer = normalizer.clone();
            let activity = activity.clone();
            let link = link.clone();
            let user = if i % 2 == 0 { "user-1" } else { "user-2" };
            tokio::spawn(async move { normalizer.ingest(user, &activity, &link).await })
        });
        let outcomes: Vec<IngestOutcome> = futures::future::join_all(runs)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        let created = outcomes
            .iter()
            .filter(|o| matches!(o, IngestOutcome::Created(_)))
            .count();
        assert_eq!(created, 1);
        assert_eq!(visible(&store, "user-1").await.len(), 1);
        assert_eq!(visible(&store, "user-2").await.len(), 1);
    }

    /// Store whose first create loses a race against another job
    struct RacingStore {
        inner: Arc<SqliteEntityStore>,
        raced: AtomicBool,
    }

    #[async_trait]
    impl EntityStore for RacingStore {
        async fn find_link_post(&self, link_url: &str, post_url: &str, actor_handle: &str) -> LinkResult<Option<LinkPost>> {
            self.inner.find_link_post(link_url, post_url, actor_handle).await
        }
        async fn attach_user(&self, link_post_id: Uuid, user_id: &str) -> LinkResult<()> {
            self.inner.attach_user(link_post_id, user_id).await
        }
        async fn create_link_post(&self, unit: &IngestUnit, user_id: &str) -> LinkResult<LinkPost> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                self.inner.create_link_post(unit, "user-2").await?;
                return Err(LinkError::Conflict("UNIQUE constraint failed: link_post".to_string()));
            }
            self.inner.create_link_post(unit, user_id).await
        }
        async fn get_link(&self, url: &str) -> LinkResult<Option<Link>> {
            self.inner.get_link(url).await
        }
        async fn save_link_metadata(&self, link: &Link) -> LinkResult<()> {
            self.inner.save_link_metadata(link).await
        }
        async fn get_actor(&self, handle: &str) -> LinkResult<Option<Actor>> {
            self.inner.get_actor(handle).await
        }
        async fn get_post(&self, url: &str) -> LinkResult<Option<Post>> {
            self.inner.get_post(url).await
        }
        async fn accounts_for_user(&self, user_id: &str) -> LinkResult<Vec<Account>> {
            self.inner.accounts_for_user(user_id).await
        }
        async fn get_account(&self, account_id: &str) -> LinkResult<Option<Account>> {
            self.inner.get_account(account_id).await
        }
        async fn advance_cursor(&self, account_id: &str, cursor: &AccountCursor) -> LinkResult<bool> {
            self.inner.advance_cursor(account_id, cursor).await
        }
        async fn list_user_ids(&self) -> LinkResult<Vec<String>> {
            self.inner.list_user_ids().await
        }
        async fn mute_phrases(&self, user_id: &str) -> LinkResult<Vec<String>> {
            self.inner.mute_phrases(user_id).await
        }
        async fn link_posts_for_user(
            &self,
            user_id: &str,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> LinkResult<Vec<LinkPostDetail>> {
            self.inner.link_posts_for_user(user_id, since, until).await
        }
    }

    #[tokio::test]
    async fn test_conflict_resolves_to_attach() {
        let inner = create_test_store().await;
        let store = Arc::new(RacingStore {
            inner: inner.clone(),
            raced: AtomicBool::new(false),
        });
        let normalizer = Normalizer::new(store);
        let activity = activity(None);
        let link = detect_link(&activity).unwrap();

        let outcome = normalizer.ingest("user-1", &activity, &link).await.unwrap();

        assert!(matches!(outcome, IngestOutcome::Attached(_)));
        assert_eq!(visible(&inner, "user-1").await.len(), 1);
        assert_eq!(visible(&inner, "user-2").await.len(), 1);
    }
}
