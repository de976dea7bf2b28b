/// Platform timeline adapters
///
/// Each platform implementation fetches the activity an account has not
/// seen yet and normalizes it into [`RawActivity`], so everything after the
/// fetch (link detection, ingestion) is platform-agnostic.

pub mod bluesky;
pub mod http;
pub mod mastodon;

use crate::{
    error::{LinkError, LinkResult},
    metrics,
    models::{Account, AccountCursor, Actor, Platform, PostImage},
    store::EntityStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Preview card attached to a post by the platform
#[derive(Debug, Clone, PartialEq)]
pub struct LinkCard {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// A post as seen on the wire, before it becomes a [`crate::models::Post`]
#[derive(Debug, Clone, PartialEq)]
pub struct RawPost {
    pub url: String,
    /// Body as delivered by the platform (HTML on Mastodon, plain text on Bluesky)
    pub text: String,
    pub published_at: DateTime<Utc>,
    pub author: Actor,
    pub images: Vec<PostImage>,
    pub card: Option<LinkCard>,
    /// URL-typed rich-text spans in text order
    pub link_spans: Vec<String>,
    pub quoted: Option<Box<RawPost>>,
}

/// One timeline item: a post, possibly surfaced by someone else's repost
#[derive(Debug, Clone, PartialEq)]
pub struct RawActivity {
    pub platform: Platform,
    /// Platform-native id of the timeline item
    pub id: String,
    /// When the item entered the timeline (repost time for reposts)
    pub position_at: DateTime<Utc>,
    pub post: RawPost,
    pub reposted_by: Option<Actor>,
}

impl RawActivity {
    /// The actor whose activity put the post in the timeline
    pub fn sharing_actor(&self) -> &Actor {
        self.reposted_by.as_ref().unwrap_or(&self.post.author)
    }
}

/// Result of one fetch: new items newest first, plus the position to store
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub activities: Vec<RawActivity>,
    pub newest: Option<AccountCursor>,
}

/// Pagination and probing limits shared by the adapters
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub lookback: Duration,
    pub max_pages: usize,
    pub mastodon_page_limit: u32,
    pub bluesky_page_limit: u32,
    pub reshare_probe_accounts: usize,
    pub reshare_probe_pages: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            lookback: Duration::hours(24),
            max_pages: 20,
            mastodon_page_limit: 40,
            bluesky_page_limit: 100,
            reshare_probe_accounts: 20,
            reshare_probe_pages: 1,
        }
    }
}

impl FetchSettings {
    /// Items at or before this instant are already synced or outside the lookback
    pub fn boundary(&self, cursor: &AccountCursor, now: DateTime<Utc>) -> DateTime<Utc> {
        let cutoff = now - self.lookback;
        match cursor.position_at {
            Some(position) if position > cutoff => position,
            _ => cutoff,
        }
    }
}

#[async_trait]
pub trait TimelineAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Fetch activity newer than the account cursor, newest first.
    /// Does not retry; failures are returned as typed errors.
    async fn fetch_new_activity(&self, account: &Account) -> LinkResult<FetchOutcome>;
}

/// Builds the adapter for a connected account
pub trait AdapterFactory: Send + Sync {
    fn adapter_for(&self, account: &Account) -> LinkResult<Arc<dyn TimelineAdapter>>;
}

/// HTTP-backed adapters for both platforms
pub struct HttpAdapterFactory {
    http: reqwest::Client,
    settings: FetchSettings,
}

impl HttpAdapterFactory {
    pub fn new(user_agent: &str, request_timeout: std::time::Duration, settings: FetchSettings) -> LinkResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(request_timeout)
            .build()
            .map_err(|e| LinkError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, settings })
    }
}

impl AdapterFactory for HttpAdapterFactory {
    fn adapter_for(&self, account: &Account) -> LinkResult<Arc<dyn TimelineAdapter>> {
        let adapter: Arc<dyn TimelineAdapter> = match account.platform {
            Platform::Mastodon => {
                let api = mastodon::MastodonHttpClient::new(
                    self.http.clone(),
                    &account.instance_url,
                    &account.access_token,
                );
                Arc::new(mastodon::MastodonAdapter::new(
                    api,
                    &account.instance_url,
                    self.settings.clone(),
                )?)
            }
            Platform::Bluesky => {
                let api = bluesky::BlueskyHttpClient::new(
                    self.http.clone(),
                    &account.instance_url,
                    &account.access_token,
                );
                Arc::new(bluesky::BlueskyAdapter::new(api, self.settings.clone()))
            }
        };
        Ok(adapter)
    }
}

/// Fetch an account's new activity and move its cursor forward.
///
/// The cursor only moves when the fetch yielded at least one item, and the
/// store refuses to move it backwards.
pub async fn fetch_and_advance(
    adapter: &dyn TimelineAdapter,
    store: &dyn EntityStore,
    account: &Account,
) -> LinkResult<Vec<RawActivity>> {
    let platform = adapter.platform();
    let outcome = match adapter.fetch_new_activity(account).await {
        Ok(outcome) => outcome,
        Err(e) => {
            metrics::record_platform_fetch(platform.as_str(), "error", 0);
            return Err(e);
        }
    };

    metrics::record_platform_fetch(platform.as_str(), "success", outcome.activities.len());

    if outcome.activities.is_empty() {
        debug!(account_id = %account.id, %platform, "No new activity");
        return Ok(outcome.activities);
    }

    if let Some(newest) = &outcome.newest {
        let moved = store.advance_cursor(&account.id, newest).await?;
        if !moved {
            debug!(account_id = %account.id, %platform, "Stored cursor is newer, not moving it");
        }
    }

    info!(
        account_id = %account.id,
        %platform,
        count = outcome.activities.len(),
        "Fetched new activity"
    );

    Ok(outcome.activities)
}

/// Stable newest-first ordering used when merging pages and recovered items
pub(crate) fn sort_newest_first(activities: &mut [RawActivity]) {
    activities.sort_by(|a, b| b.position_at.cmp(&a.position_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_boundary_prefers_newer_cursor() {
        let settings = FetchSettings::default();
        let now = Utc.with_ymd_and_hms(2024, 6, 2, 12, 0, 0).unwrap();

        let empty = AccountCursor::default();
        assert_eq!(settings.boundary(&empty, now), now - Duration::hours(24));

        let recent = AccountCursor {
            post_id: Some("1".to_string()),
            position_at: Some(now - Duration::hours(2)),
        };
        assert_eq!(settings.boundary(&recent, now), now - Duration::hours(2));

        let stale = AccountCursor {
            post_id: Some("1".to_string()),
            position_at: Some(now - Duration::days(3)),
        };
        assert_eq!(settings.boundary(&stale, now), now - Duration::hours(24));
    }

    #[test]
    fn test_sharing_actor_is_reposter_when_present() {
        let author = Actor {
            handle: "author.bsky.social".to_string(),
            name: None,
            url: "https://bsky.app/profile/author.bsky.social".to_string(),
            avatar_url: None,
        };
        let reposter = Actor {
            handle: "friend.bsky.social".to_string(),
            ..author.clone()
        };
        let mut activity = RawActivity {
            platform: Platform::Bluesky,
            id: "at://did:plc:a/app.bsky.feed.post/1".to_string(),
            position_at: Utc::now(),
            post: RawPost {
                url: "https://bsky.app/profile/author.bsky.social/post/1".to_string(),
                text: String::new(),
                published_at: Utc::now(),
                author,
                images: vec![],
                card: None,
                link_spans: vec![],
                quoted: None,
            },
            reposted_by: None,
        };
        assert_eq!(activity.sharing_actor().handle, "author.bsky.social");

        activity.reposted_by = Some(reposter);
        assert_eq!(activity.sharing_actor().handle, "friend.bsky.social");
    }
}
