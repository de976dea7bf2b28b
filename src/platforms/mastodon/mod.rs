/// Mastodon timeline adapter
///
/// Pages through the home timeline back to the stored `since_id` or the
/// lookback cutoff, then recovers reblogs the home timeline hides: Mastodon
/// drops a reblog when the account already follows the original author, so
/// for every post with reblogs we check the reblogging accounts' own recent
/// statuses, within fixed per-item limits.

pub mod api;

pub use api::{MastodonApi, MastodonHttpClient};

use crate::{
    error::{LinkError, LinkResult},
    models::{Account, AccountCursor, Actor, Platform, PostImage},
    platforms::{
        sort_newest_first, FetchOutcome, FetchSettings, LinkCard, RawActivity, RawPost,
        TimelineAdapter,
    },
};
use api::{MastodonAccount, PreviewCard, Status};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, warn};

lazy_static! {
    static ref ANCHOR_TAG: Regex = Regex::new(r#"(?i)<a\s([^>]*)>"#).unwrap();
    static ref HREF_ATTR: Regex = Regex::new(r#"(?i)href="([^"]+)""#).unwrap();
    static ref CLASS_ATTR: Regex = Regex::new(r#"(?i)class="([^"]*)""#).unwrap();
}

pub struct MastodonAdapter<A: MastodonApi> {
    api: A,
    instance_host: String,
    settings: FetchSettings,
}

impl<A: MastodonApi> MastodonAdapter<A> {
    pub fn new(api: A, instance_url: &str, settings: FetchSettings) -> LinkResult<Self> {
        let instance_host = url::Url::parse(instance_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| LinkError::Validation(format!("Invalid Mastodon instance URL: {}", instance_url)))?;

        Ok(Self {
            api,
            instance_host,
            settings,
        })
    }

    /// Page the home timeline until the cursor, the boundary or the page cap
    async fn fetch_home(&self, since_id: Option<&str>, boundary: DateTime<Utc>) -> LinkResult<Vec<Status>> {
        let limit = self.settings.mastodon_page_limit;
        let mut collected = Vec::new();
        let mut max_id: Option<String> = None;

        for _ in 0..self.settings.max_pages {
            let page = self
                .api
                .home_timeline(since_id, max_id.as_deref(), limit)
                .await?;
            let page_len = page.len();
            max_id = page.last().map(|s| s.id.clone());

            let mut ended = false;
            for status in page {
                let synced = since_id.map_or(false, |cursor| !id_is_newer(&status.id, cursor));
                if synced || status.created_at <= boundary {
                    ended = true;
                    break;
                }
                collected.push(status);
            }

            if ended || page_len < limit as usize || max_id.is_none() {
                break;
            }
        }

        Ok(collected)
    }

    /// Find the reblogs of `status` made by accounts whose reblogs the home
    /// timeline hid
    async fn recover_hidden_reblogs(
        &self,
        status: &Status,
        boundary: DateTime<Utc>,
        seen: &mut HashSet<String>,
    ) -> LinkResult<Vec<Status>> {
        let limit = self.settings.mastodon_page_limit;
        let probe_accounts = self.settings.reshare_probe_accounts;
        let rebloggers = self
            .api
            .reblogged_by(&status.id, probe_accounts.min(u32::MAX as usize) as u32)
            .await?;

        let mut recovered = Vec::new();
        for reblogger in rebloggers.iter().take(probe_accounts) {
            if reblogger.id == status.account.id {
                continue;
            }

            let mut max_id: Option<String> = None;
            for _ in 0..self.settings.reshare_probe_pages {
                let statuses = self
                    .api
                    .account_statuses(&reblogger.id, max_id.as_deref(), limit)
                    .await?;
                if statuses.is_empty() {
                    break;
                }

                let matching = statuses
                    .iter()
                    .find(|s| s.reblog.as_ref().map_or(false, |r| r.id == status.id));
                if let Some(reblog) = matching {
                    if reblog.created_at > boundary && seen.insert(reblog.id.clone()) {
                        recovered.push(reblog.clone());
                    }
                    break;
                }

                // Older than the window: the reblog would be too
                let exhausted = statuses.last().map_or(true, |s| s.created_at <= boundary);
                if exhausted {
                    break;
                }
                max_id = statuses.last().map(|s| s.id.clone());
            }
        }

        Ok(recovered)
    }

    fn qualify_handle(&self, account: &MastodonAccount) -> String {
        if account.acct.contains('@') {
            account.acct.to_lowercase()
        } else {
            format!("{}@{}", account.acct, self.instance_host).to_lowercase()
        }
    }

    fn actor_from(&self, account: &MastodonAccount) -> Actor {
        Actor {
            handle: self.qualify_handle(account),
            name: Some(account.display_name.clone()).filter(|n| !n.is_empty()),
            url: account.url.clone(),
            avatar_url: account.avatar.clone(),
        }
    }

    fn activity_from(&self, status: &Status) -> RawActivity {
        let original = status.reblog.as_deref().unwrap_or(status);

        let images = original
            .media_attachments
            .iter()
            .filter(|m| m.kind == "image")
            .map(|m| PostImage {
                url: m.url.clone(),
                alt: m.description.clone().filter(|d| !d.is_empty()),
            })
            .collect();

        RawActivity {
            platform: Platform::Mastodon,
            id: status.id.clone(),
            position_at: status.created_at,
            post: RawPost {
                url: original.url.clone().unwrap_or_else(|| original.uri.clone()),
                text: original.content.clone(),
                published_at: original.created_at,
                author: self.actor_from(&original.account),
                images,
                card: original.card.as_ref().map(card_from),
                link_spans: link_spans(&original.content),
                quoted: None,
            },
            reposted_by: status.reblog.as_ref().map(|_| self.actor_from(&status.account)),
        }
    }
}

fn card_from(card: &PreviewCard) -> LinkCard {
    LinkCard {
        url: card.url.clone(),
        title: card.title.clone(),
        description: Some(card.description.clone()).filter(|d| !d.is_empty()),
        image_url: card.image.clone(),
    }
}

/// Mastodon ids are snowflake-style integers; compare numerically
fn id_is_newer(id: &str, cursor: &str) -> bool {
    match id.len().cmp(&cursor.len()) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => id > cursor,
    }
}

/// External anchors in status HTML, skipping mentions and hashtags
fn link_spans(content: &str) -> Vec<String> {
    ANCHOR_TAG
        .captures_iter(content)
        .filter_map(|tag| {
            let attrs = tag.get(1)?.as_str();
            if let Some(class) = CLASS_ATTR.captures(attrs).and_then(|c| c.get(1)) {
                let class = class.as_str();
                if class.contains("mention") || class.contains("hashtag") {
                    return None;
                }
            }
            let href = HREF_ATTR.captures(attrs)?.get(1)?.as_str();
            Some(href.replace("&amp;", "&"))
        })
        .collect()
}

#[async_trait]
impl<A: MastodonApi> TimelineAdapter for MastodonAdapter<A> {
    fn platform(&self) -> Platform {
        Platform::Mastodon
    }

    async fn fetch_new_activity(&self, account: &Account) -> LinkResult<FetchOutcome> {
        let boundary = self.settings.boundary(&account.cursor, Utc::now());
        let since_id = account.cursor.post_id.as_deref();

        let home = self.fetch_home(since_id, boundary).await?;
        let newest = home.first().map(|s| AccountCursor {
            post_id: Some(s.id.clone()),
            position_at: Some(s.created_at),
        });

        let mut seen: HashSet<String> = home.iter().map(|s| s.id.clone()).collect();
        let mut recovered = Vec::new();
        for status in home.iter().filter(|s| s.reblog.is_none() && s.reblogs_count > 0) {
            match self.recover_hidden_reblogs(status, boundary, &mut seen).await {
                Ok(found) => recovered.extend(found),
                Err(e @ (LinkError::AuthExpired { .. } | LinkError::RateLimited { .. })) => {
                    warn!(status_id = %status.id, error = %e, "Stopping reblog recovery");
                    break;
                }
                Err(e) => {
                    warn!(status_id = %status.id, error = %e, "Reblog recovery failed for status");
                }
            }
        }

        if !recovered.is_empty() {
            debug!(count = recovered.len(), "Recovered hidden reblogs");
        }

        let mut activities: Vec<RawActivity> = home
            .iter()
            .chain(recovered.iter())
            .map(|s| self.activity_from(s))
            .collect();
        sort_newest_first(&mut activities);

        Ok(FetchOutcome { activities, newest })
    }
}
