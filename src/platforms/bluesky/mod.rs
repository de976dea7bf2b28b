/// Bluesky timeline adapter
///
/// The home feed is paged with an opaque cursor. Links come from
/// `external` embeds, quoted records and `#link` rich-text facets.

pub mod api;

pub use api::{BlueskyApi, BlueskyHttpClient};

use crate::{
    error::LinkResult,
    models::{Account, AccountCursor, Actor, Platform, PostImage},
    platforms::{
        sort_newest_first, FetchOutcome, FetchSettings, LinkCard, RawActivity, RawPost,
        TimelineAdapter,
    },
};
use api::{EmbedView, FeedReason, FeedViewPost, PostRecord, ProfileViewBasic, ViewRecord, ViewRecordKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

const APP_URL: &str = "https://bsky.app";

pub struct BlueskyAdapter<A: BlueskyApi> {
    api: A,
    settings: FetchSettings,
}

impl<A: BlueskyApi> BlueskyAdapter<A> {
    pub fn new(api: A, settings: FetchSettings) -> Self {
        Self { api, settings }
    }
}

/// Timeline position of a feed item: the repost time for reposts
fn position_of(item: &FeedViewPost) -> DateTime<Utc> {
    match &item.reason {
        Some(FeedReason::Repost(repost)) => repost.indexed_at,
        _ => item.post.indexed_at,
    }
}

fn actor_from(profile: &ProfileViewBasic) -> Actor {
    Actor {
        handle: profile.handle.to_lowercase(),
        name: profile.display_name.clone().filter(|n| !n.is_empty()),
        url: format!("{}/profile/{}", APP_URL, profile.handle),
        avatar_url: profile.avatar.clone(),
    }
}

/// `at://did/app.bsky.feed.post/rkey` to its public web URL
fn post_url(uri: &str, handle: &str) -> String {
    let rkey = uri.rsplit('/').next().unwrap_or(uri);
    format!("{}/profile/{}/post/{}", APP_URL, handle, rkey)
}

/// Link facet URIs in byte order
fn facet_links(record: &PostRecord) -> Vec<String> {
    let mut facets: Vec<_> = record.facets.iter().collect();
    facets.sort_by_key(|f| f.index.byte_start);
    facets
        .into_iter()
        .flat_map(|f| f.features.iter())
        .filter_map(|feature| match feature {
            api::FacetFeature::Link { uri } => Some(uri.clone()),
            api::FacetFeature::Other => None,
        })
        .collect()
}

#[derive(Default)]
struct EmbedParts<'a> {
    card: Option<LinkCard>,
    images: Vec<PostImage>,
    quoted: Option<&'a ViewRecord>,
}

fn collect_embed<'a>(embed: &'a EmbedView, parts: &mut EmbedParts<'a>) {
    match embed {
        EmbedView::External { external } => {
            parts.card = Some(LinkCard {
                url: external.uri.clone(),
                title: external.title.clone(),
                description: Some(external.description.clone()).filter(|d| !d.is_empty()),
                image_url: external.thumb.clone(),
            });
        }
        EmbedView::Images { images } => {
            parts.images.extend(images.iter().map(|image| PostImage {
                url: image.fullsize.clone(),
                alt: Some(image.alt.clone()).filter(|a| !a.is_empty()),
            }));
        }
        EmbedView::Record { record } => {
            if let ViewRecordKind::Post(view) = record {
                parts.quoted = Some(view);
            }
        }
        EmbedView::RecordWithMedia { record, media } => {
            if let ViewRecordKind::Post(view) = &record.record {
                parts.quoted = Some(view);
            }
            collect_embed(media, parts);
        }
        EmbedView::Other => {}
    }
}

/// Decode a raw embed view; an unsupported or broken embed is ignored
fn parse_embed(uri: &str, value: &serde_json::Value) -> Option<EmbedView> {
    match serde_json::from_value(value.clone()) {
        Ok(embed) => Some(embed),
        Err(e) => {
            debug!(uri, error = %e, "Ignoring unparseable embed");
            None
        }
    }
}

fn quoted_post(view: &ViewRecord) -> Option<RawPost> {
    let record: PostRecord = serde_json::from_value(view.value.clone()).ok()?;

    let embeds: Vec<EmbedView> = view
        .embeds
        .iter()
        .filter_map(|value| parse_embed(&view.uri, value))
        .collect();
    let mut parts = EmbedParts::default();
    for embed in &embeds {
        collect_embed(embed, &mut parts);
    }

    Some(RawPost {
        url: post_url(&view.uri, &view.author.handle),
        link_spans: facet_links(&record),
        text: record.text,
        published_at: view.indexed_at,
        author: actor_from(&view.author),
        images: parts.images,
        card: parts.card,
        quoted: None,
    })
}

/// Convert one feed item; `None` when the post record does not parse
fn activity_from(item: &FeedViewPost) -> Option<RawActivity> {
    let post = &item.post;
    let record: PostRecord = match serde_json::from_value(post.record.clone()) {
        Ok(record) => record,
        Err(e) => {
            debug!(uri = %post.uri, error = %e, "Skipping unparseable post record");
            return None;
        }
    };

    let embed = post.embed.as_ref().and_then(|value| parse_embed(&post.uri, value));
    let mut parts = EmbedParts::default();
    if let Some(embed) = &embed {
        collect_embed(embed, &mut parts);
    }

    let reposted_by = match &item.reason {
        Some(FeedReason::Repost(repost)) => Some(actor_from(&repost.by)),
        _ => None,
    };

    Some(RawActivity {
        platform: Platform::Bluesky,
        id: post.uri.clone(),
        position_at: position_of(item),
        post: RawPost {
            url: post_url(&post.uri, &post.author.handle),
            link_spans: facet_links(&record),
            text: record.text,
            published_at: post.indexed_at,
            author: actor_from(&post.author),
            images: parts.images,
            card: parts.card,
            quoted: parts.quoted.and_then(quoted_post).map(Box::new),
        },
        reposted_by,
    })
}

#[async_trait]
impl<A: BlueskyApi> TimelineAdapter for BlueskyAdapter<A> {
    fn platform(&self) -> Platform {
        Platform::Bluesky
    }

    async fn fetch_new_activity(&self, account: &Account) -> LinkResult<FetchOutcome> {
        let boundary = self.settings.boundary(&account.cursor, Utc::now());
        let mut items: Vec<FeedViewPost> = Vec::new();
        let mut page_cursor: Option<String> = None;

        for _ in 0..self.settings.max_pages {
            let page = self
                .api
                .get_timeline(page_cursor.as_deref(), self.settings.bluesky_page_limit)
                .await?;

            let page_len = page.feed.len();
            let mut reached_boundary = false;
            for item in page.feed {
                if position_of(&item) > boundary {
                    items.push(item);
                } else {
                    reached_boundary = true;
                }
            }

            page_cursor = page.cursor;
            if reached_boundary || page_len == 0 || page_cursor.is_none() {
                break;
            }
        }

        let mut activities: Vec<RawActivity> = items.iter().filter_map(activity_from).collect();
        sort_newest_first(&mut activities);

        let newest = activities.first().map(|a| AccountCursor {
            post_id: Some(a.id.clone()),
            position_at: Some(a.position_at),
        });

        Ok(FetchOutcome { activities, newest })
    }
}
