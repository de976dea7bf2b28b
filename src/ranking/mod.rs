/// Ranking engine
///
/// Groups a user's sharing edges by link over a time window and orders the
/// groups by distinct sharers or by recency. Read-only; never touches
/// ingestion state.
use crate::{
    error::{LinkError, LinkResult},
    models::{Link, LinkPostDetail},
    store::EntityStore,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    #[default]
    Popularity,
    Recency,
}

impl SortMode {
    pub fn parse(value: &str) -> LinkResult<Self> {
        match value.to_lowercase().as_str() {
            "popularity" | "popular" => Ok(SortMode::Popularity),
            "recency" | "newest" => Ok(SortMode::Recency),
            other => Err(LinkError::Validation(format!("Unknown sort mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankOptions {
    pub hide_reposts: bool,
    pub sort: SortMode,
    pub query: Option<String>,
    pub limit: usize,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            hide_reposts: false,
            sort: SortMode::Popularity,
            query: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// One ranked link with the edges that shared it, newest first
#[derive(Debug, Clone)]
pub struct LinkGroup {
    pub link: Link,
    pub posts: Vec<LinkPostDetail>,
    /// Distinct sharing actors
    pub sharer_count: usize,
    pub latest_post_at: DateTime<Utc>,
}

pub struct RankingEngine {
    store: Arc<dyn EntityStore>,
}

impl RankingEngine {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Rank links shared with `user_id` over the last `window`
    pub async fn rank(&self, user_id: &str, window: Duration, options: &RankOptions) -> LinkResult<Vec<LinkGroup>> {
        self.rank_at(user_id, window, options, Utc::now()).await
    }

    pub async fn rank_at(
        &self,
        user_id: &str,
        window: Duration,
        options: &RankOptions,
        now: DateTime<Utc>,
    ) -> LinkResult<Vec<LinkGroup>> {
        let edges = self.store.link_posts_for_user(user_id, now - window, now).await?;
        let mute_phrases = self.store.mute_phrases(user_id).await?;

        let total = edges.len();
        let groups = rank_edges(edges, &mute_phrases, options);
        debug!(user_id, edges = total, groups = groups.len(), "Ranked links");

        Ok(groups)
    }
}

/// Filter, group and sort edges already ordered newest post first
pub fn rank_edges(edges: Vec<LinkPostDetail>, mute_phrases: &[String], options: &RankOptions) -> Vec<LinkGroup> {
    let terms: Vec<String> = options
        .query
        .as_deref()
        .map(|q| q.split_whitespace().map(str::to_lowercase).collect())
        .unwrap_or_default();
    let mutes: Vec<String> = mute_phrases
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();

    // Group in order of first appearance so recency mode keeps query order
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<LinkPostDetail>> = HashMap::new();
    for edge in edges {
        if !terms.is_empty() && !matches_query(&edge, &terms) {
            continue;
        }
        if is_muted(&edge, &mutes) {
            continue;
        }
        if options.hide_reposts && edge.is_repost() {
            continue;
        }

        let key = edge.link.url.clone();
        if !grouped.contains_key(&key) {
            order.push(key.clone());
        }
        grouped.entry(key).or_default().push(edge);
    }

    let mut groups: Vec<LinkGroup> = order
        .into_iter()
        .filter_map(|url| grouped.remove(&url))
        .filter_map(into_group)
        .collect();

    if options.sort == SortMode::Popularity {
        groups.sort_by(|a, b| {
            b.sharer_count
                .cmp(&a.sharer_count)
                .then_with(|| b.latest_post_at.cmp(&a.latest_post_at))
                .then_with(|| a.link.url.cmp(&b.link.url))
        });
    }

    groups.truncate(options.limit);
    groups
}

fn into_group(posts: Vec<LinkPostDetail>) -> Option<LinkGroup> {
    let first = posts.first()?;
    let link = first.link.clone();
    let latest_post_at = posts.iter().map(|p| p.post.published_at).max()?;
    let sharer_count = posts
        .iter()
        .map(|p| p.actor.handle.as_str())
        .collect::<HashSet<_>>()
        .len();

    Some(LinkGroup {
        link,
        posts,
        sharer_count,
        latest_post_at,
    })
}

/// Every term must appear within one searchable field
fn matches_query(edge: &LinkPostDetail, terms: &[String]) -> bool {
    let mut fields = vec![edge.link.title.to_lowercase(), edge.post.text.to_lowercase()];
    if let Some(description) = &edge.link.description {
        fields.push(description.to_lowercase());
    }
    if let Some(quoted) = &edge.quoted {
        fields.push(quoted.text.to_lowercase());
    }

    fields
        .iter()
        .any(|field| terms.iter().all(|term| field.contains(term.as_str())))
}

fn is_muted(edge: &LinkPostDetail, mutes: &[String]) -> bool {
    if mutes.is_empty() {
        return false;
    }

    let mut haystacks: Vec<&str> = vec![
        edge.link.title.as_str(),
        edge.post.text.as_str(),
        edge.author.handle.as_str(),
        edge.actor.handle.as_str(),
    ];
    haystacks.extend(edge.link.description.as_deref());
    haystacks.extend(edge.quoted.as_ref().map(|q| q.text.as_str()));
    haystacks.extend(edge.author.name.as_deref());
    haystacks.extend(edge.actor.name.as_deref());

    let haystacks: Vec<String> = haystacks.into_iter().map(str::to_lowercase).collect();
    mutes
        .iter()
        .any(|phrase| haystacks.iter().any(|h| h.contains(phrase.as_str())))
}
