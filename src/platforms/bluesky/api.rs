/// Bluesky XRPC lexicon types and client for `app.bsky.feed.getTimeline`
use crate::{
    error::LinkResult,
    models::Platform,
    platforms::http::{decode_json, transport_error},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TimelineResponse {
    #[serde(default)]
    pub cursor: Option<String>,
    pub feed: Vec<FeedViewPost>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedViewPost {
    pub post: PostView,
    #[serde(default)]
    pub reason: Option<FeedReason>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum FeedReason {
    #[serde(rename = "app.bsky.feed.defs#reasonRepost")]
    Repost(ReasonRepost),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonRepost {
    pub by: ProfileViewBasic,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileViewBasic {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileViewBasic,
    /// Raw `app.bsky.feed.post` record; parsed lazily so one odd record
    /// does not fail the whole page
    pub record: serde_json::Value,
    /// Raw embed view, parsed per item like the record
    #[serde(default)]
    pub embed: Option<serde_json::Value>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum EmbedView {
    #[serde(rename = "app.bsky.embed.external#view")]
    External { external: ExternalView },
    #[serde(rename = "app.bsky.embed.images#view")]
    Images { images: Vec<ImageView> },
    #[serde(rename = "app.bsky.embed.record#view")]
    Record { record: ViewRecordKind },
    #[serde(rename = "app.bsky.embed.recordWithMedia#view")]
    RecordWithMedia {
        record: RecordEmbed,
        media: Box<EmbedView>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalView {
    pub uri: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumb: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageView {
    pub fullsize: String,
    #[serde(default)]
    pub alt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordEmbed {
    pub record: ViewRecordKind,
}

/// The embedded record of a quote; only posts are followed
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum ViewRecordKind {
    #[serde(rename = "app.bsky.embed.record#viewRecord")]
    Post(ViewRecord),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRecord {
    pub uri: String,
    pub author: ProfileViewBasic,
    pub value: serde_json::Value,
    #[serde(default)]
    pub embeds: Vec<serde_json::Value>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub facets: Vec<Facet>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Facet {
    pub index: ByteSlice,
    #[serde(default)]
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteSlice {
    pub byte_start: usize,
    pub byte_end: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
    #[serde(other)]
    Other,
}

#[async_trait]
pub trait BlueskyApi: Send + Sync {
    /// One page of the home feed, newest first
    async fn get_timeline(&self, cursor: Option<&str>, limit: u32) -> LinkResult<TimelineResponse>;
}

/// Bearer-token XRPC client for the account's PDS or AppView
pub struct BlueskyHttpClient {
    http: reqwest::Client,
    service_url: String,
    access_token: String,
}

impl BlueskyHttpClient {
    pub fn new(http: reqwest::Client, service_url: &str, access_token: &str) -> Self {
        Self {
            http,
            service_url: service_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }
}

#[async_trait]
impl BlueskyApi for BlueskyHttpClient {
    async fn get_timeline(&self, cursor: Option<&str>, limit: u32) -> LinkResult<TimelineResponse> {
        let url = format!("{}/xrpc/app.bsky.feed.getTimeline", self.service_url);
        tracing::debug!("Bluesky GET {}", url);

        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Bluesky, e))?;

        decode_json(Platform::Bluesky, response).await
    }
}
