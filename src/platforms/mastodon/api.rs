/// Mastodon REST API surface used by the adapter
use crate::{
    error::LinkResult,
    models::Platform,
    platforms::http::{decode_json, transport_error},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MastodonAccount {
    pub id: String,
    pub username: String,
    /// `user` for local accounts, `user@domain` for remote ones
    pub acct: String,
    #[serde(default)]
    pub display_name: String,
    pub url: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PreviewCard {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MediaAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Status {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub uri: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: String,
    pub account: MastodonAccount,
    #[serde(default)]
    pub reblog: Option<Box<Status>>,
    #[serde(default)]
    pub card: Option<PreviewCard>,
    #[serde(default)]
    pub reblogs_count: u64,
    #[serde(default)]
    pub media_attachments: Vec<MediaAttachment>,
}

#[async_trait]
pub trait MastodonApi: Send + Sync {
    /// `GET /api/v1/timelines/home`, newest first
    async fn home_timeline(
        &self,
        since_id: Option<&str>,
        max_id: Option<&str>,
        limit: u32,
    ) -> LinkResult<Vec<Status>>;

    /// `GET /api/v1/statuses/:id/reblogged_by`
    async fn reblogged_by(&self, status_id: &str, limit: u32) -> LinkResult<Vec<MastodonAccount>>;

    /// `GET /api/v1/accounts/:id/statuses`, newest first
    async fn account_statuses(
        &self,
        account_id: &str,
        max_id: Option<&str>,
        limit: u32,
    ) -> LinkResult<Vec<Status>>;
}

/// Bearer-token client for one Mastodon instance
pub struct MastodonHttpClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl MastodonHttpClient {
    pub fn new(http: reqwest::Client, base_url: &str, access_token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> LinkResult<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("Mastodon GET {}", url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Mastodon, e))?;

        decode_json(Platform::Mastodon, response).await
    }
}

fn page_query(since_id: Option<&str>, max_id: Option<&str>, limit: u32) -> Vec<(&'static str, String)> {
    let mut query = vec![("limit", limit.to_string())];
    if let Some(since_id) = since_id {
        query.push(("since_id", since_id.to_string()));
    }
    if let Some(max_id) = max_id {
        query.push(("max_id", max_id.to_string()));
    }
    query
}

#[async_trait]
impl MastodonApi for MastodonHttpClient {
    async fn home_timeline(
        &self,
        since_id: Option<&str>,
        max_id: Option<&str>,
        limit: u32,
    ) -> LinkResult<Vec<Status>> {
        self.get("/api/v1/timelines/home", &page_query(since_id, max_id, limit))
            .await
    }

    async fn reblogged_by(&self, status_id: &str, limit: u32) -> LinkResult<Vec<MastodonAccount>> {
        let path = format!("/api/v1/statuses/{}/reblogged_by", status_id);
        self.get(&path, &[("limit", limit.to_string())]).await
    }

    async fn account_statuses(
        &self,
        account_id: &str,
        max_id: Option<&str>,
        limit: u32,
    ) -> LinkResult<Vec<Status>> {
        let path = format!("/api/v1/accounts/{}/statuses", account_id);
        self.get(&path, &page_query(None, max_id, limit)).await
    }
}
