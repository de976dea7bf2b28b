/// Canonical entities shared by ingestion, ranking and job processing
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Source platform of a post or account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Mastodon-style REST timeline
    Mastodon,
    /// Bluesky-style XRPC feed
    Bluesky,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Mastodon => "mastodon",
            Platform::Bluesky => "bluesky",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mastodon" => Some(Platform::Mastodon),
            "bluesky" => Some(Platform::Bluesky),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A person or account seen on a platform
///
/// The handle is platform-qualified and never changes once stored; the
/// remaining attributes are refreshed on every sighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub handle: String,
    pub name: Option<String>,
    pub url: String,
    pub avatar_url: Option<String>,
}

/// Image attached to a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostImage {
    pub url: String,
    pub alt: Option<String>,
}

/// A post, keyed by its canonical URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub url: String,
    pub text: String,
    pub platform: Platform,
    pub published_at: DateTime<Utc>,
    pub author_handle: String,
    /// Handle of the account whose repost first surfaced this post
    pub repost_handle: Option<String>,
    /// URL of the embedded post, if this post quotes one
    pub quoting_url: Option<String>,
    pub images: Vec<PostImage>,
}

/// Embedded post reference. Stored in the post table so an independent
/// sighting of the same URL promotes it without a second row.
pub type QuotedPost = Post;

/// External link, keyed by URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    pub title: String,
    /// `None` until metadata is known; empty when the fetched page had none
    pub description: Option<String>,
    pub image_url: Option<String>,
}

impl Link {
    /// A stub link was recorded before any metadata was known
    pub fn is_stub(&self) -> bool {
        self.description.is_none()
    }
}

/// Sharing edge between a link, a post and the actor who shared it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkPost {
    pub id: Uuid,
    pub link_url: String,
    pub post_url: String,
    pub actor_handle: String,
    pub created_at: DateTime<Utc>,
}

/// A sharing edge with everything ranking needs joined in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkPostDetail {
    pub id: Uuid,
    pub link: Link,
    pub post: Post,
    pub author: Actor,
    /// Actor whose timeline activity produced the edge (author or reposter)
    pub actor: Actor,
    pub quoted: Option<QuotedPost>,
}

impl LinkPostDetail {
    /// The edge came from someone resharing another author's post
    pub fn is_repost(&self) -> bool {
        self.actor.handle != self.post.author_handle
    }
}

/// Sync job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Per-user sync job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    pub user_id: String,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retries: i64,
    pub error: Option<String>,
}

/// Last synced position of an account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountCursor {
    /// Platform-native id of the newest synced item
    pub post_id: Option<String>,
    /// Recency of the newest synced item
    pub position_at: Option<DateTime<Utc>>,
}

impl AccountCursor {
    pub fn is_empty(&self) -> bool {
        self.post_id.is_none() && self.position_at.is_none()
    }
}

/// A platform account connected by an application user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    /// Mastodon instance URL or Bluesky service URL
    pub instance_url: String,
    pub access_token: String,
    pub cursor: AccountCursor,
}
