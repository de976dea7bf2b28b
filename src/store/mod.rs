/// Entity store
///
/// The narrow read/write contract the pipeline and the ranking engine use
/// against persisted entities. Every write that can race with another job
/// goes through [`EntityStore::create_link_post`], which reports a duplicate
/// edge as [`LinkError::Conflict`](crate::error::LinkError::Conflict) so
/// callers can fall back to attaching.

pub mod sqlite;

pub use sqlite::SqliteEntityStore;

use crate::{
    error::LinkResult,
    models::{Account, AccountCursor, Actor, Link, LinkPost, LinkPostDetail, Post, QuotedPost},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Everything created for a previously unseen sharing edge
#[derive(Debug, Clone)]
pub struct IngestUnit {
    /// Author, reposter and quoted author, deduplicated by handle
    pub actors: Vec<Actor>,
    pub quoted: Option<QuotedPost>,
    pub post: Post,
    pub link: Link,
    /// Handle of the actor whose activity shared the link
    pub actor_handle: String,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Look up an edge by its uniqueness key
    async fn find_link_post(
        &self,
        link_url: &str,
        post_url: &str,
        actor_handle: &str,
    ) -> LinkResult<Option<LinkPost>>;

    /// Attach a user to an existing edge (no-op if already attached)
    async fn attach_user(&self, link_post_id: Uuid, user_id: &str) -> LinkResult<()>;

    /// Create-or-fetch actors, posts and link, then create the edge and
    /// attach the user, all in one transaction
    async fn create_link_post(&self, unit: &IngestUnit, user_id: &str) -> LinkResult<LinkPost>;

    async fn get_link(&self, url: &str) -> LinkResult<Option<Link>>;

    /// Store fetched metadata for a link, creating it if needed
    async fn save_link_metadata(&self, link: &Link) -> LinkResult<()>;

    async fn get_actor(&self, handle: &str) -> LinkResult<Option<Actor>>;

    async fn get_post(&self, url: &str) -> LinkResult<Option<Post>>;

    async fn accounts_for_user(&self, user_id: &str) -> LinkResult<Vec<Account>>;

    async fn get_account(&self, account_id: &str) -> LinkResult<Option<Account>>;

    /// Move an account cursor forward; returns false when the stored cursor is newer
    async fn advance_cursor(&self, account_id: &str, cursor: &AccountCursor) -> LinkResult<bool>;

    /// All known users, oldest first
    async fn list_user_ids(&self) -> LinkResult<Vec<String>>;

    async fn mute_phrases(&self, user_id: &str) -> LinkResult<Vec<String>>;

    /// Edges visible to a user whose post falls in `[since, until]`, newest post first
    async fn link_posts_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> LinkResult<Vec<LinkPostDetail>>;
}
