/// SQLite implementation of the entity store using runtime queries
use crate::{
    db::{from_millis, to_millis},
    error::{LinkError, LinkResult},
    models::{
        Account, AccountCursor, Actor, Link, LinkPost, LinkPostDetail, Platform, Post, PostImage,
    },
    store::{EntityStore, IngestUnit},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

/// Entity store backed by a SQLite pool
#[derive(Clone)]
pub struct SqliteEntityStore {
    db: SqlitePool,
}

impl SqliteEntityStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Register an application user (idempotent)
    pub async fn create_user(&self, user_id: &str) -> LinkResult<()> {
        sqlx::query("INSERT INTO app_user (id, created_at) VALUES (?1, ?2) ON CONFLICT(id) DO NOTHING")
            .bind(user_id)
            .bind(to_millis(Utc::now()))
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Connect a platform account to a user
    pub async fn add_account(
        &self,
        user_id: &str,
        platform: Platform,
        instance_url: &str,
        access_token: &str,
    ) -> LinkResult<Account> {
        let account = Account {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            platform,
            instance_url: instance_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            cursor: AccountCursor::default(),
        };

        sqlx::query(
            "INSERT INTO account (id, user_id, platform, instance_url, access_token)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&account.id)
        .bind(&account.user_id)
        .bind(platform.as_str())
        .bind(&account.instance_url)
        .bind(&account.access_token)
        .execute(&self.db)
        .await?;

        Ok(account)
    }

    pub async fn add_mute_phrase(&self, user_id: &str, phrase: &str) -> LinkResult<()> {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return Err(LinkError::Validation("Mute phrase cannot be empty".to_string()));
        }

        sqlx::query(
            "INSERT INTO mute_phrase (id, user_id, phrase) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, phrase) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(phrase)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn upsert_actor(tx: &mut Transaction<'_, Sqlite>, actor: &Actor) -> LinkResult<()> {
        sqlx::query(
            "INSERT INTO actor (handle, name, url, avatar_url) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(handle) DO UPDATE SET
                name = COALESCE(excluded.name, actor.name),
                url = excluded.url,
                avatar_url = COALESCE(excluded.avatar_url, actor.avatar_url)",
        )
        .bind(&actor.handle)
        .bind(&actor.name)
        .bind(&actor.url)
        .bind(&actor.avatar_url)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_post_if_absent(tx: &mut Transaction<'_, Sqlite>, post: &Post) -> LinkResult<()> {
        let inserted = sqlx::query(
            "INSERT INTO post (url, text, platform, published_at, author_handle, repost_handle, quoting_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(url) DO NOTHING",
        )
        .bind(&post.url)
        .bind(&post.text)
        .bind(post.platform.as_str())
        .bind(to_millis(post.published_at))
        .bind(&post.author_handle)
        .bind(&post.repost_handle)
        .bind(&post.quoting_url)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Ok(());
        }

        for (position, image) in post.images.iter().enumerate() {
            sqlx::query("INSERT INTO post_image (post_url, position, url, alt) VALUES (?1, ?2, ?3, ?4)")
                .bind(&post.url)
                .bind(position as i64)
                .bind(&image.url)
                .bind(&image.alt)
                .execute(&mut **tx)
                .await?;
        }

        Ok(())
    }

    async fn upsert_link(tx: &mut Transaction<'_, Sqlite>, link: &Link) -> LinkResult<()> {
        // A populated link is never overwritten; a stub, or a link whose page had
        // no description, is filled once card data shows up
        sqlx::query(
            "INSERT INTO link (url, title, description, image_url) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                image_url = excluded.image_url
             WHERE (link.description IS NULL OR link.description = '')
               AND excluded.description IS NOT NULL",
        )
        .bind(&link.url)
        .bind(&link.title)
        .bind(&link.description)
        .bind(&link.image_url)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn images_for(&self, post_url: &str) -> LinkResult<Vec<PostImage>> {
        let rows = sqlx::query("SELECT url, alt FROM post_image WHERE post_url = ?1 ORDER BY position")
            .bind(post_url)
            .fetch_all(&self.db)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(PostImage {
                    url: row.try_get("url")?,
                    alt: row.try_get("alt")?,
                })
            })
            .collect()
    }
}

fn parse_platform(value: &str) -> LinkResult<Platform> {
    Platform::parse(value).ok_or_else(|| LinkError::Internal(format!("Unknown platform '{}'", value)))
}

fn link_post_from_row(row: &SqliteRow) -> LinkResult<LinkPost> {
    let id: String = row.try_get("id")?;
    Ok(LinkPost {
        id: Uuid::parse_str(&id).map_err(|e| LinkError::Internal(format!("Invalid link_post id: {}", e)))?,
        link_url: row.try_get("link_url")?,
        post_url: row.try_get("post_url")?,
        actor_handle: row.try_get("actor_handle")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

fn post_from_row(row: &SqliteRow, prefix: &str) -> LinkResult<Post> {
    let column = |name: &str| format!("{}{}", prefix, name);
    let platform: String = row.try_get(column("platform").as_str())?;
    Ok(Post {
        url: row.try_get(column("url").as_str())?,
        text: row.try_get(column("text").as_str())?,
        platform: parse_platform(&platform)?,
        published_at: from_millis(row.try_get(column("published_at").as_str())?),
        author_handle: row.try_get(column("author_handle").as_str())?,
        repost_handle: row.try_get(column("repost_handle").as_str())?,
        quoting_url: row.try_get(column("quoting_url").as_str())?,
        images: Vec::new(),
    })
}

fn actor_from_row(row: &SqliteRow, prefix: &str) -> LinkResult<Actor> {
    let column = |name: &str| format!("{}{}", prefix, name);
    Ok(Actor {
        handle: row.try_get(column("handle").as_str())?,
        name: row.try_get(column("name").as_str())?,
        url: row.try_get(column("url").as_str())?,
        avatar_url: row.try_get(column("avatar_url").as_str())?,
    })
}

fn link_from_row(row: &SqliteRow, prefix: &str) -> LinkResult<Link> {
    let column = |name: &str| format!("{}{}", prefix, name);
    Ok(Link {
        url: row.try_get(column("url").as_str())?,
        title: row.try_get(column("title").as_str())?,
        description: row.try_get(column("description").as_str())?,
        image_url: row.try_get(column("image_url").as_str())?,
    })
}

fn account_from_row(row: &SqliteRow) -> LinkResult<Account> {
    let platform: String = row.try_get("platform")?;
    let cursor_at: Option<i64> = row.try_get("cursor_at")?;
    Ok(Account {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        platform: parse_platform(&platform)?,
        instance_url: row.try_get("instance_url")?,
        access_token: row.try_get("access_token")?,
        cursor: AccountCursor {
            post_id: row.try_get("cursor_post_id")?,
            position_at: cursor_at.map(from_millis),
        },
    })
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn find_link_post(
        &self,
        link_url: &str,
        post_url: &str,
        actor_handle: &str,
    ) -> LinkResult<Option<LinkPost>> {
        let row = sqlx::query(
            "SELECT id, link_url, post_url, actor_handle, created_at
             FROM link_post
             WHERE link_url = ?1 AND post_url = ?2 AND actor_handle = ?3",
        )
        .bind(link_url)
        .bind(post_url)
        .bind(actor_handle)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(link_post_from_row).transpose()
    }

    async fn attach_user(&self, link_post_id: Uuid, user_id: &str) -> LinkResult<()> {
        sqlx::query(
            "INSERT INTO link_post_user (link_post_id, user_id) VALUES (?1, ?2)
             ON CONFLICT(link_post_id, user_id) DO NOTHING",
        )
        .bind(link_post_id.to_string())
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn create_link_post(&self, unit: &IngestUnit, user_id: &str) -> LinkResult<LinkPost> {
        let mut tx = self.db.begin().await?;

        // First statement is a write so the transaction takes the write lock up front
        for actor in &unit.actors {
            Self::upsert_actor(&mut tx, actor).await?;
        }

        if let Some(quoted) = &unit.quoted {
            Self::insert_post_if_absent(&mut tx, quoted).await?;
        }
        Self::insert_post_if_absent(&mut tx, &unit.post).await?;
        Self::upsert_link(&mut tx, &unit.link).await?;

        let link_post = LinkPost {
            id: Uuid::now_v7(),
            link_url: unit.link.url.clone(),
            post_url: unit.post.url.clone(),
            actor_handle: unit.actor_handle.clone(),
            created_at: Utc::now(),
        };

        // Plain insert: a concurrent duplicate surfaces as LinkError::Conflict
        sqlx::query(
            "INSERT INTO link_post (id, link_url, post_url, actor_handle, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(link_post.id.to_string())
        .bind(&link_post.link_url)
        .bind(&link_post.post_url)
        .bind(&link_post.actor_handle)
        .bind(to_millis(link_post.created_at))
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO link_post_user (link_post_id, user_id) VALUES (?1, ?2)")
            .bind(link_post.id.to_string())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(link_post)
    }

    async fn get_link(&self, url: &str) -> LinkResult<Option<Link>> {
        let row = sqlx::query("SELECT url, title, description, image_url FROM link WHERE url = ?1")
            .bind(url)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(|row| link_from_row(row, "")).transpose()
    }

    async fn save_link_metadata(&self, link: &Link) -> LinkResult<()> {
        // Only stubs take fetched metadata; card data that landed meanwhile wins
        sqlx::query(
            "INSERT INTO link (url, title, description, image_url) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                image_url = excluded.image_url
             WHERE link.description IS NULL",
        )
        .bind(&link.url)
        .bind(&link.title)
        .bind(&link.description)
        .bind(&link.image_url)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get_actor(&self, handle: &str) -> LinkResult<Option<Actor>> {
        let row = sqlx::query("SELECT handle, name, url, avatar_url FROM actor WHERE handle = ?1")
            .bind(handle)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(|row| actor_from_row(row, "")).transpose()
    }

    async fn get_post(&self, url: &str) -> LinkResult<Option<Post>> {
        let row = sqlx::query(
            "SELECT url, text, platform, published_at, author_handle, repost_handle, quoting_url
             FROM post WHERE url = ?1",
        )
        .bind(url)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                let mut post = post_from_row(&row, "")?;
                post.images = self.images_for(&post.url).await?;
                Ok(Some(post))
            }
            None => Ok(None),
        }
    }

    async fn accounts_for_user(&self, user_id: &str) -> LinkResult<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT id, user_id, platform, instance_url, access_token, cursor_post_id, cursor_at
             FROM account WHERE user_id = ?1 ORDER BY platform",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(account_from_row).collect()
    }

    async fn get_account(&self, account_id: &str) -> LinkResult<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, user_id, platform, instance_url, access_token, cursor_post_id, cursor_at
             FROM account WHERE id = ?1",
        )
        .bind(account_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn advance_cursor(&self, account_id: &str, cursor: &AccountCursor) -> LinkResult<bool> {
        let position_at = cursor.position_at.ok_or_else(|| {
            LinkError::Validation("Cursor position must carry a timestamp".to_string())
        })?;

        let updated = sqlx::query(
            "UPDATE account SET cursor_post_id = ?2, cursor_at = ?3
             WHERE id = ?1 AND (cursor_at IS NULL OR cursor_at <= ?3)",
        )
        .bind(account_id)
        .bind(&cursor.post_id)
        .bind(to_millis(position_at))
        .execute(&self.db)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }

    async fn list_user_ids(&self) -> LinkResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM app_user ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.db)
            .await?;
        Ok(ids)
    }

    async fn mute_phrases(&self, user_id: &str) -> LinkResult<Vec<String>> {
        let phrases: Vec<String> = sqlx::query_scalar("SELECT phrase FROM mute_phrase WHERE user_id = ?1 ORDER BY phrase")
            .bind(user_id)
            .fetch_all(&self.db)
            .await?;
        Ok(phrases)
    }

    async fn link_posts_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> LinkResult<Vec<LinkPostDetail>> {
        let rows = sqlx::query(
            r#"
            SELECT lp.id AS id,
                   l.url AS l_url, l.title AS l_title, l.description AS l_description, l.image_url AS l_image_url,
                   p.url AS p_url, p.text AS p_text, p.platform AS p_platform, p.published_at AS p_published_at,
                   p.author_handle AS p_author_handle, p.repost_handle AS p_repost_handle, p.quoting_url AS p_quoting_url,
                   au.handle AS au_handle, au.name AS au_name, au.url AS au_url, au.avatar_url AS au_avatar_url,
                   ac.handle AS ac_handle, ac.name AS ac_name, ac.url AS ac_url, ac.avatar_url AS ac_avatar_url,
                   q.url AS q_url, q.text AS q_text, q.platform AS q_platform, q.published_at AS q_published_at,
                   q.author_handle AS q_author_handle, q.repost_handle AS q_repost_handle, q.quoting_url AS q_quoting_url
            FROM link_post lp
            JOIN link_post_user lpu ON lpu.link_post_id = lp.id
            JOIN link l ON l.url = lp.link_url
            JOIN post p ON p.url = lp.post_url
            JOIN actor au ON au.handle = p.author_handle
            JOIN actor ac ON ac.handle = lp.actor_handle
            LEFT JOIN post q ON q.url = p.quoting_url
            WHERE lpu.user_id = ?1 AND p.published_at >= ?2 AND p.published_at <= ?3
            ORDER BY p.published_at DESC, lp.id DESC
            "#,
        )
        .bind(user_id)
        .bind(to_millis(since))
        .bind(to_millis(until))
        .fetch_all(&self.db)
        .await?;

        let mut images: HashMap<String, Vec<PostImage>> = HashMap::new();
        let mut details = Vec::with_capacity(rows.len());

        for row in &rows {
            let id: String = row.try_get("id")?;
            let mut post = post_from_row(row, "p_")?;
            let quoted_url: Option<String> = row.try_get("q_url")?;
            let mut quoted = match quoted_url {
                Some(_) => Some(post_from_row(row, "q_")?),
                None => None,
            };

            for target in std::iter::once(&mut post).chain(quoted.iter_mut()) {
                if !images.contains_key(&target.url) {
                    let found = self.images_for(&target.url).await?;
                    images.insert(target.url.clone(), found);
                }
                target.images = images.get(&target.url).cloned().unwrap_or_default();
            }

            details.push(LinkPostDetail {
                id: Uuid::parse_str(&id)
                    .map_err(|e| LinkError::Internal(format!("Invalid link_post id: {}", e)))?,
                link: link_from_row(row, "l_")?,
                post,
                author: actor_from_row(row, "au_")?,
                actor: actor_from_row(row, "ac_")?,
                quoted,
            });
        }

        Ok(details)
    }
}
