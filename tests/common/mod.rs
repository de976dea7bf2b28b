/// Shared fixtures for integration tests
use chrono::{DateTime, Duration, Utc};
use linkpulse::{
    models::{Actor, Platform},
    platforms::{LinkCard, RawActivity, RawPost},
};

pub fn actor(handle: &str) -> Actor {
    Actor {
        handle: handle.to_string(),
        name: Some(handle.split('@').next().unwrap_or(handle).to_string()),
        url: format!("https://social.example/@{}", handle),
        avatar_url: None,
    }
}

/// A Mastodon-style status by `author`, optionally carrying a link card
pub fn activity(id: &str, author: &str, card_url: Option<&str>, at: DateTime<Utc>) -> RawActivity {
    RawActivity {
        platform: Platform::Mastodon,
        id: id.to_string(),
        position_at: at,
        post: RawPost {
            url: format!("https://social.example/@{}/{}", author, id),
            text: format!("post {}", id),
            published_at: at,
            author: actor(author),
            images: vec![],
            card: card_url.map(|url| LinkCard {
                url: url.to_string(),
                title: format!("Title of {}", url),
                description: Some("A description".to_string()),
                image_url: None,
            }),
            link_spans: vec![],
            quoted: None,
        },
        reposted_by: None,
    }
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}
