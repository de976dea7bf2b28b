/// Pick the one shareable link carried by an activity
///
/// Priority: the post's own card, then the quoted post's card, then the
/// quoted post's first link span, then the post's own first link span.
/// Only the first match is kept; a post with several links tracks one.
use crate::{
    models::Link,
    platforms::{LinkCard, RawActivity, RawPost},
};
use lazy_static::lazy_static;
use regex::Regex;

/// Card URL some instances emit for YouTube embeds
pub const YOUTUBE_PLACEHOLDER: &str = "https://www.youtube.com/undefined";

lazy_static! {
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]+>").unwrap();
    static ref YOUTUBE_URL: Regex =
        Regex::new(r"https://(?:www\.youtube\.com/watch\?v=|youtu\.be/)[\w-]+(?:[?&][\w\-=&]+)?").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSource {
    Card,
    QuotedCard,
    QuotedSpan,
    Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedLink {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub source: LinkSource,
}

impl DetectedLink {
    fn from_card(card: LinkCard, source: LinkSource) -> Self {
        Self {
            url: card.url,
            title: card.title,
            description: card.description,
            image_url: card.image_url,
            source,
        }
    }

    fn from_span(url: String, source: LinkSource) -> Self {
        Self {
            url,
            title: String::new(),
            description: None,
            image_url: None,
            source,
        }
    }

    /// Link row as known from the timeline; a span-only link is a stub
    pub fn to_link(&self) -> Link {
        Link {
            url: self.url.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            image_url: self.image_url.clone(),
        }
    }
}

pub fn detect_link(activity: &RawActivity) -> Option<DetectedLink> {
    let post = &activity.post;

    if let Some(card) = usable_card(post) {
        return Some(DetectedLink::from_card(card, LinkSource::Card));
    }

    if let Some(quoted) = post.quoted.as_deref() {
        if let Some(card) = usable_card(quoted) {
            return Some(DetectedLink::from_card(card, LinkSource::QuotedCard));
        }
        if let Some(url) = first_span(quoted) {
            return Some(DetectedLink::from_span(url, LinkSource::QuotedSpan));
        }
    }

    first_span(post).map(|url| DetectedLink::from_span(url, LinkSource::Span))
}

/// The post's card, with the YouTube placeholder URL repaired from the
/// body. A placeholder that cannot be repaired is ignored.
fn usable_card(post: &RawPost) -> Option<LinkCard> {
    let card = post.card.as_ref()?;
    if card.url != YOUTUBE_PLACEHOLDER {
        return is_web_url(&card.url).then(|| card.clone());
    }

    let url = recover_youtube_url(&post.text)?;
    Some(LinkCard { url, ..card.clone() })
}

fn first_span(post: &RawPost) -> Option<String> {
    post.link_spans.iter().find(|s| is_web_url(s)).cloned()
}

fn recover_youtube_url(body: &str) -> Option<String> {
    let text = HTML_TAG.replace_all(body, "").replace("&amp;", "&");
    YOUTUBE_URL.find(&text).map(|m| m.as_str().to_string())
}

fn is_web_url(candidate: &str) -> bool {
    url::Url::parse(candidate)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}
