/// Page metadata (title, description, preview image) for link backfill
use crate::error::{LinkError, LinkResult};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Best effort; never takes longer than the fetcher's timeout
    async fn fetch(&self, url: &str) -> LinkResult<PageMetadata>;
}

pub struct HtmlMetadataFetcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl HtmlMetadataFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> LinkResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| LinkError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, timeout })
    }

    async fn fetch_body(&self, url: &str) -> LinkResult<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| LinkError::Metadata(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(LinkError::Metadata(format!(
                "{}: HTTP {}",
                url,
                response.status().as_u16()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| LinkError::Metadata(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl MetadataFetcher for HtmlMetadataFetcher {
    async fn fetch(&self, url: &str) -> LinkResult<PageMetadata> {
        debug!(url, "Fetching page metadata");

        // The client timeout covers each request; this bounds redirects and body reads together
        let body = tokio::time::timeout(self.timeout, self.fetch_body(url))
            .await
            .map_err(|_| LinkError::Metadata(format!("{}: timed out after {:?}", url, self.timeout)))??;

        Ok(parse_html(url, &body))
    }
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
}

/// Extract OpenGraph data, falling back to `<title>` and the description meta tag
pub fn parse_html(base_url: &str, html: &str) -> PageMetadata {
    let document = Html::parse_document(html);

    let title = meta_content(&document, r#"meta[property="og:title"]"#).or_else(|| {
        let selector = Selector::parse("title").ok()?;
        document
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    });

    let description = meta_content(&document, r#"meta[property="og:description"]"#)
        .or_else(|| meta_content(&document, r#"meta[name="description"]"#));

    let image_url = meta_content(&document, r#"meta[property="og:image"]"#).and_then(|image| {
        url::Url::parse(base_url)
            .and_then(|base| base.join(&image))
            .map(|u| u.to_string())
            .ok()
    });

    PageMetadata {
        title,
        description,
        image_url,
    }
}
