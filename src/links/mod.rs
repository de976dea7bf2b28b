/// Link detection and lazy metadata backfill
pub mod backfill;
pub mod extractor;
pub mod metadata;

pub use backfill::MetadataBackfill;
pub use extractor::{detect_link, DetectedLink, LinkSource};
pub use metadata::{HtmlMetadataFetcher, MetadataFetcher, PageMetadata};
