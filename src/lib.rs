/// Linkpulse - link ingestion and ranking for Mastodon and Bluesky timelines
///
/// Fetches new home-timeline activity for connected accounts, detects the
/// link each post shares, stores it idempotently and ranks links per user.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod links;
pub mod metrics;
pub mod models;
pub mod platforms;
pub mod ranking;
pub mod server;
pub mod store;

pub use error::{LinkError, LinkResult};
