/// Metrics and telemetry for the Linkpulse worker
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Sync job outcomes and durations
/// - Platform fetches and fetched activity volume
/// - Link post ingestion outcomes
/// - Metadata backfill fetches

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== Job Metrics ==========

    /// Sync jobs settled, by final status
    pub static ref SYNC_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sync_jobs_total",
        "Total number of sync jobs processed",
        &["status"]
    )
    .unwrap();

    /// Sync job duration in seconds, including timed-out jobs
    pub static ref SYNC_JOB_DURATION_SECONDS: Histogram = register_histogram!(
        "sync_job_duration_seconds",
        "Sync job execution time in seconds",
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .unwrap();

    /// Pending jobs seen at the end of the last iteration
    pub static ref SYNC_JOBS_PENDING: IntGauge = register_int_gauge!(
        "sync_jobs_pending",
        "Number of pending sync jobs"
    )
    .unwrap();

    // ========== Platform Metrics ==========

    /// Timeline fetches by platform and outcome
    pub static ref PLATFORM_FETCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "platform_fetches_total",
        "Total number of platform timeline fetches",
        &["platform", "outcome"]
    )
    .unwrap();

    /// Activities returned by platform fetches
    pub static ref ACTIVITIES_FETCHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "activities_fetched_total",
        "Total number of timeline activities fetched",
        &["platform"]
    )
    .unwrap();

    // ========== Ingestion Metrics ==========

    /// Link post ingestion by outcome (created, attached, skipped)
    pub static ref LINK_POSTS_INGESTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "link_posts_ingested_total",
        "Total number of link post ingestions",
        &["outcome"]
    )
    .unwrap();

    /// Metadata backfill fetches by outcome
    pub static ref METADATA_FETCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "metadata_fetches_total",
        "Total number of link metadata fetches",
        &["outcome"]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a settled sync job
pub fn record_sync_job(status: &str, duration: f64) {
    SYNC_JOBS_TOTAL.with_label_values(&[status]).inc();
    SYNC_JOB_DURATION_SECONDS.observe(duration);
}

pub fn set_pending_jobs(count: i64) {
    SYNC_JOBS_PENDING.set(count);
}

/// Record a platform fetch and how many activities it returned
pub fn record_platform_fetch(platform: &str, outcome: &str, activities: usize) {
    PLATFORM_FETCHES_TOTAL
        .with_label_values(&[platform, outcome])
        .inc();
    ACTIVITIES_FETCHED_TOTAL
        .with_label_values(&[platform])
        .inc_by(activities as u64);
}

/// Record an ingestion outcome
pub fn record_link_post_ingested(outcome: &str) {
    LINK_POSTS_INGESTED_TOTAL
        .with_label_values(&[outcome])
        .inc();
}

/// Record a metadata fetch
pub fn record_metadata_fetch(outcome: &str) {
    METADATA_FETCHES_TOTAL.with_label_values(&[outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sync_job() {
        record_sync_job("completed", 1.5);
        let metrics = render_metrics();
        assert!(metrics.contains("sync_jobs_total"));
        assert!(metrics.contains("sync_job_duration_seconds"));
    }

    #[test]
    fn test_record_platform_fetch() {
        record_platform_fetch("mastodon", "success", 3);
        record_platform_fetch("bluesky", "error", 0);
        let metrics = render_metrics();
        assert!(metrics.contains("platform_fetches_total"));
        assert!(metrics.contains("activities_fetched_total"));
    }

    #[test]
    fn test_metrics_rendering() {
        record_link_post_ingested("created");
        record_metadata_fetch("success");
        set_pending_jobs(4);

        let metrics = render_metrics();
        assert!(metrics.contains("# HELP"));
        assert!(metrics.contains("# TYPE"));
        assert!(metrics.contains("link_posts_ingested_total"));
        assert!(metrics.contains("metadata_fetches_total"));
        assert!(metrics.contains("sync_jobs_pending"));
    }
}
