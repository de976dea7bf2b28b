/// Unified error types for the Linkpulse worker
use crate::models::Platform;
use std::time::Duration;
use thiserror::Error;

/// Main error type for ingestion, ranking and job processing
#[derive(Error, Debug)]
pub enum LinkError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// Migration errors
    #[error("Migration error: {0}")]
    Migration(String),

    /// Platform credentials were rejected
    #[error("{platform} credentials expired or revoked")]
    AuthExpired { platform: Platform },

    /// Platform asked us to slow down
    #[error("{platform} rate limit exceeded")]
    RateLimited {
        platform: Platform,
        retry_after: Option<Duration>,
    },

    /// Transport-level failure talking to a platform
    #[error("{platform} network error: {message}")]
    Network { platform: Platform, message: String },

    /// Platform answered with an unexpected status
    #[error("{platform} returned {status}: {message}")]
    Upstream {
        platform: Platform,
        status: u16,
        message: String,
    },

    /// Platform payload could not be decoded
    #[error("{platform} response could not be decoded: {message}")]
    Decode { platform: Platform, message: String },

    /// Unique-constraint violation (e.g., concurrent duplicate insert)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Job exceeded its time budget
    #[error("Job timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    /// Page metadata extraction errors
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for LinkError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                LinkError::Conflict(db_err.message().to_string())
            }
            _ => LinkError::Database(err),
        }
    }
}

impl LinkError {
    /// Upstream failures that the next scheduling pass may clear
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LinkError::AuthExpired { .. }
                | LinkError::RateLimited { .. }
                | LinkError::Network { .. }
                | LinkError::Upstream { .. }
                | LinkError::Timeout(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, LinkError::Conflict(_))
    }
}

/// Result type alias for Linkpulse operations
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = LinkError::Timeout(Duration::from_secs(120));
        assert_eq!(err.to_string(), "Job timed out after 120 seconds");
        assert!(err.is_transient());
    }

    #[test]
    fn test_classification() {
        let rate_limited = LinkError::RateLimited {
            platform: Platform::Mastodon,
            retry_after: None,
        };
        assert!(rate_limited.is_transient());
        assert!(!rate_limited.is_conflict());

        let conflict = LinkError::Conflict("UNIQUE constraint failed".to_string());
        assert!(conflict.is_conflict());
        assert!(!conflict.is_transient());
    }
}
