/// Configuration management for the Linkpulse worker
use crate::{
    error::{LinkError, LinkResult},
    jobs::ProcessorConfig,
    platforms::FetchSettings,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub database: DatabaseConfig,
    pub jobs: JobsConfig,
    pub fetch: FetchConfig,
    pub metadata: MetadataConfig,
    pub logging: LoggingConfig,
    /// Bind address for `/health` and `/metrics`; unset disables the endpoint
    pub metrics_addr: Option<SocketAddr>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Job processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub continuous: bool,
}

/// Platform fetch limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub lookback_hours: i64,
    pub max_pages: usize,
    pub mastodon_page_limit: u32,
    pub bluesky_page_limit: u32,
    pub reshare_probe_accounts: usize,
    pub reshare_probe_pages: usize,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

/// Metadata backfill configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub timeout_secs: u64,
    pub concurrency: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `text`
    pub format: String,
}

fn default_user_agent() -> String {
    format!("linkpulse/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: PathBuf::from("./data/linkpulse.sqlite"),
                max_connections: 10,
            },
            jobs: JobsConfig {
                batch_size: 100,
                timeout_secs: 120,
                poll_interval_ms: 1000,
                continuous: false,
            },
            fetch: FetchConfig {
                lookback_hours: 24,
                max_pages: 20,
                mastodon_page_limit: 40,
                bluesky_page_limit: 100,
                reshare_probe_accounts: 20,
                reshare_probe_pages: 1,
                request_timeout_secs: 30,
                user_agent: default_user_agent(),
            },
            metadata: MetadataConfig {
                timeout_secs: 5,
                concurrency: 8,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> LinkResult<Self> {
        dotenv::dotenv().ok();

        let path: PathBuf = env::var("LINKPULSE_DATABASE_PATH")
            .unwrap_or_else(|_| "./data/linkpulse.sqlite".to_string())
            .into();
        let max_connections = env::var("LINKPULSE_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let batch_size = env::var("UPDATE_BATCH_SIZE")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .map_err(|_| LinkError::Validation("Invalid UPDATE_BATCH_SIZE".to_string()))?;
        let timeout_secs = env::var("LINKPULSE_JOB_TIMEOUT_SECS")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .map_err(|_| LinkError::Validation("Invalid LINKPULSE_JOB_TIMEOUT_SECS".to_string()))?;
        let poll_interval_ms = env::var("LINKPULSE_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);

        // Continuous re-seeding defaults on in production deployments
        let production = ["LINKPULSE_ENV", "NODE_ENV"]
            .iter()
            .any(|key| env::var(key).map(|v| v == "production").unwrap_or(false));
        let continuous = env::var("LINKPULSE_CONTINUOUS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(production);

        let lookback_hours = env::var("LINKPULSE_LOOKBACK_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .unwrap_or(24);
        let max_pages = env::var("LINKPULSE_MAX_PAGES")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .unwrap_or(20);
        let mastodon_page_limit = env::var("LINKPULSE_MASTODON_PAGE_LIMIT")
            .unwrap_or_else(|_| "40".to_string())
            .parse()
            .map_err(|_| LinkError::Validation("Invalid LINKPULSE_MASTODON_PAGE_LIMIT".to_string()))?;
        let bluesky_page_limit = env::var("LINKPULSE_BLUESKY_PAGE_LIMIT")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .map_err(|_| LinkError::Validation("Invalid LINKPULSE_BLUESKY_PAGE_LIMIT".to_string()))?;
        let reshare_probe_accounts = env::var("LINKPULSE_RESHARE_PROBE_ACCOUNTS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .unwrap_or(20);
        let reshare_probe_pages = env::var("LINKPULSE_RESHARE_PROBE_PAGES")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .unwrap_or(1);
        let request_timeout_secs = env::var("LINKPULSE_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);
        let user_agent = env::var("LINKPULSE_USER_AGENT").unwrap_or_else(|_| default_user_agent());

        let metadata_timeout_secs = env::var("LINKPULSE_METADATA_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);
        let metadata_concurrency = env::var("LINKPULSE_METADATA_CONCURRENCY")
            .unwrap_or_else(|_| "8".to_string())
            .parse()
            .unwrap_or(8);

        let metrics_addr = match env::var("LINKPULSE_METRICS_ADDR") {
            Ok(addr) if !addr.trim().is_empty() => Some(
                addr.trim()
                    .parse()
                    .map_err(|_| LinkError::Validation(format!("Invalid LINKPULSE_METRICS_ADDR: {}", addr)))?,
            ),
            _ => None,
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

        Ok(WorkerConfig {
            database: DatabaseConfig {
                path,
                max_connections,
            },
            jobs: JobsConfig {
                batch_size,
                timeout_secs,
                poll_interval_ms,
                continuous,
            },
            fetch: FetchConfig {
                lookback_hours,
                max_pages,
                mastodon_page_limit,
                bluesky_page_limit,
                reshare_probe_accounts,
                reshare_probe_pages,
                request_timeout_secs,
                user_agent,
            },
            metadata: MetadataConfig {
                timeout_secs: metadata_timeout_secs,
                concurrency: metadata_concurrency,
            },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
            metrics_addr,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> LinkResult<()> {
        if self.jobs.batch_size == 0 {
            return Err(LinkError::Validation("Batch size must be at least 1".to_string()));
        }

        if self.jobs.timeout_secs == 0 {
            return Err(LinkError::Validation("Job timeout must be at least 1 second".to_string()));
        }

        if self.fetch.mastodon_page_limit == 0 || self.fetch.bluesky_page_limit == 0 {
            return Err(LinkError::Validation("Page limits must be at least 1".to_string()));
        }

        if self.fetch.lookback_hours <= 0 {
            return Err(LinkError::Validation("Lookback must be positive".to_string()));
        }

        Ok(())
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            lookback: chrono::Duration::hours(self.fetch.lookback_hours),
            max_pages: self.fetch.max_pages.max(1),
            mastodon_page_limit: self.fetch.mastodon_page_limit,
            bluesky_page_limit: self.fetch.bluesky_page_limit,
            reshare_probe_accounts: self.fetch.reshare_probe_accounts,
            reshare_probe_pages: self.fetch.reshare_probe_pages,
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            batch_size: self.jobs.batch_size,
            job_timeout: Duration::from_secs(self.jobs.timeout_secs),
            poll_interval: Duration::from_millis(self.jobs.poll_interval_ms),
            continuous: self.jobs.continuous,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.request_timeout_secs.max(1))
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata.timeout_secs)
    }
}
