use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::DownloadError;
use crate::utils::parse_source_url;

pub const DEFAULT_PART_COUNT: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(100);
pub const USER_AGENT: &str = concat!("downloader/", env!("CARGO_PKG_VERSION"));

/// Validated settings for one download job. Immutable once the job starts.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub url: Url,
    pub destination: PathBuf,
    pub part_count: u32,
    pub connect_timeout: Duration,
    pub stall_timeout: Duration,
    pub refresh_interval: Duration,
    pub user_agent: String,
}

impl JobConfig {
    pub fn new(url: &str, destination: impl Into<PathBuf>, part_count: u32) -> Result<Self, DownloadError> {
        let url = parse_source_url(url)?;
        let destination = destination.into();

        if part_count == 0 {
            return Err(DownloadError::InvalidPlan(
                "part count must be at least 1".to_string(),
            ));
        }
        if destination.file_name().is_none() {
            return Err(DownloadError::InvalidPlan(format!(
                "output path `{}` does not name a file",
                destination.display()
            )));
        }

        Ok(Self {
            url,
            destination,
            part_count,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            user_agent: USER_AGENT.to_string(),
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }
}
