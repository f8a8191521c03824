use std::path::PathBuf;
use std::time::Duration;

/// Configuration for ranking and queries
#[derive(Debug, Clone)]
pub struct RankConfig {
    /// Length of the rolling window in days (default: 30)
    pub rank_period_days: u32,

    /// Keys deleted per batch when reclaiming stale scratch records (default: 1000)
    pub cleanup_batch_size: usize,

    /// Rank records written per batch during the rank scan (default: 1000)
    pub write_batch_size: usize,

    /// Hard cap on the number of entries a top-packages query returns (default: 1000)
    pub max_top_limit: usize,

    /// Limit used by `top_packages_default` (default: 100)
    pub default_top_limit: usize,

    /// How often the background task ranks (default: 1h)
    pub rank_interval: Duration,

    /// How often the background task syncs the store (default: 5s)
    pub sync_interval: Duration,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            rank_period_days: 30,
            cleanup_batch_size: 1000,
            write_batch_size: 1000,
            max_top_limit: 1000,
            default_top_limit: 100,
            rank_interval: Duration::from_secs(60 * 60),
            sync_interval: Duration::from_secs(5),
        }
    }
}

impl RankConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rolling window length in days
    pub fn rank_period_days(mut self, days: u32) -> Self {
        self.rank_period_days = days;
        self
    }

    /// Set the scratch cleanup chunk size
    pub fn cleanup_batch_size(mut self, size: usize) -> Self {
        self.cleanup_batch_size = size.max(1);
        self
    }

    /// Set the rank record write chunk size
    pub fn write_batch_size(mut self, size: usize) -> Self {
        self.write_batch_size = size.max(1);
        self
    }

    /// Set the hard cap for top-packages queries
    pub fn max_top_limit(mut self, limit: usize) -> Self {
        self.max_top_limit = limit;
        self
    }

    /// Set the default top-packages limit
    pub fn default_top_limit(mut self, limit: usize) -> Self {
        self.default_top_limit = limit;
        self
    }

    /// Set the background ranking interval
    pub fn rank_interval(mut self, interval: Duration) -> Self {
        self.rank_interval = interval;
        self
    }

    /// Set the background sync interval
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }
}

/// Configuration for the durable store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the log and lock file
    pub dir: PathBuf,

    /// Log write buffer size (default: 64KB)
    pub log_buffer_size: usize,

    /// Flush the log after every write (default: false)
    pub sync_on_write: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./rankdb"),
            log_buffer_size: 64 * 1024, // 64KB
            sync_on_write: false,
        }
    }
}

impl StoreConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set log buffer size
    pub fn log_buffer_size(mut self, size: usize) -> Self {
        self.log_buffer_size = size;
        self
    }

    /// Flush the log after every write
    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }
}
