//! Configuration types for douk-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, path::PathBuf, time::Duration};

/// Download behavior configuration (directories, concurrency, item retries)
///
/// Groups settings related to where items land and how many are processed
/// at once. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Destination root; completed items land in `<root>/<id>/` (default: "./downloads")
    #[serde(default = "default_download_root")]
    pub download_root: PathBuf,

    /// Staging directory for in-progress assets (default: "<download_root>/.staging")
    ///
    /// Keep it on the same filesystem as `download_root` so the final rename
    /// is atomic.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Number of items processed concurrently (default: available parallelism, clamped to 4..=16)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Item-level attempt cap (default: 3)
    ///
    /// Each attempt re-runs extraction and download. Transport-level retries
    /// inside a single request are governed separately by [`RetryConfig`].
    #[serde(default = "default_item_max_attempts")]
    pub item_max_attempts: u32,

    /// Base delay before an item is re-attempted (default: 2 seconds)
    #[serde(default = "default_item_retry_delay", with = "duration_serde")]
    pub item_retry_delay: Duration,

    /// Delay before re-attempting an item the platform throttled (default: 30 seconds)
    #[serde(default = "default_rate_limited_item_delay", with = "duration_serde")]
    pub rate_limited_item_delay: Duration,

    /// Wall-clock budget for a whole batch (None = unlimited)
    #[serde(default, with = "optional_duration_serde")]
    pub batch_timeout: Option<Duration>,

    /// Download the background music track when the platform exposes one (default: false)
    #[serde(default)]
    pub download_music: bool,

    /// Download the cover image (default: false)
    #[serde(default)]
    pub download_cover: bool,

    /// Write `metadata.json` next to the assets (default: true)
    #[serde(default = "default_true")]
    pub write_metadata: bool,

    /// Number of times a signed asset URL is refreshed before downloading (default: 2)
    #[serde(default = "default_max_url_refreshes")]
    pub max_url_refreshes: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_root: default_download_root(),
            temp_dir: None,
            concurrency: default_concurrency(),
            item_max_attempts: default_item_max_attempts(),
            item_retry_delay: default_item_retry_delay(),
            rate_limited_item_delay: default_rate_limited_item_delay(),
            batch_timeout: None,
            download_music: false,
            download_cover: false,
            write_metadata: true,
            max_url_refreshes: default_max_url_refreshes(),
        }
    }
}

impl DownloadConfig {
    /// Resolved staging directory
    pub fn staging_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.download_root.join(".staging"))
    }
}

/// HTTP fetcher configuration (rate budget, connections, client identity)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Requests per second allowed against the upstream (default: 5)
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Extra requests allowed in a burst on top of the steady rate (default: 5)
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Maximum simultaneous connections, metadata and media combined (default: 8)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Timeout for a single request, including body streaming (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Cooldown applied to the whole bucket after a 429 without `Retry-After` (default: 10 seconds)
    #[serde(default = "default_rate_limit_cooldown", with = "duration_serde")]
    pub rate_limit_cooldown: Duration,

    /// Maximum redirect hops when resolving short links (default: 5)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Optional proxy URL (http or https)
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            max_connections: default_max_connections(),
            request_timeout: default_request_timeout(),
            rate_limit_cooldown: default_rate_limit_cooldown(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            proxy: None,
        }
    }
}

/// Retry configuration for transient transport failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add ±20% random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Per-platform endpoint settings
///
/// The API bases are configurable so a mirror, a signing proxy or a test
/// server can stand in for the real platform.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Douyin web API base (default: "https://www.douyin.com")
    #[serde(default = "default_douyin_api_base")]
    pub douyin_api_base: String,

    /// TikTok web API base (default: "https://www.tiktok.com")
    #[serde(default = "default_tiktok_api_base")]
    pub tiktok_api_base: String,

    /// Cookie header per platform name ("douyin", "tiktok")
    #[serde(default)]
    pub cookies: HashMap<String, String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            douyin_api_base: default_douyin_api_base(),
            tiktok_api_base: default_tiktok_api_base(),
            cookies: HashMap::new(),
        }
    }
}

impl PlatformConfig {
    /// Cookie configured for a platform, if any
    pub fn cookie(&self, platform: &str) -> Option<&str> {
        self.cookies.get(platform).map(String::as_str)
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./douk-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for the engine
///
/// Built once by the embedding application and handed to
/// [`Downloader::new`](crate::Downloader::new); it is immutable afterwards.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// HTTP rate budget and client identity
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Transport-level retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Platform endpoints and cookies
    #[serde(default)]
    pub platforms: PlatformConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load a configuration from a JSON file, filling missing fields with defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.concurrency == 0 {
            return Err(Error::Config {
                message: "concurrency must be at least 1".to_string(),
                key: Some("download.concurrency".to_string()),
            });
        }
        if self.download.item_max_attempts == 0 {
            return Err(Error::Config {
                message: "item_max_attempts must be at least 1".to_string(),
                key: Some("download.item_max_attempts".to_string()),
            });
        }
        if self.fetcher.max_connections == 0 {
            return Err(Error::Config {
                message: "max_connections must be at least 1".to_string(),
                key: Some("fetcher.max_connections".to_string()),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff_multiplier must be >= 1.0".to_string(),
                key: Some("retry.backoff_multiplier".to_string()),
            });
        }
        for (key, base) in [
            ("platforms.douyin_api_base", &self.platforms.douyin_api_base),
            ("platforms.tiktok_api_base", &self.platforms.tiktok_api_base),
        ] {
            url::Url::parse(base).map_err(|e| Error::Config {
                message: format!("invalid URL {base:?}: {e}"),
                key: Some(key.to_string()),
            })?;
        }
        Ok(())
    }
}

// Default value functions
fn default_download_root() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(4, 16)
}

fn default_item_max_attempts() -> u32 {
    3
}

fn default_item_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_rate_limited_item_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_max_url_refreshes() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_burst() -> u32 {
    5
}

fn default_max_connections() -> usize {
    8
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_rate_limit_cooldown() -> Duration {
    Duration::from_secs(10)
}

fn default_max_redirects() -> usize {
    5
}

fn default_user_agent() -> String {
    concat!(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 ",
        "(KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
    )
    .to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_douyin_api_base() -> String {
    "https://www.douyin.com".to_string()
}

fn default_tiktok_api_base() -> String {
    "https://www.tiktok.com".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("douk-dl.db")
}

// Duration serialization helper (milliseconds, so sub-second test values survive a round trip)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
