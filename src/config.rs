//! Configuration for the datacrawl service.
//!
//! Settings come from the environment (optionally seeded by a `.env` file)
//! and may be overridden by a TOML file pointed at by `DATACRAWL_CONFIG`.
//! The resolved `Settings` value is constructed once at startup and passed
//! down explicitly; nothing reads the environment after that.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default minimum number of days between two checks of the same resource.
pub const DEFAULT_CHECK_DELAY_DAYS: i64 = 7;

/// Default hard cap on downloaded file size, in bytes (100 MB).
pub const DEFAULT_MAX_FILESIZE_ALLOWED: u64 = 104_857_600;

/// User agent sent on every probe and download.
pub const DEFAULT_USER_AGENT: &str = concat!("datacrawl/", env!("CARGO_PKG_VERSION"));

/// Runtime settings for the crawler, analyzer and admin API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Database URL. Supports `sqlite:` URLs or a bare file path.
    pub database_url: String,
    /// Webhook endpoint notified of every observed change.
    pub webhook_url: Option<String>,
    /// Whether webhook notifications are sent at all.
    pub webhook_enabled: bool,
    /// Bearer token required on mutating API routes. None disables auth.
    pub api_key: Option<String>,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Hard cap on downloaded file size in bytes.
    pub max_filesize_allowed: u64,
    /// Seconds to sleep between two scheduler batches.
    pub sleep_between_batches: f64,
    /// Number of resources fetched per scheduler batch.
    pub batch_size: usize,
    /// Maximum number of concurrent probes.
    pub crawler_count: usize,
    /// SQL LIKE patterns; matching URLs are never checked.
    pub excluded_patterns: Vec<String>,
    /// Minimum days between checks when the remote change interval is unknown.
    pub check_delay_days: i64,
    /// Hard timeout for a single HTTP request, in seconds.
    pub check_timeout_seconds: u64,
    /// Whether CSV content analysis runs at all.
    pub csv_analysis_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "datacrawl.db".to_string(),
            webhook_url: None,
            webhook_enabled: true,
            api_key: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_filesize_allowed: DEFAULT_MAX_FILESIZE_ALLOWED,
            sleep_between_batches: 60.0,
            batch_size: 100,
            crawler_count: 10,
            excluded_patterns: Vec::new(),
            check_delay_days: DEFAULT_CHECK_DELAY_DAYS,
            check_timeout_seconds: 30,
            csv_analysis_enabled: true,
        }
    }
}

impl Settings {
    /// Load settings: defaults, then the optional TOML file named by
    /// `DATACRAWL_CONFIG`, then environment variables (highest precedence).
    pub fn load() -> anyhow::Result<Self> {
        let mut settings = match env::var("DATACRAWL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    /// Parse settings from a TOML file, with defaults for missing keys.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = env::var("WEBHOOK_URL") {
            self.webhook_url = Some(v);
        }
        if let Ok(v) = env::var("WEBHOOK_ENABLED") {
            self.webhook_enabled = parse_bool(&v);
        }
        if let Ok(v) = env::var("API_KEY") {
            self.api_key = Some(v);
        }
        if let Ok(v) = env::var("USER_AGENT") {
            self.user_agent = v;
        }
        if let Ok(v) = env::var("MAX_FILESIZE_ALLOWED") {
            if let Ok(n) = v.parse() {
                self.max_filesize_allowed = n;
            }
        }
        if let Ok(v) = env::var("SLEEP_BETWEEN_BATCHES") {
            if let Ok(n) = v.parse() {
                self.sleep_between_batches = n;
            }
        }
        if let Ok(v) = env::var("BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                self.batch_size = n;
            }
        }
        if let Ok(v) = env::var("CRAWLER_COUNT") {
            if let Ok(n) = v.parse() {
                self.crawler_count = n;
            }
        }
        if let Ok(v) = env::var("EXCLUDED_PATTERNS") {
            self.excluded_patterns = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(v) = env::var("CHECK_DELAYS_DEFAULT_DAYS") {
            if let Ok(n) = v.parse() {
                self.check_delay_days = n;
            }
        }
        if let Ok(v) = env::var("CHECK_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse() {
                self.check_timeout_seconds = n;
            }
        }
        if let Ok(v) = env::var("CSV_ANALYSIS_ENABLED") {
            self.csv_analysis_enabled = parse_bool(&v);
        }
    }

    /// Filesystem path of the SQLite database, stripping any `sqlite:` prefix.
    pub fn database_path(&self) -> PathBuf {
        let url = self
            .database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))
            .unwrap_or(&self.database_url);
        PathBuf::from(url)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
