//! Configuration loading and validation.
//!
//! Settings live in a TOML file with per-section defaults, so a minimal
//! or even absent file yields a working configuration. Components receive
//! explicit config values at construction; there is no ambient global
//! state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file does not exist
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    /// Filesystem error while reading the file
    #[error("IO error: {0}")]
    Io(String),

    /// The file is not valid TOML or has malformed values
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// ESI endpoint and target identifiers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EsiConfig {
    /// Structure whose market orders are fetched.
    pub structure_id: i64,
    /// Region whose market history is fetched.
    pub region_id: i64,
    /// Base URL of the ESI service, without a trailing slash.
    pub base_url: String,
}

impl Default for EsiConfig {
    fn default() -> Self {
        Self {
            structure_id: 1_035_466_617_946,
            region_id: 10_000_003,
            base_url: "https://esi.evetech.net/latest".to_string(),
        }
    }
}

/// Identification sent in the User-Agent header, as the ESI guidelines
/// ask third-party tools to do.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Application name.
    pub app_name: String,
    /// Application version.
    pub app_version: String,
    /// Maintainer contact email.
    pub email: String,
    /// Maintainer Discord handle.
    pub discord: String,
    /// In-game character name.
    pub eve_character: String,
    /// Where the source lives.
    pub source_url: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            app_name: "esi-market-tools".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            email: String::new(),
            discord: String::new(),
            eve_character: String::new(),
            source_url: String::new(),
        }
    }
}

impl UserAgentConfig {
    /// Format as a User-Agent header value:
    /// `AppName/Version (contact; parts; joined)`.
    pub fn format_header(&self) -> String {
        let contact: Vec<&str> = [
            self.email.as_str(),
            self.discord.as_str(),
            self.eve_character.as_str(),
            self.source_url.as_str(),
        ]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();

        if contact.is_empty() {
            format!("{}/{}", self.app_name, self.app_version)
        } else {
            format!("{}/{} ({})", self.app_name, self.app_version, contact.join("; "))
        }
    }
}

/// Rate-limiting and retry tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Token-bucket capacity.
    pub burst_size: u32,
    /// Steady-state refill rate.
    pub tokens_per_second: f64,
    /// Retry ceiling per page or type.
    pub max_retries: u32,
    /// Base retry delay in seconds.
    pub retry_delay_secs: f64,
    /// Backoff multiplier per retry.
    pub retry_backoff_factor: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst_size: 10,
            tokens_per_second: 5.0,
            max_retries: 5,
            retry_delay_secs: 3.0,
            retry_backoff_factor: 2.0,
        }
    }
}

impl RateLimitConfig {
    /// Base retry delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs)
    }
}

/// Filesystem locations, relative paths resolved against the config
/// file's directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for CSV exports.
    pub output_dir: PathBuf,
    /// CSV listing the type ids to track.
    pub type_ids: PathBuf,
    /// History cache file.
    pub history_cache: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            type_ids: PathBuf::from("data/type_ids.csv"),
            history_cache: PathBuf::from("data/history_cache.json"),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// ESI endpoint and targets.
    pub esi: EsiConfig,
    /// User-Agent identification.
    pub user_agent: UserAgentConfig,
    /// Rate limiting and retries.
    pub rate_limiting: RateLimitConfig,
    /// Filesystem locations.
    pub paths: PathsConfig,
    /// Directory the config file was loaded from; anchor for relative paths.
    #[serde(skip)]
    pub project_root: PathBuf,
}

impl AppConfig {
    /// Resolve a possibly-relative path against the project root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

/// Load configuration from a TOML file.
///
/// Missing sections and fields fall back to their defaults, so old config
/// files keep working as new settings are added.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file is missing, unreadable, or not
/// valid TOML.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    let mut config: AppConfig =
        toml::from_str(&raw).map_err(|e| ConfigError::Invalid(e.to_string()))?;

    config.project_root = path
        .canonicalize()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_default();

    Ok(config)
}
