//! Configuration module for Knolx Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation of portal routes and
//! upload constraints.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Placeholder substituted with the content item id in route templates
pub const ITEM_ID_PLACEHOLDER: &str = "{id}";

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("PORTAL_URL", "https://knolx.example.com");
/// let result = expand_env_vars("url: ${PORTAL_URL}");
/// assert_eq!(result, "url: https://knolx.example.com");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("static env var pattern");
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let var_name = &cap[1];

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

/// Custom deserializer for strings with environment variable expansion.
///
/// Used with serde's `deserialize_with` so values set programmatically
/// (e.g. via `serde_yaml::from_value`) are expanded too.
fn deserialize_with_env<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(expand_env_vars(&s))
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub portal: PortalConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub cancel: CancelConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Configuration pointing at `base_url` with every other section defaulted
    pub fn for_portal(base_url: &str, csrf_token: &str) -> Self {
        Self {
            portal: PortalConfig {
                base_url: base_url.to_string(),
                csrf_token: csrf_token.to_string(),
                csrf_header: default_csrf_header(),
                request_timeout_seconds: default_request_timeout(),
                routes: RoutesConfig::default(),
            },
            upload: UploadConfig::default(),
            cancel: CancelConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_http_url(&self.portal.base_url) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid portal base_url '{}': must start with http:// or https://",
                self.portal.base_url
            )));
        }

        if self.portal.csrf_header.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "csrf_header cannot be empty".into(),
            ));
        }

        if self.portal.request_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_seconds must be greater than zero".into(),
            ));
        }

        for (name, template) in self.portal.routes.item_routes() {
            if !template.contains(ITEM_ID_PLACEHOLDER) {
                return Err(ConfigError::ValidationError(format!(
                    "Route '{}' must contain the {} placeholder",
                    name, ITEM_ID_PLACEHOLDER
                )));
            }
        }

        if self.upload.max_file_size_mb == 0 {
            return Err(ConfigError::ValidationError(
                "max_file_size_mb must be greater than zero".into(),
            ));
        }

        if self.upload.accepted_extensions.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one accepted extension must be configured".into(),
            ));
        }

        if self.upload.reference_sentinel.is_empty() {
            return Err(ConfigError::ValidationError(
                "reference_sentinel cannot be empty".into(),
            ));
        }

        for (name, poll) in [
            ("progress_poll", &self.upload.progress_poll),
            ("reference_poll", &self.upload.reference_poll),
        ] {
            if poll.max_attempts == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "{}.max_attempts must be greater than zero",
                    name
                )));
            }
        }

        if self.metrics.enabled && self.metrics.textfile.is_none() {
            return Err(ConfigError::ValidationError(
                "metrics.textfile is required when metrics are enabled".into(),
            ));
        }

        Ok(())
    }
}

/// Portal connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Portal root URL. Supports ${VAR} and ${VAR:-default} expansion.
    #[serde(deserialize_with = "deserialize_with_env")]
    pub base_url: String,

    /// Anti-forgery token sent with every request
    #[serde(default, deserialize_with = "deserialize_with_env")]
    pub csrf_token: String,

    /// Header carrying the anti-forgery token. Default: "CSRF-Token"
    #[serde(default = "default_csrf_header")]
    pub csrf_header: String,

    /// Timeout for query requests. The upload request itself is unbounded.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    #[serde(default)]
    pub routes: RoutesConfig,
}

impl PortalConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn default_csrf_header() -> String {
    "CSRF-Token".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Route templates relative to `base_url`.
///
/// Item routes must contain `{id}`, which is replaced by the
/// percent-encoded content item id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
    pub upload: String,
    pub check_uploading: String,
    pub check_pending_url: String,
    pub progress: String,
    pub new_reference: String,
    pub cancel: String,
    pub update_metadata: String,
    pub search_sessions: String,
    pub search_users: String,
}

impl RoutesConfig {
    /// Routes that address a single content item
    fn item_routes(&self) -> [(&'static str, &str); 7] {
        [
            ("upload", &self.upload),
            ("check_uploading", &self.check_uploading),
            ("check_pending_url", &self.check_pending_url),
            ("progress", &self.progress),
            ("new_reference", &self.new_reference),
            ("cancel", &self.cancel),
            ("update_metadata", &self.update_metadata),
        ]
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            upload: "/youtube/{id}/upload".into(),
            check_uploading: "/youtube/{id}/uploading".into(),
            check_pending_url: "/youtube/{id}/temporary-url".into(),
            progress: "/youtube/{id}/progress".into(),
            new_reference: "/youtube/{id}/video-id".into(),
            cancel: "/youtube/{id}/cancel".into(),
            update_metadata: "/youtube/{id}/update".into(),
            search_sessions: "/sessions/search".into(),
            search_users: "/users/search".into(),
        }
    }
}

/// Upload workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_accepted_extensions")]
    pub accepted_extensions: Vec<String>,
    #[serde(default = "default_progress_poll")]
    pub progress_poll: PollConfig,
    #[serde(default = "default_reference_poll")]
    pub reference_poll: PollConfig,
    /// Body returned by the reference endpoint while the server is still
    /// finalizing the new video
    #[serde(default = "default_reference_sentinel")]
    pub reference_sentinel: String,
    #[serde(default = "default_embed_url_prefix")]
    pub embed_url_prefix: String,
}

impl UploadConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            accepted_extensions: default_accepted_extensions(),
            progress_poll: default_progress_poll(),
            reference_poll: default_reference_poll(),
            reference_sentinel: default_reference_sentinel(),
            embed_url_prefix: default_embed_url_prefix(),
        }
    }
}

fn default_max_file_size_mb() -> u64 {
    2048
}

fn default_accepted_extensions() -> Vec<String> {
    [
        "mov", "mpeg4", "mp4", "avi", "wmv", "mpegps", "flv", "3gpp", "webm",
    ]
    .iter()
    .map(|ext| ext.to_string())
    .collect()
}

fn default_progress_poll() -> PollConfig {
    PollConfig {
        interval_millis: 0,
        max_attempts: None,
        timeout_seconds: Some(6 * 60 * 60),
    }
}

fn default_reference_poll() -> PollConfig {
    PollConfig {
        interval_millis: 0,
        max_attempts: Some(1000),
        timeout_seconds: Some(10 * 60),
    }
}

fn default_reference_sentinel() -> String {
    "No new video URL found".to_string()
}

fn default_embed_url_prefix() -> String {
    "www.youtube.com/embed/".to_string()
}

/// Bounds for one sequential polling chain.
///
/// # Example
///
/// ```yaml
/// progress_poll:
///   interval_millis: 250
///   max_attempts: 5000
///   timeout_seconds: 3600
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between a response and the next request. Default: 0 (RTT-bound)
    #[serde(default)]
    pub interval_millis: u64,

    /// Maximum number of requests in one chain (None = unbounded)
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Overall deadline for one chain (None = unbounded)
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// Cancel behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelConfig {
    /// Reset local state to `Cancelled` even when the portal rejects the
    /// cancel request. Default: true
    #[serde(default = "default_optimistic_reset")]
    pub optimistic_reset: bool,
}

impl Default for CancelConfig {
    fn default() -> Self {
        Self {
            optimistic_reset: default_optimistic_reset(),
        }
    }
}

fn default_optimistic_reset() -> bool {
    true
}

/// Metrics configuration
///
/// The CLI writes the Prometheus text exposition to `textfile` on exit,
/// for pickup by a node exporter textfile collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset. Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
