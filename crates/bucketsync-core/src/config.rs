//! Configuration module for BucketSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, saving, validation, defaults, and a builder pattern for
//! programmatic use.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::domain::WatchEntry;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for BucketSync.
///
/// Every section is optional in the file; missing sections take their
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub credentials: CredentialsConfig,
    pub preferences: PreferencesConfig,
    pub uploads: UploadsConfig,
    pub watcher: WatcherConfig,
    pub logging: LoggingConfig,
    /// Persisted watch entries, in insertion order.
    pub watchers: Vec<WatchEntry>,
}

/// Object-store credentials and target bucket.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint for S3-compatible services (MinIO, R2, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl CredentialsConfig {
    /// True once a bucket and both keys have been filled in.
    pub fn is_configured(&self) -> bool {
        !self.bucket.trim().is_empty()
            && !self.access_key_id.trim().is_empty()
            && !self.secret_access_key.is_empty()
    }
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// User preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    /// Seconds to wait after the last change before uploading. 0 uploads
    /// immediately.
    pub transfer_delay: u64,
}

impl PreferencesConfig {
    pub fn transfer_delay(&self) -> Duration {
        Duration::from_secs(self.transfer_delay)
    }
}

/// Upload execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadsConfig {
    /// Maximum number of uploads running at the same time.
    pub max_concurrent: usize,
    /// Upper bound on transfer records kept in memory. `None` keeps every
    /// record for the life of the process.
    pub max_retained_records: Option<usize>,
}

/// Directory event source settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Milliseconds a file's size must stay unchanged before it is reported.
    pub settle_ms: u64,
    /// Milliseconds between size checks of a settling file.
    pub poll_interval_ms: u64,
}

impl WatcherConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Interval between size checks, never shorter than one millisecond
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Path of the append-only transfer error log.
    pub error_log: PathBuf,
}

// ---------------------------------------------------------------------------
// Config::load() / save()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Write the configuration to `path`.
    ///
    /// The YAML is written to a sibling temporary file which is then renamed
    /// over `path`, so readers never observe a half-written file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(self).context("failed to serialize configuration")?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        std::fs::write(&tmp_path, yaml)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/bucketsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("bucketsync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            endpoint: None,
        }
    }
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self { transfer_delay: 0 }
    }
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_retained_records: None,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            settle_ms: 2000,
            poll_interval_ms: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("bucketsync");
        Self {
            level: "info".to_string(),
            error_log: data_dir.join("errorlog.txt"),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"uploads.max_concurrent"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. Blank credentials
    /// are accepted: uploads then fail and land in the error log.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- credentials ---
        if self.credentials.region.trim().is_empty() {
            errors.push(ValidationError::new(
                "credentials.region",
                "must not be empty",
            ));
        }
        if let Some(endpoint) = &self.credentials.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                errors.push(ValidationError::new(
                    "credentials.endpoint",
                    format!("must be an http(s) URL, got '{endpoint}'"),
                ));
            }
        }

        // --- uploads ---
        if self.uploads.max_concurrent == 0 {
            errors.push(ValidationError::new(
                "uploads.max_concurrent",
                "must be greater than 0",
            ));
        }
        if self.uploads.max_retained_records == Some(0) {
            errors.push(ValidationError::new(
                "uploads.max_retained_records",
                "must be greater than 0 when set",
            ));
        }

        // --- watcher ---
        if self.watcher.settle_ms == 0 {
            errors.push(ValidationError::new(
                "watcher.settle_ms",
                "must be greater than 0",
            ));
        }
        if self.watcher.poll_interval_ms == 0 {
            errors.push(ValidationError::new(
                "watcher.poll_interval_ms",
                "must be greater than 0",
            ));
        } else if self.watcher.poll_interval_ms > self.watcher.settle_ms {
            errors.push(ValidationError::new(
                "watcher.poll_interval_ms",
                format!(
                    "must not exceed watcher.settle_ms ({})",
                    self.watcher.settle_ms
                ),
            ));
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError::new(
                "logging.level",
                format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            ));
        }

        // --- watchers ---
        for (i, entry) in self.watchers.iter().enumerate() {
            let field = format!("watchers[{i}]");
            if entry.name().trim().is_empty() {
                errors.push(ValidationError::new(&field, "name must not be empty"));
            }
            if !entry.path().is_absolute() {
                errors.push(ValidationError::new(
                    &field,
                    format!("path must be absolute: {}", entry.path().display()),
                ));
            }
            let earlier = &self.watchers[..i];
            if earlier.iter().any(|e| e.name() == entry.name()) {
                errors.push(ValidationError::new(
                    &field,
                    format!("duplicate name '{}'", entry.name()),
                ));
            }
            if earlier.iter().any(|e| e.path() == entry.path()) {
                errors.push(ValidationError::new(
                    &field,
                    format!("duplicate path {}", entry.path().display()),
                ));
            }
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Config`].
///
/// ```
/// use bucketsync_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .bucket("backups")
///     .transfer_delay(0)
///     .logging_level("debug")
///     .build();
/// assert_eq!(config.credentials.bucket, "backups");
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- credentials ---

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.credentials.bucket = bucket.into();
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.credentials.region = region.into();
        self
    }

    pub fn keys(mut self, access_key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.config.credentials.access_key_id = access_key_id.into();
        self.config.credentials.secret_access_key = secret.into();
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.credentials.endpoint = Some(endpoint.into());
        self
    }

    // --- preferences / uploads ---

    pub fn transfer_delay(mut self, seconds: u64) -> Self {
        self.config.preferences.transfer_delay = seconds;
        self
    }

    pub fn max_concurrent_uploads(mut self, n: usize) -> Self {
        self.config.uploads.max_concurrent = n;
        self
    }

    pub fn max_retained_records(mut self, n: usize) -> Self {
        self.config.uploads.max_retained_records = Some(n);
        self
    }

    // --- watcher ---

    pub fn settle_ms(mut self, ms: u64) -> Self {
        self.config.watcher.settle_ms = ms;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.watcher.poll_interval_ms = ms;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn error_log(mut self, path: PathBuf) -> Self {
        self.config.logging.error_log = path;
        self
    }

    // --- watchers ---

    pub fn watch(mut self, entry: WatchEntry) -> Self {
        self.config.watchers.push(entry);
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
