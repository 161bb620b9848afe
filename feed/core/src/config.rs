//! TOML Configuration File Support
//!
//! Centralized configuration loading for the feed core, supporting a TOML
//! file at `~/.config/stitchfeed/feed.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`STITCHFEED_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/stitchfeed/feed.toml` (typically `~/.config/stitchfeed/feed.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [navigation]
//! axis_lock_threshold = 15.0
//! distance_fraction = 0.3
//! velocity_threshold = 500.0
//! animation_ms = 300
//! prefetch_distance = 3
//! viewport_width = 390.0
//! viewport_height = 844.0
//!
//! [cache]
//! capacity = 2
//!
//! [playback]
//! tick_interval_ms = 500
//! tick_channel_capacity = 32
//!
//! [persistence]
//! save_every = 5
//! position_file = "/home/me/.local/share/stitchfeed/position.json"
//!
//! [content]
//! service_url = "https://api.example/v1"
//! user = "viewer-1"
//! page_size = 10
//! request_timeout_ms = 10000
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::DEFAULT_REQUEST_TIMEOUT;
use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::content_store::DEFAULT_PAGE_SIZE;
use crate::navigation::{NavigationConfig, Viewport};
use crate::playback::DEFAULT_TICK_INTERVAL;
use crate::position::DEFAULT_SAVE_EVERY;

/// Default bound of the playback tick channel
pub const DEFAULT_TICK_CHANNEL_CAPACITY: usize = 32;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Navigation section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationToml {
    /// Movement before the drag axis locks, in points
    pub axis_lock_threshold: Option<f32>,
    /// Fraction of the viewport a drag must cover to page
    pub distance_fraction: Option<f32>,
    /// Fling velocity that pages regardless of distance
    pub velocity_threshold: Option<f32>,
    /// Page transition duration in milliseconds
    pub animation_ms: Option<u64>,
    /// Distance from the end of the list that triggers "load more"
    pub prefetch_distance: Option<usize>,
    /// Surface width in points
    pub viewport_width: Option<f32>,
    /// Surface height in points
    pub viewport_height: Option<f32>,
}

/// Cache section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Number of pre-warmed pipelines (0 disables preloading)
    pub capacity: Option<usize>,
}

/// Playback section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackToml {
    /// Spacing of playback ticks in milliseconds
    pub tick_interval_ms: Option<u64>,
    /// Bound of the tick channel
    pub tick_channel_capacity: Option<usize>,
}

/// Persistence section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceToml {
    /// Index changes between position saves
    pub save_every: Option<u32>,
    /// Where the position file lives
    pub position_file: Option<String>,
}

/// Content section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentToml {
    /// Remote content service root
    pub service_url: Option<String>,
    /// Viewer identity
    pub user: Option<String>,
    /// Threads per feed page
    pub page_size: Option<usize>,
    /// Request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedToml {
    /// Navigation configuration section
    pub navigation: NavigationToml,
    /// Cache configuration section
    pub cache: CacheToml,
    /// Playback configuration section
    pub playback: PlaybackToml,
    /// Persistence configuration section
    pub persistence: PersistenceToml,
    /// Content configuration section
    pub content: ContentToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for a feed view
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Gesture and transition tuning
    pub navigation: NavigationConfig,

    /// Number of pre-warmed pipelines
    pub cache_capacity: usize,

    /// Spacing of playback ticks
    pub tick_interval: Duration,

    /// Bound of the tick channel
    pub tick_channel_capacity: usize,

    /// Index changes between position saves
    pub save_every: u32,

    /// Position file override (`None` = XDG data dir)
    pub position_file: Option<PathBuf>,

    /// Remote content service root (`None` = in-memory service)
    pub service_url: Option<String>,

    /// Viewer identity
    pub user: String,

    /// Threads per feed page
    pub page_size: usize,

    /// Content request timeout
    pub request_timeout: Duration,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            navigation: NavigationConfig::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            tick_interval: DEFAULT_TICK_INTERVAL,
            tick_channel_capacity: DEFAULT_TICK_CHANNEL_CAPACITY,
            save_every: DEFAULT_SAVE_EVERY,
            position_file: None,
            service_url: None,
            user: "anonymous".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl FeedConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Reject values the feed cannot run with
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nav = &self.navigation;
        if !(nav.distance_fraction > 0.0 && nav.distance_fraction <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "navigation.distance_fraction must be in (0, 1], got {}",
                nav.distance_fraction
            )));
        }
        if nav.velocity_threshold <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "navigation.velocity_threshold must be positive, got {}",
                nav.velocity_threshold
            )));
        }
        if nav.axis_lock_threshold < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "navigation.axis_lock_threshold must not be negative, got {}",
                nav.axis_lock_threshold
            )));
        }
        if nav.viewport.width <= 0.0 || nav.viewport.height <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "viewport must be non-empty, got {}x{}",
                nav.viewport.width, nav.viewport.height
            )));
        }
        if self.page_size == 0 {
            return Err(ConfigError::ValidationError(
                "content.page_size must be at least 1".to_string(),
            ));
        }
        if self.save_every == 0 {
            return Err(ConfigError::ValidationError(
                "persistence.save_every must be at least 1".to_string(),
            ));
        }
        if self.tick_channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "playback.tick_channel_capacity must be at least 1".to_string(),
            ));
        }
        if let Some(ref url) = self.service_url {
            url::Url::parse(url).map_err(|e| {
                ConfigError::ValidationError(format!("content.service_url '{url}': {e}"))
            })?;
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/stitchfeed/feed.toml` or
/// `~/.config/stitchfeed/feed.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("stitchfeed").join("feed.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// merged values fail validation. A missing config file is not an error.
pub fn load_config() -> Result<FeedConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or the merged values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<FeedConfig, ConfigError> {
    let mut config = FeedConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: FeedToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut FeedConfig, toml: &FeedToml) {
    let nav = &toml.navigation;
    if let Some(threshold) = nav.axis_lock_threshold {
        config.navigation.axis_lock_threshold = threshold;
    }
    if let Some(fraction) = nav.distance_fraction {
        config.navigation.distance_fraction = fraction;
    }
    if let Some(velocity) = nav.velocity_threshold {
        config.navigation.velocity_threshold = velocity;
    }
    if let Some(ms) = nav.animation_ms {
        config.navigation.animation_duration = Duration::from_millis(ms);
    }
    if let Some(distance) = nav.prefetch_distance {
        config.navigation.prefetch_distance = distance;
    }
    if nav.viewport_width.is_some() || nav.viewport_height.is_some() {
        let current = config.navigation.viewport;
        config.navigation.viewport = Viewport {
            width: nav.viewport_width.unwrap_or(current.width),
            height: nav.viewport_height.unwrap_or(current.height),
        };
    }

    if let Some(capacity) = toml.cache.capacity {
        config.cache_capacity = capacity;
    }

    if let Some(ms) = toml.playback.tick_interval_ms {
        config.tick_interval = Duration::from_millis(ms);
    }
    if let Some(capacity) = toml.playback.tick_channel_capacity {
        config.tick_channel_capacity = capacity;
    }

    if let Some(every) = toml.persistence.save_every {
        config.save_every = every;
    }
    if let Some(ref path) = toml.persistence.position_file {
        config.position_file = Some(PathBuf::from(path));
    }

    if toml.content.service_url.is_some() {
        config.service_url = toml.content.service_url.clone();
    }
    if let Some(ref user) = toml.content.user {
        config.user = user.clone();
    }
    if let Some(size) = toml.content.page_size {
        config.page_size = size;
    }
    if let Some(ms) = toml.content.request_timeout_ms {
        config.request_timeout = Duration::from_millis(ms);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut FeedConfig) {
    if let Ok(capacity) = std::env::var("STITCHFEED_CACHE_CAPACITY") {
        if let Ok(n) = capacity.parse::<usize>() {
            config.cache_capacity = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(ms) = std::env::var("STITCHFEED_ANIMATION_MS") {
        if let Ok(ms) = ms.parse::<u64>() {
            config.navigation.animation_duration = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(every) = std::env::var("STITCHFEED_SAVE_EVERY") {
        if let Ok(n) = every.parse::<u32>() {
            config.save_every = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(path) = std::env::var("STITCHFEED_POSITION_FILE") {
        config.position_file = Some(PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
    if let Ok(url) = std::env::var("STITCHFEED_SERVICE_URL") {
        config.service_url = Some(url);
        config.source = ConfigSource::Env;
    }
    if let Ok(user) = std::env::var("STITCHFEED_USER") {
        config.user = user;
        config.source = ConfigSource::Env;
    }
    if let Ok(size) = std::env::var("STITCHFEED_PAGE_SIZE") {
        if let Ok(n) = size.parse::<usize>() {
            config.page_size = n;
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Cache capacity override
    pub cache_capacity: Option<usize>,

    /// Content service URL override
    pub service_url: Option<String>,

    /// Viewer identity override
    pub user: Option<String>,

    /// Position file override
    pub position_file: Option<PathBuf>,

    /// Page size override
    pub page_size: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cache capacity override
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    /// Set content service URL override
    #[must_use]
    pub fn with_service_url(mut self, url: String) -> Self {
        self.service_url = Some(url);
        self
    }

    /// Set viewer identity override
    #[must_use]
    pub fn with_user(mut self, user: String) -> Self {
        self.user = Some(user);
        self
    }

    /// Set position file override
    #[must_use]
    pub fn with_position_file(mut self, path: PathBuf) -> Self {
        self.position_file = Some(path);
        self
    }

    /// Set page size override
    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut FeedConfig) {
        if self.cache_capacity.is_some()
            || self.service_url.is_some()
            || self.user.is_some()
            || self.position_file.is_some()
            || self.page_size.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(capacity) = self.cache_capacity {
            config.cache_capacity = capacity;
        }
        if let Some(ref url) = self.service_url {
            config.service_url = Some(url.clone());
        }
        if let Some(ref user) = self.user {
            config.user = user.clone();
        }
        if let Some(ref path) = self.position_file {
            config.position_file = Some(path.clone());
        }
        if let Some(size) = self.page_size {
            config.page_size = size;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Clean up all environment variables used by config loading.
    fn clear_config_env_vars() {
        std::env::remove_var("STITCHFEED_CACHE_CAPACITY");
        std::env::remove_var("STITCHFEED_ANIMATION_MS");
        std::env::remove_var("STITCHFEED_SAVE_EVERY");
        std::env::remove_var("STITCHFEED_POSITION_FILE");
        std::env::remove_var("STITCHFEED_SERVICE_URL");
        std::env::remove_var("STITCHFEED_USER");
        std::env::remove_var("STITCHFEED_PAGE_SIZE");
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Defaults
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = FeedConfig::default();

        assert_eq!(config.cache_capacity, 2);
        assert_eq!(config.save_every, 5);
        assert_eq!(config.navigation.animation_duration, Duration::from_millis(300));
        assert_eq!(config.navigation.prefetch_distance, 3);
        assert_eq!(config.tick_interval, Duration::from_millis(500));
        assert!(config.service_url.is_none());
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("stitchfeed"));
            assert!(p.to_string_lossy().contains("feed.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing
    // =========================================================================

    #[test]
    fn test_parse_partial_toml() {
        let file = write_toml(
            r#"
[navigation]
distance_fraction = 0.25
viewport_height = 1000.0

[cache]
capacity = 4
"#,
        );

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert!((config.navigation.distance_fraction - 0.25).abs() < f32::EPSILON);
        assert!((config.navigation.viewport.height - 1000.0).abs() < f32::EPSILON);
        // Width keeps its default
        assert!((config.navigation.viewport.width - 390.0).abs() < f32::EPSILON);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
        // Untouched sections keep defaults
        assert_eq!(config.navigation.prefetch_distance, 3);
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_toml(
            r#"
[cache
capacity = "two"
"#,
        );

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = write_toml(
            r#"
[navigation]
distance_fraction = 1.5
"#,
        );

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_missing_file_graceful() {
        clear_config_env_vars();

        let path = PathBuf::from("/nonexistent/path/feed.toml");
        let config = load_config_from_path(Some(path)).unwrap();

        // Env vars from a parallel test may leak in
        assert!(
            config.source() == ConfigSource::Default || config.source() == ConfigSource::Env,
            "Expected Default or Env source, got: {:?}",
            config.source()
        );
        assert!(config.config_file_path.is_none());
    }

    // =========================================================================
    // Priority Ordering
    // =========================================================================

    #[test]
    fn test_cli_overrides_env() {
        let mut config = FeedConfig::default();
        config.user = "env-user".to_string();
        config.set_source(ConfigSource::Env);

        ConfigOverrides::new()
            .with_user("cli-user".to_string())
            .with_cache_capacity(3)
            .apply(&mut config);

        assert_eq!(config.user, "cli-user");
        assert_eq!(config.cache_capacity, 3);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = FeedConfig::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::Cli), "CLI");
        assert_eq!(format!("{}", ConfigSource::Env), "environment");
        assert_eq!(format!("{}", ConfigSource::File), "config file");
        assert_eq!(format!("{}", ConfigSource::Default), "default");
    }

    #[test]
    fn test_config_error_display() {
        let read_err = ConfigError::ReadError {
            path: PathBuf::from("/test/path"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let msg = format!("{read_err}");
        assert!(msg.contains("/test/path"));
        assert!(msg.contains("Failed to read"));
    }
}
