use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::types::SelectionMode;

/// Root engine configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `SPLITLANE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Storage namespace every persisted key is prefixed with.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub assignment: AssignmentConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackendKind,
    /// Directory used by the file backend.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Retention window for stored keys; 0 keeps them forever.
    #[serde(default)]
    pub retention_secs: u64,
    /// Entry quota for the memory backend.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentConfig {
    /// How long an assignment stays sticky; 0 means no expiry.
    #[serde(default)]
    pub test_duration_days: u32,
    #[serde(default)]
    pub selection: SelectionMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatisticsConfig {
    /// Total clicks required before a winner may be declared.
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,
    /// Total clicks at which the confidence label becomes "High".
    #[serde(default = "default_high_confidence_clicks")]
    pub high_confidence_clicks: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub measurement_id: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub debug_mode: bool,
}

// Default functions
fn default_namespace() -> String {
    "splitlane".to_string()
}
fn default_backend() -> StorageBackendKind {
    StorageBackendKind::Memory
}
fn default_storage_path() -> PathBuf {
    PathBuf::from(".splitlane")
}
fn default_max_entries() -> usize {
    1024
}
fn default_min_sample_size() -> u64 {
    30
}
fn default_high_confidence_clicks() -> u64 {
    100
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_storage_path(),
            retention_secs: 0,
            max_entries: default_max_entries(),
        }
    }
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            test_duration_days: 0,
            selection: SelectionMode::default(),
        }
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            min_sample_size: default_min_sample_size(),
            high_confidence_clicks: default_high_confidence_clicks(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            measurement_id: String::new(),
            api_secret: String::new(),
            debug_mode: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            storage: StorageConfig::default(),
            assignment: AssignmentConfig::default(),
            statistics: StatisticsConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

impl AssignmentConfig {
    pub fn ttl(&self) -> Option<chrono::Duration> {
        (self.test_duration_days > 0).then(|| chrono::Duration::days(self.test_duration_days as i64))
    }
}

impl EngineConfig {
    /// Load configuration from an optional TOML file overlaid with
    /// environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("SPLITLANE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
