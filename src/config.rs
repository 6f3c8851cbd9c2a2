//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::render::PixelBounds;
use crate::trends::TrendSpanSpec;
use crate::units::EnergyUnit;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub trends: TrendsConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database location
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_db_file")]
    pub db_file: String,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("trendline").to_string_lossy().to_string())
        .unwrap_or_else(|| "./trendline_data".to_string())
}

fn default_db_file() -> String {
    "weights.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_file: default_db_file(),
        }
    }
}

impl StorageConfig {
    /// Full path of the database file, with a leading `~/` expanded
    pub fn database_path(&self) -> PathBuf {
        let dir = match self.data_dir.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(&self.data_dir)),
            None => PathBuf::from(&self.data_dir),
        };
        dir.join(&self.db_file)
    }
}

/// Spans shown by the trend view
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrendsConfig {
    #[serde(default = "TrendSpanSpec::default_specs")]
    pub spans: Vec<TrendSpanSpec>,

    /// Unit for energy-equivalent figures
    #[serde(default)]
    pub energy_unit: EnergyUnit,
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            spans: TrendSpanSpec::default_specs(),
            energy_unit: EnergyUnit::default(),
        }
    }
}

/// Chart rendering configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenderConfig {
    #[serde(default = "default_chart_width")]
    pub chart_width: u32,

    #[serde(default = "default_chart_height")]
    pub chart_height: u32,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_max_grid_lines")]
    pub max_grid_lines: u32,
}

fn default_chart_width() -> u32 {
    320
}

fn default_chart_height() -> u32 {
    160
}

fn default_max_concurrent() -> usize {
    2
}

fn default_max_grid_lines() -> u32 {
    8
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            chart_width: default_chart_width(),
            chart_height: default_chart_height(),
            max_concurrent: default_max_concurrent(),
            max_grid_lines: default_max_grid_lines(),
        }
    }
}

impl RenderConfig {
    pub fn bounds(&self) -> PixelBounds {
        PixelBounds::new(self.chart_width, self.chart_height)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("trendline").join("config.toml")),
            Some(PathBuf::from("/etc/trendline/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `TRENDLINE_*` overrides from `lookup`; unparsable numbers are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Storage overrides
        if let Some(data_dir) = lookup("TRENDLINE_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        if let Some(db_file) = lookup("TRENDLINE_DB_FILE") {
            self.storage.db_file = db_file;
        }

        // Render overrides
        if let Some(width) = lookup("TRENDLINE_CHART_WIDTH").and_then(|v| v.parse().ok()) {
            self.render.chart_width = width;
        }
        if let Some(height) = lookup("TRENDLINE_CHART_HEIGHT").and_then(|v| v.parse().ok()) {
            self.render.chart_height = height;
        }

        // Logging overrides
        if let Some(level) = lookup("TRENDLINE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TRENDLINE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Trendline Configuration
#
# Environment variables override these settings:
# - TRENDLINE_DATA_DIR
# - TRENDLINE_DB_FILE
# - TRENDLINE_CHART_WIDTH
# - TRENDLINE_CHART_HEIGHT
# - TRENDLINE_LOG_LEVEL
# - TRENDLINE_LOG_FORMAT

[storage]
# Directory holding the database
data_dir = "~/.local/share/trendline"

# Database file name inside data_dir
db_file = "weights.db"

[trends]
# Unit for energy equivalents: calories or kilojoules
energy_unit = "calories"

# Spans in display order; omit `days` for all recorded history
[[trends.spans]]
title = "Week"
days = 7

[[trends.spans]]
title = "Fortnight"
days = 14

[[trends.spans]]
title = "Month"
days = 30

[[trends.spans]]
title = "Quarter"
days = 90

[[trends.spans]]
title = "Six Months"
days = 182

[[trends.spans]]
title = "Year"
days = 365

[[trends.spans]]
title = "All Time"

[render]
# Chart size in pixels
chart_width = 320
chart_height = 160

# Charts rendered at the same time
max_concurrent = 2

# Upper bound on horizontal grid lines per chart
max_grid_lines = 8

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/trendline/trendline.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_parses() {
        let config = Config::parse(&generate_default_config()).unwrap();

        assert_eq!(config.storage.db_file, "weights.db");
        assert_eq!(config.trends.spans, TrendSpanSpec::default_specs());
        assert_eq!(config.trends.energy_unit, EnergyUnit::Calories);
        assert_eq!(config.render.bounds(), PixelBounds::new(320, 160));
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::parse(
            r#"
            [render]
            chart_width = 640

            [[trends.spans]]
            title = "Ten Days"
            days = 10
            visible = false
            "#,
        )
        .unwrap();

        assert_eq!(config.render.chart_width, 640);
        assert_eq!(config.render.chart_height, 160);
        assert_eq!(config.trends.spans.len(), 1);
        assert!(!config.trends.spans[0].visible);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[render]\nchart_width = \"wide\"\n").unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            Config::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("TRENDLINE_DATA_DIR", "/tmp/tl"),
            ("TRENDLINE_CHART_HEIGHT", "90"),
            ("TRENDLINE_CHART_WIDTH", "not-a-number"),
            ("TRENDLINE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.storage.database_path(), PathBuf::from("/tmp/tl/weights.db"));
        assert_eq!(config.render.chart_height, 90);
        assert_eq!(config.render.chart_width, 320);
        assert_eq!(config.logging.format, "json");
    }
}
