use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Result, VideoMemoryError};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// `VIDEO_INGESTOR_MODEL` default, overridable at runtime via
    /// `reload_model_provider` (§6).
    #[serde(default)]
    pub video_ingestor_model: Option<String>,
    /// `VIDEOMEMORY_RTSP_PULL_PORT` (§6).
    #[serde(default = "default_rtsp_pull_port")]
    pub rtsp_pull_port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory holding the relational store file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { data_dir: default_data_dir() }
    }
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("videomemory.sqlite3")
    }
}

/// HTTP API configuration. The API is a thin peer surface (§6), not part of
/// the core — it can be disabled entirely.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: default_api_enabled(), port: default_api_port() }
    }
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_rtsp_pull_port() -> u16 {
    8554
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            api: ApiConfig::default(),
            video_ingestor_model: None,
            rtsp_pull_port: default_rtsp_pull_port(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VideoMemoryError::Config(format!("cannot read config file: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| VideoMemoryError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rtsp_pull_port == 0 {
            return Err(VideoMemoryError::Config("rtsp_pull_port must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.api.enabled);
        assert_eq!(config.rtsp_pull_port, 8554);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let result = Config::from_file(std::path::Path::new("/nonexistent/videomemory.toml"));
        assert!(matches!(result, Err(VideoMemoryError::Config(_))));
    }
}
