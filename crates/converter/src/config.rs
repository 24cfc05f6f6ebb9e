use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the conversion core and the `swk` front end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Path to the ffmpeg binary backing the native transcoding engine
    pub ffmpeg_bin: PathBuf,
    /// Oldest ffmpeg major version the engine accepts at load time
    pub min_ffmpeg_major: u32,
    /// Parent directory for the engine's private virtual filesystem (system temp dir if unset)
    pub work_dir: Option<PathBuf>,
    /// Directory that downloaded artifacts are written into
    pub output_dir: PathBuf,
    /// Delay between consecutive artifact downloads, in milliseconds
    pub download_stagger_ms: u64,
    /// Capacity of the bounded progress/log event channel
    pub event_capacity: usize,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ConverterConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            min_ffmpeg_major: 4,
            work_dir: None,
            output_dir: PathBuf::from("."),
            download_stagger_ms: 150,
            event_capacity: 256,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        // A zero-capacity tokio channel panics on construction
        config.event_capacity = config.event_capacity.max(1);

        Ok(config)
    }
}
