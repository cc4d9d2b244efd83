use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Config file consulted when no explicit path is given
const DEFAULT_CONFIG_PATH: &str = "dynoscope.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub tracking: TrackingConfig,
    pub streams: StreamConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Platform API base URL
    pub base_url: String,
    /// Environment variable holding the bearer token
    pub token_env: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.heroku.com".to_string(),
            token_env: "PLATFORM_API_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Applications to track
    pub apps: Vec<String>,
    /// Snapshot file for fast cold-start rendering
    pub snapshot_path: PathBuf,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            apps: Vec::new(),
            snapshot_path: PathBuf::from(".dynoscope/apps.json"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// History lines replayed when a stream becomes visible
    pub resume_lines: usize,
    /// Ring buffer capacity per stream, in lines
    pub buffer_lines: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            resume_lines: 100,
            buffer_lines: 100,
        }
    }
}

impl Config {
    /// Load from an explicit path, or from `dynoscope.toml` if present,
    /// or fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::read(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}
