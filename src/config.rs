// Runtime configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the working directory
pub const CONFIG_FILE: &str = "spriggan.json";

/// Settings for the content runtime and the preview command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory that non-HTTP content URLs are resolved against
    pub asset_root: PathBuf,
    /// Number of background fetch threads
    pub worker_threads: usize,
    /// Timeout for a single HTTP request
    pub http_timeout_secs: u64,
    /// User agent sent with HTTP requests
    pub user_agent: String,
    /// Viewport size in sprite pixels
    pub viewport_width: f32,
    pub viewport_height: f32,
    /// Window size the viewport is fitted into
    pub window_width: f32,
    pub window_height: f32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("."),
            worker_threads: 4,
            http_timeout_secs: 30,
            user_agent: concat!("spriggan/", env!("CARGO_PKG_VERSION")).to_string(),
            viewport_width: 320.0,
            viewport_height: 180.0,
            window_width: 1280.0,
            window_height: 720.0,
        }
    }
}

impl RuntimeConfig {
    /// Load from the default config file, falling back to defaults
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Load from a path. Returns the defaults if the file doesn't exist.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Save to a path as pretty-printed JSON
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
