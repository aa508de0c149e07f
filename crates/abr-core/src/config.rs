//! Configuration for abr-core
//!
//! Centralized configuration for where data and VisAssets come from, how
//! fetched state is cached, and how data is placed in the scene.
//!
//! Configuration is layered: builtin defaults, then `~/.abr/config.toml`,
//! then `.abr/config.toml` in the project directory. Later layers override
//! earlier ones key by key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use abr_io::Bounds;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::visasset::FetchSource;

/// State schema version accepted by default
pub const DEFAULT_SCHEMA_VERSION: &str = "0.2.0";

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `datasets/` and `visassets/`
    pub media_root: PathBuf,
    /// Remote server for key data, VisAssets and state
    pub server_url: Option<String>,
    /// Order in which VisAsset sources are consulted
    pub fetch_order: Vec<FetchSource>,
    /// Room that every dataset is scaled to fit into
    pub container_bounds: Bounds,
    /// State schema version this engine accepts
    pub schema_version: String,
    /// Timeout for remote requests in seconds
    pub http_timeout_secs: u64,
    /// Run a render pass after every state application
    pub render_on_apply: bool,
    /// Keep a copy of each fetched state as a fallback
    pub keep_state_copy: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            server_url: None,
            fetch_order: vec![FetchSource::Media, FetchSource::Http, FetchSource::Local],
            container_bounds: Bounds::from_min_max([-1.0; 3], [1.0; 3]),
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            http_timeout_secs: 30,
            render_on_apply: true,
            keep_state_copy: true,
        }
    }
}

/// `<data dir>/abr/media`, or `./media` when there is no data dir
pub fn default_media_root() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("abr").join("media"))
        .unwrap_or_else(|| PathBuf::from("media"))
}

impl EngineConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration rooted at a specific media directory
    pub fn with_media_root(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from standard locations
    ///
    /// Loads in order: builtin, user (`~/.abr/config.toml`), project
    /// (`.abr/config.toml`). Later sources override earlier ones.
    pub fn load_standard(project_root: Option<&Path>) -> ConfigResult<Self> {
        let mut layers = Vec::new();

        if let Some(home) = dirs::home_dir() {
            layers.push(home.join(".abr").join("config.toml"));
        }
        if let Some(root) = project_root {
            layers.push(root.join(".abr").join("config.toml"));
        }

        Self::load_layers(&layers)
    }

    /// Merge TOML files over the defaults, skipping files that do not exist
    pub fn load_layers(paths: &[PathBuf]) -> ConfigResult<Self> {
        let mut merged = toml::Value::try_from(Self::default())
            .map_err(|e| ConfigError::Io(e.to_string()))?;

        for path in paths.iter().filter(|p| p.exists()) {
            let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
            let layer: toml::Table = toml::from_str(&text).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            merge_toml(&mut merged, toml::Value::Table(layer));
            tracing::debug!("Applied config layer {}", path.display());
        }

        let config: Self = merged.try_into().map_err(|e: toml::de::Error| ConfigError::Parse {
            path: "<merged>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Timeout for remote requests
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.media_root.join("datasets")
    }

    pub fn visassets_dir(&self) -> PathBuf {
        self.media_root.join("visassets")
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        let extents = self.container_bounds.extents.to_array();
        if extents.iter().any(|e| !e.is_finite() || *e <= 0.0) {
            return Err(ConfigError::OutOfRange(format!(
                "container_bounds extents must be positive, got {:?}",
                extents
            )));
        }

        if self.http_timeout_secs == 0 {
            return Err(ConfigError::OutOfRange(
                "http_timeout_secs must be positive".to_string(),
            ));
        }

        if self.fetch_order.is_empty() {
            return Err(ConfigError::OutOfRange(
                "fetch_order must name at least one source".to_string(),
            ));
        }

        Ok(())
    }
}

fn merge_toml(base: &mut toml::Value, layer: toml::Value) {
    match (base, layer) {
        (toml::Value::Table(base), toml::Value::Table(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}
