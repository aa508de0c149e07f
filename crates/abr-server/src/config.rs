//! Server configuration from environment variables

use std::path::PathBuf;

use abr_core::config::{default_media_root, DEFAULT_SCHEMA_VERSION};

/// File name of the most recent thumbnail sent by an engine
pub const LATEST_THUMBNAIL: &str = "latest-thumbnail.png";

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// HTTP bind address (`ABR_ADDR`)
    pub bind_addr: String,
    /// Notifier socket bind address (`ABR_NOTIFIER_ADDR`)
    pub notifier_addr: String,
    /// Directory holding `datasets/` and `visassets/` (`ABR_MEDIA_ROOT`)
    pub media_root: PathBuf,
    /// Saved states (`ABR_STATES_DIR`)
    pub states_dir: PathBuf,
    /// Engine thumbnails (`ABR_THUMBNAILS_DIR`)
    pub thumbnails_dir: PathBuf,
    /// State schema version new states start with (`ABR_SCHEMA_VERSION`)
    pub schema_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::with_media_root(default_media_root())
    }
}

impl ServerConfig {
    /// Defaults with every directory under `media_root`
    pub fn with_media_root(media_root: impl Into<PathBuf>) -> Self {
        let media_root = media_root.into();
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            notifier_addr: "127.0.0.1:1900".to_string(),
            states_dir: media_root.join("states"),
            thumbnails_dir: media_root.join("thumbnails"),
            media_root,
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = match lookup("ABR_MEDIA_ROOT") {
            Some(root) => Self::with_media_root(root),
            None => Self::default(),
        };
        if let Some(addr) = lookup("ABR_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(addr) = lookup("ABR_NOTIFIER_ADDR") {
            config.notifier_addr = addr;
        }
        if let Some(dir) = lookup("ABR_STATES_DIR") {
            config.states_dir = dir.into();
        }
        if let Some(dir) = lookup("ABR_THUMBNAILS_DIR") {
            config.thumbnails_dir = dir.into();
        }
        if let Some(version) = lookup("ABR_SCHEMA_VERSION") {
            config.schema_version = version;
        }
        config
    }

    pub fn visassets_dir(&self) -> PathBuf {
        self.media_root.join("visassets")
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.media_root.join("datasets")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [("ABR_MEDIA_ROOT", "/srv/abr"), ("ABR_ADDR", "0.0.0.0:9000")]
            .into_iter()
            .collect();
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.states_dir, PathBuf::from("/srv/abr/states"));
        assert_eq!(config.notifier_addr, "127.0.0.1:1900");
        assert_eq!(config.schema_version, DEFAULT_SCHEMA_VERSION);
    }
}
