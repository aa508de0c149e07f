//! Pluggable state sources
//!
//! A `StateLoader` turns a locator (file name, URL, resource key, or the
//! state text itself) into state JSON text and can store a named state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{StateError, StateResult};

/// Source of state documents
pub trait StateLoader: Send + Sync {
    /// Fetch the state text for a locator
    fn get_state(&self, locator: &str) -> StateResult<String>;

    /// Store a state under a name
    fn save_state(&self, name: &str, _json: &str) -> StateResult<()> {
        Err(StateError::load(name, format!("{} loader cannot save states", self.name())))
    }

    fn name(&self) -> &'static str;
}

fn with_json_extension(name: &str) -> String {
    if name.ends_with(".json") {
        name.to_string()
    } else {
        format!("{}.json", name)
    }
}

/// States stored as `.json` files in a directory
#[derive(Debug, Clone)]
pub struct FileStateLoader {
    dir: PathBuf,
}

impl FileStateLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn resolve(&self, locator: &str) -> PathBuf {
        let path = Path::new(locator);
        if path.is_absolute() || path.exists() {
            path.to_path_buf()
        } else {
            self.dir.join(with_json_extension(locator))
        }
    }

    /// Names of the saved states, sorted
    pub fn list(&self) -> StateResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StateError::load(self.dir.display().to_string(), e)),
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
            .filter(|n| n.ends_with(".json"))
            .collect();
        names.sort();
        Ok(names)
    }
}

impl StateLoader for FileStateLoader {
    fn get_state(&self, locator: &str) -> StateResult<String> {
        let path = self.resolve(locator);
        std::fs::read_to_string(&path).map_err(|e| StateError::load(path.display().to_string(), e))
    }

    fn save_state(&self, name: &str, json: &str) -> StateResult<()> {
        let path = self.dir.join(with_json_extension(name));
        std::fs::create_dir_all(&self.dir).map_err(|e| StateError::load(self.dir.display().to_string(), e))?;
        std::fs::write(&path, json).map_err(|e| StateError::load(path.display().to_string(), e))?;
        tracing::info!("Saved state {}", path.display());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// States fetched from a state server
///
/// `get_state` with an empty locator reads the server's current state;
/// a full URL is fetched as-is.
#[cfg(feature = "http")]
pub struct HttpStateLoader {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpStateLoader {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> StateResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StateError::load(&base_url, e))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get_text(&self, url: &str) -> StateResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| StateError::load(url, e))?;
        response.text().map_err(|e| StateError::load(url, e))
    }
}

#[cfg(feature = "http")]
impl StateLoader for HttpStateLoader {
    fn get_state(&self, locator: &str) -> StateResult<String> {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return self.get_text(locator);
        }
        let url = if locator.is_empty() {
            format!("{}/api/state", self.base_url)
        } else {
            format!("{}/api/state/{}", self.base_url, locator.trim_start_matches('/'))
        };
        // The server wraps the document as {"state": ...}
        let text = self.get_text(&url)?;
        let wrapped: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| StateError::load(&url, e))?;
        match wrapped.get("state") {
            Some(state) => Ok(state.to_string()),
            None => Ok(text),
        }
    }

    fn save_state(&self, name: &str, json: &str) -> StateResult<()> {
        let put_url = format!("{}/api/state", self.base_url);
        self.client
            .put(&put_url)
            .header("Content-Type", "application/json")
            .body(json.to_string())
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| StateError::load(&put_url, e))?;

        let save_url = format!("{}/api/save-state/{}", self.base_url, name);
        self.client
            .post(&save_url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| StateError::load(&save_url, e))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// States registered in memory under resource names
#[derive(Debug, Default)]
pub struct ResourceStateLoader {
    states: RwLock<HashMap<String, String>>,
}

impl ResourceStateLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, json: impl Into<String>) {
        if let Ok(mut states) = self.states.write() {
            states.insert(name.into(), json.into());
        }
    }
}

impl StateLoader for ResourceStateLoader {
    fn get_state(&self, locator: &str) -> StateResult<String> {
        self.states
            .read()
            .ok()
            .and_then(|s| s.get(locator).or_else(|| s.get(&with_json_extension(locator))).cloned())
            .ok_or_else(|| StateError::load(locator, "no such resource"))
    }

    fn save_state(&self, name: &str, json: &str) -> StateResult<()> {
        self.insert(name, json);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "resource"
    }
}

/// The locator is the state text
#[derive(Debug, Default, Clone, Copy)]
pub struct RawStateLoader;

impl StateLoader for RawStateLoader {
    fn get_state(&self, locator: &str) -> StateResult<String> {
        Ok(locator.to_string())
    }

    fn name(&self) -> &'static str {
        "raw"
    }
}

/// Wraps a loader and keeps a local copy of every fetched state
///
/// When the primary loader fails the last copy for that locator is used.
pub struct CachingStateLoader {
    primary: Box<dyn StateLoader>,
    cache: FileStateLoader,
}

impl CachingStateLoader {
    pub fn new(primary: Box<dyn StateLoader>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            primary,
            cache: FileStateLoader::new(cache_dir),
        }
    }

    fn cache_name(locator: &str) -> String {
        let cleaned: String = locator
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        if cleaned.is_empty() {
            "latest".to_string()
        } else {
            cleaned
        }
    }
}

impl StateLoader for CachingStateLoader {
    fn get_state(&self, locator: &str) -> StateResult<String> {
        let cache_name = Self::cache_name(locator);
        match self.primary.get_state(locator) {
            Ok(text) => {
                if let Err(e) = self.cache.save_state(&cache_name, &text) {
                    tracing::warn!("Could not keep a copy of state {}: {}", locator, e);
                }
                Ok(text)
            }
            Err(e) => {
                tracing::warn!("{}; using cached copy", e);
                self.cache.get_state(&cache_name).map_err(|_| e)
            }
        }
    }

    fn save_state(&self, name: &str, json: &str) -> StateResult<()> {
        self.primary.save_state(name, json)
    }

    fn name(&self) -> &'static str {
        self.primary.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl StateLoader for Failing {
        fn get_state(&self, locator: &str) -> StateResult<String> {
            Err(StateError::load(locator, "unreachable"))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_file_loader_save_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FileStateLoader::new(dir.path());
        loader.save_state("demo", r#"{"version":"0.2.0"}"#).unwrap();
        assert_eq!(loader.get_state("demo").unwrap(), r#"{"version":"0.2.0"}"#);
        assert_eq!(loader.list().unwrap(), vec!["demo.json".to_string()]);
        assert!(loader.get_state("missing").is_err());
    }

    #[test]
    fn test_resource_and_raw() {
        let resources = ResourceStateLoader::new();
        resources.insert("a.json", "{}");
        assert_eq!(resources.get_state("a").unwrap(), "{}");
        assert!(resources.get_state("b").is_err());
        assert_eq!(RawStateLoader.get_state("{\"x\":1}").unwrap(), "{\"x\":1}");
        assert!(RawStateLoader.save_state("n", "{}").is_err());
    }

    #[test]
    fn test_caching_loader_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let resources = ResourceStateLoader::new();
        resources.insert("s", "{\"v\":1}");
        let caching = CachingStateLoader::new(Box::new(resources), dir.path());
        assert_eq!(caching.get_state("s").unwrap(), "{\"v\":1}");

        let failing = CachingStateLoader::new(Box::new(Failing), dir.path());
        assert_eq!(failing.get_state("s").unwrap(), "{\"v\":1}");
        assert!(failing.get_state("never").is_err());
    }
}
