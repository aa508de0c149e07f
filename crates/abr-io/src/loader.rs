//! Data loader trait and implementations
//!
//! The `DataLoader` trait provides a uniform way to fetch the raw dataset
//! behind a key-data path, whether it lives in a media directory, on a
//! remote data server, or in memory.
//!
//! On disk and over HTTP a key data object `Org/Dataset/KeyData/Name` is a
//! pair of files `datasets/Org/Dataset/KeyData/Name.json` and `.bin`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::data_path::{self, DataPathType};
use crate::header::KeyDataHeader;
use crate::raw_dataset::RawDataset;

/// Errors that can occur during key-data I/O
#[derive(Debug, Error)]
pub enum IoError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid key data path: {0}")]
    InvalidPath(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid cell indices: {0}")]
    InvalidCells(String),

    #[error("Body is {actual} bytes, header requires {expected}")]
    Truncated { expected: usize, actual: usize },

    #[error("Array '{name}' has {actual} values, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Array not found: {0}")]
    ArrayNotFound(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Load cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type for I/O operations
pub type IoResult<T> = Result<T, IoError>;

/// Cooperative cancellation flag shared between a caller and a long read
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> IoResult<()> {
        if self.is_cancelled() {
            Err(IoError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Trait for fetching raw datasets by key-data path
pub trait DataLoader: Send + Sync {
    /// Load and decode the key data at `key_data_path`
    fn try_load(&self, key_data_path: &str) -> IoResult<RawDataset>;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Key-data paths this loader can see, if it can enumerate them
    fn list(&self) -> IoResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// A boxed loader for dynamic dispatch
pub type BoxedLoader = Box<dyn DataLoader>;

fn require_key_data_path(path: &str) -> IoResult<()> {
    if data_path::follows_convention(path, DataPathType::KeyData) {
        Ok(())
    } else {
        Err(IoError::InvalidPath(format!(
            "{} (expected {})",
            path,
            data_path::convention(DataPathType::KeyData)
        )))
    }
}

/// Loads key data from `<root>/datasets/...` on the local filesystem
#[derive(Debug, Clone)]
pub struct FileDataLoader {
    root: PathBuf,
}

impl FileDataLoader {
    /// `media_root` is the directory containing `datasets/`
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            root: media_root.into().join("datasets"),
        }
    }

    pub fn datasets_dir(&self) -> &Path {
        &self.root
    }

    fn file_stem(&self, key_data_path: &str) -> PathBuf {
        data_path::parts(key_data_path)
            .into_iter()
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    /// Write a dataset as a header/body pair
    pub fn save(&self, key_data_path: &str, raw: &RawDataset) -> IoResult<()> {
        require_key_data_path(key_data_path)?;
        let stem = self.file_stem(key_data_path);
        if let Some(parent) = stem.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IoError::Io(e.to_string()))?;
        }
        std::fs::write(stem.with_extension("json"), raw.header().to_json()?)
            .map_err(|e| IoError::Io(e.to_string()))?;
        std::fs::write(stem.with_extension("bin"), raw.to_bytes())
            .map_err(|e| IoError::Io(e.to_string()))?;
        Ok(())
    }
}

impl DataLoader for FileDataLoader {
    fn try_load(&self, key_data_path: &str) -> IoResult<RawDataset> {
        require_key_data_path(key_data_path)?;
        let stem = self.file_stem(key_data_path);
        let header_path = stem.with_extension("json");
        let body_path = stem.with_extension("bin");

        if !header_path.exists() {
            return Err(IoError::FileNotFound(header_path.display().to_string()));
        }
        let header_json =
            std::fs::read_to_string(&header_path).map_err(|e| IoError::Io(e.to_string()))?;
        let body = std::fs::read(&body_path)
            .map_err(|_| IoError::FileNotFound(body_path.display().to_string()))?;

        tracing::debug!("Loaded {} from {}", key_data_path, header_path.display());
        RawDataset::decode_pair(&header_json, &body)
    }

    fn name(&self) -> &'static str {
        "file"
    }

    fn list(&self) -> IoResult<Vec<String>> {
        let mut paths = Vec::new();
        if !self.root.is_dir() {
            return Ok(paths);
        }
        let read = |dir: &Path| -> IoResult<Vec<PathBuf>> {
            let entries = std::fs::read_dir(dir).map_err(|e| IoError::Io(e.to_string()))?;
            Ok(entries.flatten().map(|e| e.path()).collect())
        };
        for org in read(&self.root)?.into_iter().filter(|p| p.is_dir()) {
            for dataset in read(&org)?.into_iter().filter(|p| p.is_dir()) {
                let key_data_dir = dataset.join(DataPathType::KeyData.as_str());
                if !key_data_dir.is_dir() {
                    continue;
                }
                for file in read(&key_data_dir)? {
                    if file.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let name = |p: &Path| {
                        p.file_name()
                            .map(|s| s.to_string_lossy().to_string())
                            .unwrap_or_default()
                    };
                    let stem = file
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_default();
                    paths.push(data_path::make_path(
                        &name(&org),
                        &name(&dataset),
                        DataPathType::KeyData,
                        &stem,
                    ));
                }
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// Loads key data from a remote data server (`<base>/datasets/...`)
#[cfg(feature = "http")]
pub struct HttpDataLoader {
    base_url: String,
    client: reqwest::blocking::Client,
    cancel: CancellationToken,
}

#[cfg(feature = "http")]
impl HttpDataLoader {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> IoResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IoError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            cancel: CancellationToken::new(),
        })
    }

    /// Share a cancellation token with the caller
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn url(&self, key_data_path: &str, extension: &str) -> String {
        format!("{}/datasets/{}.{}", self.base_url, key_data_path, extension)
    }

    /// Fetch a URL, reading the body in chunks so cancellation is honoured
    fn fetch(&self, url: &str) -> IoResult<Vec<u8>> {
        use std::io::Read;

        self.cancel.check()?;
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| IoError::Http(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(IoError::FileNotFound(url.to_string()));
        }
        if !response.status().is_success() {
            return Err(IoError::Http(format!("{} returned {}", url, response.status())));
        }

        let mut body = Vec::new();
        let mut chunk = [0u8; 64 * 1024];
        loop {
            self.cancel.check()?;
            let n = response
                .read(&mut chunk)
                .map_err(|e| IoError::Http(e.to_string()))?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        Ok(body)
    }
}

#[cfg(feature = "http")]
impl DataLoader for HttpDataLoader {
    fn try_load(&self, key_data_path: &str) -> IoResult<RawDataset> {
        require_key_data_path(key_data_path)?;
        let header = self.fetch(&self.url(key_data_path, "json"))?;
        let header = String::from_utf8(header).map_err(|e| IoError::InvalidHeader(e.to_string()))?;
        let body = self.fetch(&self.url(key_data_path, "bin"))?;
        tracing::debug!("Downloaded {} from {}", key_data_path, self.base_url);
        RawDataset::decode_pair(&header, &body)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// In-memory key data, stored encoded so every load exercises the decoder
#[derive(Debug, Default)]
pub struct MemoryDataLoader {
    entries: RwLock<HashMap<String, (KeyDataHeader, Vec<u8>)>>,
}

impl MemoryDataLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a dataset under a key-data path
    pub fn insert(&self, key_data_path: impl Into<String>, raw: &RawDataset) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key_data_path.into(), (raw.header(), raw.to_bytes()));
        }
    }

    pub fn remove(&self, key_data_path: &str) -> bool {
        self.entries
            .write()
            .map(|mut e| e.remove(key_data_path).is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DataLoader for MemoryDataLoader {
    fn try_load(&self, key_data_path: &str) -> IoResult<RawDataset> {
        let entries = self
            .entries
            .read()
            .map_err(|e| IoError::Io(format!("Lock poisoned: {}", e)))?;
        let (header, body) = entries
            .get(key_data_path)
            .ok_or_else(|| IoError::FileNotFound(key_data_path.to_string()))?;
        RawDataset::decode(header, body)
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn list(&self) -> IoResult<Vec<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| IoError::Io(format!("Lock poisoned: {}", e)))?;
        let mut paths: Vec<String> = entries.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }
}
