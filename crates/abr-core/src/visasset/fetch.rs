//! VisAsset fetch strategies
//!
//! The manager consults fetchers in a configurable order; the first one
//! that produces a decoded VisAsset wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Manifest, VisAsset};
use crate::error::{VisAssetError, VisAssetResult};

/// Manifest file name inside a VisAsset directory
pub const MANIFEST_FILE: &str = "artifact.json";

/// Where a VisAsset can come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    /// `visassets/<uuid>/` under the media root
    Media,
    /// A remote VisAsset library
    Http,
    /// Defined inline by the current state
    Local,
}

/// A source of VisAssets
pub trait VisAssetFetcher: Send + Sync {
    /// Fetch and decode one VisAsset
    fn fetch(&self, uuid: Uuid) -> VisAssetResult<VisAsset>;

    fn source(&self) -> FetchSource;

    /// VisAssets this source can enumerate
    fn list(&self) -> VisAssetResult<Vec<Uuid>> {
        Ok(Vec::new())
    }
}

/// VisAssets stored under `<media>/visassets/<uuid>/`
#[derive(Debug, Clone)]
pub struct MediaDirectoryFetcher {
    root: PathBuf,
}

impl MediaDirectoryFetcher {
    /// `root` is the `visassets` directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn asset_dir(&self, uuid: Uuid) -> PathBuf {
        self.root.join(uuid.to_string())
    }

    /// Write a manifest and its payload files
    pub fn save(&self, uuid: Uuid, manifest: &Manifest, files: &HashMap<String, Vec<u8>>) -> VisAssetResult<()> {
        let dir = self.asset_dir(uuid);
        let io = |e: std::io::Error| VisAssetError::Fetch(format!("{}: {}", dir.display(), e));
        std::fs::create_dir_all(&dir).map_err(io)?;

        let mut manifest = manifest.clone();
        manifest.uuid = Some(uuid);
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| VisAssetError::InvalidManifest(e.to_string()))?;
        std::fs::write(dir.join(MANIFEST_FILE), json).map_err(io)?;

        for (name, contents) in files {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io)?;
            }
            std::fs::write(path, contents).map_err(io)?;
        }
        Ok(())
    }
}

impl VisAssetFetcher for MediaDirectoryFetcher {
    fn fetch(&self, uuid: Uuid) -> VisAssetResult<VisAsset> {
        let dir = self.asset_dir(uuid);
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(VisAssetError::NotFound(uuid));
        }
        let json = std::fs::read_to_string(&manifest_path)
            .map_err(|e| VisAssetError::Fetch(e.to_string()))?;
        let manifest = Manifest::from_json(&json)?;

        let read = |file: &str| {
            std::fs::read(dir.join(file)).map_err(|_| VisAssetError::MissingFile {
                uuid,
                file: file.to_string(),
            })
        };
        VisAsset::decode(uuid, &manifest, &read)
    }

    fn source(&self) -> FetchSource {
        FetchSource::Media
    }

    fn list(&self) -> VisAssetResult<Vec<Uuid>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.root).map_err(|e| VisAssetError::Fetch(e.to_string()))?;
        let mut uuids: Vec<Uuid> = entries
            .flatten()
            .filter(|e| e.path().join(MANIFEST_FILE).exists())
            .filter_map(|e| Uuid::parse_str(&e.file_name().to_string_lossy()).ok())
            .collect();
        uuids.sort();
        Ok(uuids)
    }
}

/// VisAssets downloaded from a remote library (`<base>/visassets/<uuid>/...`)
#[cfg(feature = "http")]
pub struct HttpFetcher {
    base_url: String,
    client: reqwest::blocking::Client,
    cancel: abr_io::CancellationToken,
    cache: Option<MediaDirectoryFetcher>,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> VisAssetResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VisAssetError::Fetch(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            cancel: abr_io::CancellationToken::new(),
            cache: None,
        })
    }

    /// Save downloaded VisAssets into a media directory
    pub fn with_cache(mut self, cache: MediaDirectoryFetcher) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cancellation(mut self, cancel: abr_io::CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn get(&self, uuid: Uuid, file: &str) -> VisAssetResult<Vec<u8>> {
        use std::io::Read;

        self.cancel
            .check()
            .map_err(|e| VisAssetError::Fetch(e.to_string()))?;
        let url = format!("{}/visassets/{}/{}", self.base_url, uuid, file);
        let mut response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| VisAssetError::Fetch(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(VisAssetError::MissingFile {
                uuid,
                file: file.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(VisAssetError::Fetch(format!("{} returned {}", url, response.status())));
        }

        let mut body = Vec::new();
        let mut chunk = [0u8; 64 * 1024];
        loop {
            self.cancel
                .check()
                .map_err(|e| VisAssetError::Fetch(e.to_string()))?;
            let n = response
                .read(&mut chunk)
                .map_err(|e| VisAssetError::Fetch(e.to_string()))?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        Ok(body)
    }
}

#[cfg(feature = "http")]
impl VisAssetFetcher for HttpFetcher {
    fn fetch(&self, uuid: Uuid) -> VisAssetResult<VisAsset> {
        let manifest = match self.get(uuid, MANIFEST_FILE) {
            Ok(bytes) => Manifest::from_json(&String::from_utf8_lossy(&bytes))?,
            Err(VisAssetError::MissingFile { .. }) => return Err(VisAssetError::NotFound(uuid)),
            Err(e) => return Err(e),
        };

        let mut files = HashMap::new();
        for file in manifest.files() {
            match self.get(uuid, &file) {
                Ok(bytes) => {
                    files.insert(file, bytes);
                }
                // Previews are optional
                Err(e) if manifest.preview.as_deref() == Some(file.as_str()) => {
                    tracing::debug!("No preview for {}: {}", uuid, e);
                }
                Err(e) => return Err(e),
            }
        }

        let read = |file: &str| {
            files.get(file).cloned().ok_or_else(|| VisAssetError::MissingFile {
                uuid,
                file: file.to_string(),
            })
        };
        let asset = VisAsset::decode(uuid, &manifest, &read)?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(uuid, &manifest, &files) {
                tracing::warn!("Could not cache VisAsset {}: {}", uuid, e);
            }
        }
        tracing::info!("Downloaded VisAsset {} from {}", uuid, self.base_url);
        Ok(asset)
    }

    fn source(&self) -> FetchSource {
        FetchSource::Http
    }
}

/// One VisAsset defined inline
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedVisAsset {
    pub manifest: Manifest,
    pub files: HashMap<String, Vec<u8>>,
}

/// VisAssets defined by the state itself (its `localVisAssets`)
#[derive(Debug, Default)]
pub struct EmbeddedFetcher {
    entries: RwLock<HashMap<Uuid, EmbeddedVisAsset>>,
}

impl EmbeddedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an inline VisAsset; returns true when it replaced a different one
    pub fn insert(&self, uuid: Uuid, manifest: Manifest, files: HashMap<String, Vec<u8>>) -> bool {
        let entry = EmbeddedVisAsset { manifest, files };
        match self.entries.write() {
            Ok(mut entries) => entries
                .insert(uuid, entry.clone())
                .map(|old| old != entry)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn remove(&self, uuid: &Uuid) -> bool {
        self.entries
            .write()
            .map(|mut e| e.remove(uuid).is_some())
            .unwrap_or(false)
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(uuid))
            .unwrap_or(false)
    }

    pub fn uuids(&self) -> Vec<Uuid> {
        self.entries
            .read()
            .map(|e| e.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl VisAssetFetcher for EmbeddedFetcher {
    fn fetch(&self, uuid: Uuid) -> VisAssetResult<VisAsset> {
        let entries = self
            .entries
            .read()
            .map_err(|e| VisAssetError::Fetch(format!("Lock poisoned: {}", e)))?;
        let entry = entries.get(&uuid).ok_or(VisAssetError::NotFound(uuid))?;
        let read = |file: &str| {
            entry.files.get(file).cloned().ok_or_else(|| VisAssetError::MissingFile {
                uuid,
                file: file.to_string(),
            })
        };
        VisAsset::decode(uuid, &entry.manifest, &read)
    }

    fn source(&self) -> FetchSource {
        FetchSource::Local
    }

    fn list(&self) -> VisAssetResult<Vec<Uuid>> {
        let mut uuids = self.uuids();
        uuids.sort();
        Ok(uuids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visasset::VisAssetType;

    const XML: &str = r#"<ColorMaps><ColorMap><Point x="0" r="0" g="0" b="1"/><Point x="1" r="1" g="0" b="0"/></ColorMap></ColorMaps>"#;

    fn colormap_manifest() -> Manifest {
        Manifest::from_json(r#"{"type": "colormap", "artifactData": {"colormap": "colormap.xml"}}"#)
            .unwrap()
    }

    #[test]
    fn test_media_directory_save_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MediaDirectoryFetcher::new(dir.path());
        let uuid = Uuid::new_v4();
        let files = HashMap::from([("colormap.xml".to_string(), XML.as_bytes().to_vec())]);
        fetcher.save(uuid, &colormap_manifest(), &files).unwrap();

        let asset = fetcher.fetch(uuid).unwrap();
        assert_eq!(asset.asset_type(), VisAssetType::Colormap);
        assert_eq!(fetcher.list().unwrap(), vec![uuid]);
        assert!(matches!(
            fetcher.fetch(Uuid::new_v4()),
            Err(VisAssetError::NotFound(_))
        ));
    }

    #[test]
    fn test_embedded_fetcher_reports_changes() {
        let fetcher = EmbeddedFetcher::new();
        let uuid = Uuid::new_v4();
        let files = HashMap::from([("colormap.xml".to_string(), XML.as_bytes().to_vec())]);
        assert!(!fetcher.insert(uuid, colormap_manifest(), files.clone()));
        assert!(!fetcher.insert(uuid, colormap_manifest(), files));
        let edited = HashMap::from([(
            "colormap.xml".to_string(),
            XML.replace("b=\"1\"", "b=\"0.5\"").into_bytes(),
        )]);
        assert!(fetcher.insert(uuid, colormap_manifest(), edited));
        assert!(fetcher.fetch(uuid).is_ok());
        assert!(fetcher.remove(&uuid));
        assert!(fetcher.fetch(uuid).is_err());
    }
}
