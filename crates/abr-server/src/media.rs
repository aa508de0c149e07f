//! Media directory access: VisAsset and dataset listings, histograms,
//! local VisAsset export and thumbnails

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use abr_core::visasset::{Colormap, Manifest, MANIFEST_FILE};
use abr_io::{DataLoader, FileDataLoader, Histogram, DEFAULT_BINS};
use base64::Engine as _;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data error: {0}")]
    Data(#[from] abr_io::IoError),
}

pub type MediaResult<T> = Result<T, MediaError>;

/// Preview size written next to a saved colormap
const PREVIEW_SIZE: (u32, u32) = (200, 30);

/// Names of the entries of a directory, sorted; a missing directory is empty
fn sorted_entries(dir: &Path) -> MediaResult<Vec<(String, PathBuf)>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(|n| (n.to_string(), e.path())))
        .collect();
    out.sort();
    Ok(out)
}

/// Every VisAsset manifest under `visassets_dir`, keyed by directory name
pub fn list_visassets(visassets_dir: &Path) -> MediaResult<Map<String, Value>> {
    let mut manifests = Map::new();
    for (name, path) in sorted_entries(visassets_dir)? {
        let manifest_path = path.join(MANIFEST_FILE);
        let Ok(text) = std::fs::read_to_string(&manifest_path) else {
            continue;
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(manifest) => {
                manifests.insert(name, manifest);
            }
            Err(e) => tracing::warn!("Skipping {}: {}", manifest_path.display(), e),
        }
    }
    Ok(manifests)
}

/// Key data headers as `{org: {dataset: {keyData: header}}}`
pub fn list_datasets(datasets_dir: &Path) -> MediaResult<Value> {
    let mut orgs = Map::new();
    for (org, org_path) in sorted_entries(datasets_dir)? {
        if !org_path.is_dir() {
            continue;
        }
        let mut datasets = Map::new();
        for (dataset, dataset_path) in sorted_entries(&org_path)? {
            let key_data_dir = dataset_path.join("KeyData");
            if !key_data_dir.is_dir() {
                continue;
            }
            let mut key_data = Map::new();
            for (file, file_path) in sorted_entries(&key_data_dir)? {
                let Some(stem) = file.strip_suffix(".json") else {
                    continue;
                };
                match std::fs::read_to_string(&file_path).map(|t| serde_json::from_str::<Value>(&t)) {
                    Ok(Ok(header)) => {
                        key_data.insert(stem.to_string(), header);
                    }
                    _ => tracing::warn!("Skipping unreadable header {}", file_path.display()),
                }
            }
            datasets.insert(dataset, Value::Object(key_data));
        }
        orgs.insert(org, Value::Object(datasets));
    }
    Ok(Value::Object(orgs))
}

/// Histogram of one variable of one key data object on disk
pub fn histogram(media_root: &Path, key_data_path: &str, variable: &str, range: Option<(f32, f32)>) -> MediaResult<Histogram> {
    let raw = FileDataLoader::new(media_root).try_load(key_data_path)?;
    if raw.scalar(variable).is_none() {
        return Err(MediaError::Invalid(format!("No variable named {}", variable)));
    }
    Ok(raw.histogram(variable, DEFAULT_BINS, range)?)
}

/// Write a state-local VisAsset into the library under a fresh UUID
///
/// `local` is a `localVisAssets` entry: `artifactJson` plus
/// `artifactDataContents` (file name to text content). Colormaps also get a
/// `thumbnail.png` preview.
pub fn save_local_visasset(visassets_dir: &Path, local: &Value) -> MediaResult<Uuid> {
    let artifact = local
        .get("artifactJson")
        .cloned()
        .ok_or_else(|| MediaError::Invalid("missing artifactJson".to_string()))?;
    let mut manifest = Manifest::from_value(artifact).map_err(|e| MediaError::Invalid(e.to_string()))?;
    let contents: BTreeMap<String, String> = local
        .get("artifactDataContents")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| MediaError::Invalid(e.to_string()))?
        .unwrap_or_default();

    let uuid = Uuid::new_v4();
    manifest.uuid = Some(uuid);
    let dir = visassets_dir.join(uuid.to_string());
    std::fs::create_dir_all(&dir)?;
    let manifest_json = serde_json::to_string_pretty(&manifest).map_err(|e| MediaError::Invalid(e.to_string()))?;
    std::fs::write(dir.join(MANIFEST_FILE), manifest_json)?;
    for (file, text) in &contents {
        if file.contains('/') || file.contains("..") {
            return Err(MediaError::Invalid(format!("bad file name {}", file)));
        }
        std::fs::write(dir.join(file), text)?;
    }

    if manifest.asset_type == "colormap" {
        let xml = contents
            .get("colormap.xml")
            .ok_or_else(|| MediaError::Invalid("colormap without colormap.xml".to_string()))?;
        let colormap = Colormap::from_xml(xml).map_err(|e| MediaError::Invalid(e.to_string()))?;
        write_colormap_preview(&colormap, &dir.join("thumbnail.png"))?;
    }
    tracing::info!("Saved local VisAsset as {}", uuid);
    Ok(uuid)
}

fn write_colormap_preview(colormap: &Colormap, path: &Path) -> MediaResult<()> {
    let (width, height) = PREVIEW_SIZE;
    let row = colormap.generate_texture(width as usize);
    let pixels: Vec<u8> = (0..height).flat_map(|_| row.iter().copied()).collect();
    image::save_buffer(path, &pixels, width, height, image::ExtendedColorType::Rgba8)
        .map_err(|e| MediaError::Invalid(e.to_string()))
}

/// Delete a VisAsset directory; returns false when it did not exist
pub fn remove_visasset(visassets_dir: &Path, uuid: &str) -> MediaResult<bool> {
    let uuid = Uuid::parse_str(uuid).map_err(|e| MediaError::Invalid(e.to_string()))?;
    let dir = visassets_dir.join(uuid.to_string());
    if !dir.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(dir)?;
    Ok(true)
}

/// Decode a base64 PNG and store it under `name`
pub fn store_thumbnail(thumbnails_dir: &Path, name: &str, content: &str) -> MediaResult<()> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(content.trim())
        .map_err(|e| MediaError::Invalid(e.to_string()))?;
    std::fs::create_dir_all(thumbnails_dir)?;
    std::fs::write(thumbnails_dir.join(name), bytes)?;
    Ok(())
}

/// Save a state as `<name>.json`, copying the latest thumbnail beside it when present
pub fn save_state(states_dir: &Path, thumbnails_dir: &Path, name: &str, state: &Value) -> MediaResult<()> {
    let name = state_stem(name)?;
    std::fs::create_dir_all(states_dir)?;
    let text = serde_json::to_string_pretty(state).map_err(|e| MediaError::Invalid(e.to_string()))?;
    std::fs::write(states_dir.join(format!("{}.json", name)), text)?;

    let latest = thumbnails_dir.join(crate::config::LATEST_THUMBNAIL);
    if latest.exists() {
        std::fs::copy(&latest, thumbnails_dir.join(format!("{}.png", name)))?;
    }
    tracing::info!("Saved state {}", name);
    Ok(())
}

pub fn load_state(states_dir: &Path, name: &str) -> MediaResult<Value> {
    let name = state_stem(name)?;
    let path = states_dir.join(format!("{}.json", name));
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(MediaError::NotFound(name.to_string())),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&text).map_err(|e| MediaError::Invalid(e.to_string()))
}

/// Delete a saved state and its thumbnail
pub fn delete_state(states_dir: &Path, thumbnails_dir: &Path, name: &str) -> MediaResult<()> {
    let name = state_stem(name)?;
    let path = states_dir.join(format!("{}.json", name));
    if !path.exists() {
        return Err(MediaError::NotFound(name.to_string()));
    }
    std::fs::remove_file(path)?;
    let thumbnail = thumbnails_dir.join(format!("{}.png", name));
    if thumbnail.exists() {
        std::fs::remove_file(thumbnail)?;
    }
    Ok(())
}

/// Names of every saved state
pub fn list_states(states_dir: &Path) -> MediaResult<Vec<String>> {
    Ok(sorted_entries(states_dir)?
        .into_iter()
        .filter_map(|(file, _)| file.strip_suffix(".json").map(str::to_string))
        .collect())
}

/// Path of a thumbnail, `None` when it does not exist
pub fn thumbnail_path(thumbnails_dir: &Path, name: &str) -> MediaResult<Option<PathBuf>> {
    let name = checked_name(name)?;
    let file = if name.ends_with(".png") { name.to_string() } else { format!("{}.png", name) };
    let path = thumbnails_dir.join(file);
    Ok(path.exists().then_some(path))
}

/// Saved state names may be given with or without `.json`
fn state_stem(name: &str) -> MediaResult<&str> {
    Ok(checked_name(name)?.trim_end_matches(".json"))
}

/// File name inside a flat directory, rejecting anything that could escape it
pub fn checked_name(name: &str) -> MediaResult<&str> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(MediaError::Invalid(format!("bad name {}", name)));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use abr_io::{MeshTopology, RawDataset};
    use serde_json::json;

    #[test]
    fn test_listings() {
        let dir = tempfile::tempdir().unwrap();
        let raw = RawDataset::builder(MeshTopology::Points)
            .vertices(vec![[0.0; 3], [1.0; 3]])
            .scalar("T", vec![1.0, 3.0])
            .build()
            .unwrap();
        FileDataLoader::new(dir.path()).save("Org/DS/KeyData/pts", &raw).unwrap();

        let datasets = list_datasets(&dir.path().join("datasets")).unwrap();
        assert_eq!(datasets["Org"]["DS"]["pts"]["num_points"], 2);
        assert!(list_visassets(&dir.path().join("visassets")).unwrap().is_empty());

        let hist = histogram(dir.path(), "Org/DS/KeyData/pts", "T", Some((0.0, 10.0))).unwrap();
        assert_eq!(hist.key_data_min, 1.0);
        assert_eq!(hist.histogram.first().unwrap().bin_max, 0.0);
        assert!(matches!(
            histogram(dir.path(), "Org/DS/KeyData/pts", "nope", None),
            Err(MediaError::Invalid(_))
        ));
    }

    #[test]
    fn test_save_local_colormap() {
        let dir = tempfile::tempdir().unwrap();
        let local = json!({
            "artifactJson": {"type": "colormap", "artifactData": {"colormap": "colormap.xml"}},
            "artifactDataContents": {
                "colormap.xml": "<ColorMaps><ColorMap><Point x=\"0\" r=\"0\" g=\"0\" b=\"0\"/><Point x=\"1\" r=\"1\" g=\"1\" b=\"1\"/></ColorMap></ColorMaps>"
            }
        });
        let uuid = save_local_visasset(dir.path(), &local).unwrap();
        let listed = list_visassets(dir.path()).unwrap();
        assert_eq!(listed[&uuid.to_string()]["uuid"], uuid.to_string());
        assert!(dir.path().join(uuid.to_string()).join("thumbnail.png").exists());

        assert!(remove_visasset(dir.path(), &uuid.to_string()).unwrap());
        assert!(!remove_visasset(dir.path(), &uuid.to_string()).unwrap());
    }

    #[test]
    fn test_thumbnail_and_names() {
        let dir = tempfile::tempdir().unwrap();
        store_thumbnail(dir.path(), "t.png", "iVBORw0KGgo=").unwrap();
        assert_eq!(std::fs::read(dir.path().join("t.png")).unwrap()[1..4], *b"PNG");
        assert!(store_thumbnail(dir.path(), "t.png", "!!!").is_err());
        assert!(checked_name("../etc").is_err());
        assert_eq!(checked_name("demo.json").unwrap(), "demo.json");
    }

    #[test]
    fn test_saved_states() {
        let dir = tempfile::tempdir().unwrap();
        let states = dir.path().join("states");
        let thumbnails = dir.path().join("thumbnails");
        store_thumbnail(&thumbnails, crate::config::LATEST_THUMBNAIL, "iVBORw0KGgo=").unwrap();

        let state = json!({"version": "0.2.0", "name": "demo"});
        save_state(&states, &thumbnails, "demo", &state).unwrap();
        assert_eq!(list_states(&states).unwrap(), vec!["demo"]);
        assert_eq!(load_state(&states, "demo").unwrap(), state);
        assert_eq!(load_state(&states, "demo.json").unwrap(), state);
        assert!(thumbnail_path(&thumbnails, "demo").unwrap().is_some());

        delete_state(&states, &thumbnails, "demo").unwrap();
        assert!(list_states(&states).unwrap().is_empty());
        assert!(thumbnail_path(&thumbnails, "demo").unwrap().is_none());
        assert!(matches!(load_state(&states, "demo"), Err(MediaError::NotFound(_))));
    }
}
