//! Dataset registry
//!
//! The `DataManager` owns every imported `RawDataset` (keyed by key-data
//! path) and the `Dataset` registry built from them. Loading goes through a
//! chain of `DataLoader`s; the first loader that succeeds wins.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use abr_io::data_path::{self, DataPathType};
use abr_io::{Bounds, DataLoader, RawDataset};

use crate::dataset::{DataRange, Dataset, KeyData, KeyDataKind, ScalarDataVariable, VectorDataVariable};
use crate::error::{DataError, DataResult};

/// A shared, thread-safe data loader
pub type SharedLoader = Arc<dyn DataLoader>;

/// Fetch a raw dataset from the first loader that has it
///
/// Free function so worker threads can prefetch without touching the
/// registry.
pub fn fetch_raw_dataset(loaders: &[SharedLoader], key_data_path: &str) -> DataResult<RawDataset> {
    if !data_path::follows_convention(key_data_path, DataPathType::KeyData) {
        return Err(DataError::InvalidPath(key_data_path.to_string()));
    }
    for loader in loaders {
        match loader.try_load(key_data_path) {
            Ok(raw) => {
                tracing::debug!("Loaded {} via {} loader", key_data_path, loader.name());
                return Ok(raw);
            }
            Err(e) => {
                tracing::debug!("{} loader could not load {}: {}", loader.name(), key_data_path, e);
            }
        }
    }
    Err(DataError::NotFound(key_data_path.to_string()))
}

/// Registry of datasets and their raw key data
pub struct DataManager {
    datasets: BTreeMap<String, Dataset>,
    raw: HashMap<String, Arc<RawDataset>>,
    loaders: Vec<SharedLoader>,
    default_bounds: Bounds,
}

impl DataManager {
    /// Create a manager; new datasets are placed into `default_bounds`
    pub fn new(default_bounds: Bounds) -> Self {
        Self {
            datasets: BTreeMap::new(),
            raw: HashMap::new(),
            loaders: Vec::new(),
            default_bounds,
        }
    }

    /// Append a loader to the chain
    pub fn add_loader(&mut self, loader: SharedLoader) {
        self.loaders.push(loader);
    }

    pub fn loaders(&self) -> &[SharedLoader] {
        &self.loaders
    }

    pub fn default_bounds(&self) -> Bounds {
        self.default_bounds
    }

    /// Import a raw dataset under a key-data path
    ///
    /// Creates the dataset on first use, registers the raw data, creates or
    /// widens every variable it carries and adds a typed key data handle.
    /// Re-importing the same path replaces the raw data in place.
    pub fn import_raw_dataset(&mut self, key_data_path: &str, raw: Arc<RawDataset>) -> DataResult<()> {
        if !data_path::follows_convention(key_data_path, DataPathType::KeyData) {
            return Err(DataError::InvalidPath(key_data_path.to_string()));
        }
        let dataset_path = data_path::dataset_path(key_data_path)
            .ok_or_else(|| DataError::InvalidPath(key_data_path.to_string()))?;

        let default_bounds = self.default_bounds;
        let dataset = self
            .datasets
            .entry(dataset_path.clone())
            .or_insert_with(|| {
                tracing::info!("Created dataset {}", dataset_path);
                Dataset::new(dataset_path.clone(), default_bounds)
            });

        for scalar in raw.scalars() {
            let path = data_path::join_typed(&dataset_path, DataPathType::ScalarVar, &scalar.name);
            dataset.import_scalar(path, DataRange::from(scalar));
        }
        for vector in raw.vectors() {
            let path = data_path::join_typed(&dataset_path, DataPathType::VectorVar, &vector.name);
            dataset.import_vector(path);
        }

        let kind = KeyDataKind::from_topology(raw.topology());
        dataset.add_key_data(KeyData::new(key_data_path, kind), raw.bounds());

        tracing::info!(
            "Imported {} ({}, {} points, {} cells)",
            key_data_path,
            raw.topology(),
            raw.num_points(),
            raw.num_cells()
        );
        self.raw.insert(key_data_path.to_string(), raw);
        Ok(())
    }

    /// Return resident key data, loading and importing it if needed
    pub fn load_key_data(&mut self, key_data_path: &str) -> DataResult<Arc<RawDataset>> {
        if let Some(raw) = self.raw.get(key_data_path) {
            return Ok(Arc::clone(raw));
        }
        let raw = Arc::new(fetch_raw_dataset(&self.loaders, key_data_path)?);
        self.import_raw_dataset(key_data_path, Arc::clone(&raw))?;
        Ok(raw)
    }

    /// Remove one key data object; drops its dataset when it was the last
    pub fn remove_key_data(&mut self, key_data_path: &str) -> bool {
        let removed = self.raw.remove(key_data_path).is_some();
        if let Some(dataset_path) = data_path::dataset_path(key_data_path) {
            let now_empty = self
                .datasets
                .get_mut(&dataset_path)
                .map(|ds| {
                    ds.remove_key_data(key_data_path);
                    ds.is_empty()
                })
                .unwrap_or(false);
            if now_empty {
                self.datasets.remove(&dataset_path);
                tracing::info!("Removed empty dataset {}", dataset_path);
            }
        }
        removed
    }

    pub fn is_resident(&self, key_data_path: &str) -> bool {
        self.raw.contains_key(key_data_path)
    }

    pub fn raw_dataset(&self, key_data_path: &str) -> Option<Arc<RawDataset>> {
        self.raw.get(key_data_path).cloned()
    }

    pub fn datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets.values()
    }

    pub fn datasets_mut(&mut self) -> impl Iterator<Item = &mut Dataset> {
        self.datasets.values_mut()
    }

    /// Dataset owning any path (dataset, key data or variable)
    pub fn dataset_for(&self, path: &str) -> Option<&Dataset> {
        let dataset_path = data_path::dataset_path(path)?;
        self.datasets.get(&dataset_path)
    }

    pub fn dataset_for_mut(&mut self, path: &str) -> Option<&mut Dataset> {
        let dataset_path = data_path::dataset_path(path)?;
        self.datasets.get_mut(&dataset_path)
    }

    pub fn key_data(&self, key_data_path: &str) -> Option<&KeyData> {
        self.dataset_for(key_data_path)?.get_key_data(key_data_path)
    }

    pub fn scalar_variable(&self, path: &str) -> Option<&ScalarDataVariable> {
        self.dataset_for(path)?.scalar_variable(path)
    }

    pub fn scalar_variable_mut(&mut self, path: &str) -> Option<&mut ScalarDataVariable> {
        self.dataset_for_mut(path)?.scalar_variable_mut(path)
    }

    pub fn vector_variable(&self, path: &str) -> Option<&VectorDataVariable> {
        self.dataset_for(path)?.vector_variable(path)
    }

    /// Every scalar variable across all datasets
    pub fn scalar_variables_mut(&mut self) -> impl Iterator<Item = &mut ScalarDataVariable> {
        self.datasets
            .values_mut()
            .flat_map(|ds| ds.scalar_variables_mut())
    }

    /// Key-data paths the loaders can provide
    pub fn available_key_data(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .loaders
            .iter()
            .filter_map(|loader| match loader.list() {
                Ok(paths) => Some(paths),
                Err(e) => {
                    tracing::warn!("{} loader could not list key data: {}", loader.name(), e);
                    None
                }
            })
            .flatten()
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// Drop every dataset and raw dataset
    pub fn clear(&mut self) {
        self.datasets.clear();
        self.raw.clear();
    }
}

impl Default for DataManager {
    fn default() -> Self {
        Self::new(Bounds::from_min_max([-1.0; 3], [1.0; 3]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abr_io::{MemoryDataLoader, MeshTopology};

    fn points(values: Vec<f32>) -> Arc<RawDataset> {
        Arc::new(
            RawDataset::builder(MeshTopology::Points)
                .vertices((0..values.len()).map(|i| [i as f32, 0.0, 0.0]).collect())
                .scalar("temperature", values)
                .vector("velocity", vec![[0.0, 1.0, 0.0]; 2])
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_import_creates_dataset_and_variables() {
        let mut dm = DataManager::default();
        dm.import_raw_dataset("Org/DS/KeyData/a", points(vec![1.0, 3.0]))
            .unwrap();

        let ds = dm.dataset_for("Org/DS").unwrap();
        assert_eq!(ds.key_data_count(), 1);
        let t = dm.scalar_variable("Org/DS/ScalarVar/temperature").unwrap();
        assert_eq!(t.range(), DataRange::new(1.0, 3.0));
        assert!(dm.vector_variable("Org/DS/VectorVar/velocity").is_some());
        assert_eq!(
            dm.key_data("Org/DS/KeyData/a").unwrap().kind(),
            KeyDataKind::Point
        );
    }

    #[test]
    fn test_reimport_is_idempotent() {
        let mut dm = DataManager::default();
        let raw = points(vec![1.0, 3.0]);
        dm.import_raw_dataset("Org/DS/KeyData/a", Arc::clone(&raw))
            .unwrap();
        dm.import_raw_dataset("Org/DS/KeyData/a", raw).unwrap();

        assert_eq!(dm.datasets().count(), 1);
        assert_eq!(dm.dataset_for("Org/DS").unwrap().key_data_count(), 1);
        assert_eq!(
            dm.scalar_variable("Org/DS/ScalarVar/temperature")
                .unwrap()
                .range(),
            DataRange::new(1.0, 3.0)
        );
    }

    #[test]
    fn test_invalid_path_rejected() {
        let mut dm = DataManager::default();
        assert!(matches!(
            dm.import_raw_dataset("Org/DS/ScalarVar/a", points(vec![1.0, 2.0])),
            Err(DataError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_load_through_loader_chain() {
        let memory = Arc::new(MemoryDataLoader::new());
        memory.insert("Org/DS/KeyData/a", &points(vec![0.0, 1.0]));

        let mut dm = DataManager::default();
        dm.add_loader(memory);
        assert!(!dm.is_resident("Org/DS/KeyData/a"));
        let raw = dm.load_key_data("Org/DS/KeyData/a").unwrap();
        assert_eq!(raw.num_points(), 2);
        assert!(dm.is_resident("Org/DS/KeyData/a"));
        assert!(matches!(
            dm.load_key_data("Org/DS/KeyData/missing"),
            Err(DataError::NotFound(_))
        ));
        assert_eq!(dm.available_key_data(), vec!["Org/DS/KeyData/a"]);
    }

    #[test]
    fn test_remove_last_key_data_drops_dataset() {
        let mut dm = DataManager::default();
        dm.import_raw_dataset("Org/DS/KeyData/a", points(vec![1.0, 2.0]))
            .unwrap();
        assert!(dm.remove_key_data("Org/DS/KeyData/a"));
        assert!(dm.dataset_for("Org/DS").is_none());
    }
}
