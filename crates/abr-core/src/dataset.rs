//! Datasets, data variables and key data handles
//!
//! A `Dataset` is a coordinate-space container. Every key data object and
//! every variable whose path starts with the same `Organization/Dataset`
//! prefix belongs to it. Variables are views over all raw datasets that
//! carry an array of the variable's name; their ranges widen as more key
//! data is imported unless the state has customized them.

use std::collections::{BTreeMap, HashMap};

use abr_io::data_path;
use abr_io::{Bounds, MeshTopology, RawDataset, ScalarArray};
use serde::{Deserialize, Serialize};

/// Inclusive value range of a variable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataRange {
    pub min: f32,
    pub max: f32,
}

impl DataRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Range covering both `self` and `other`
    pub fn union(&self, other: &DataRange) -> DataRange {
        DataRange::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    /// Map a value into 0..1, clamped; degenerate ranges map to 0
    pub fn normalize(&self, value: f32) -> f32 {
        let span = self.span();
        if span <= 0.0 || !value.is_finite() {
            return 0.0;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }
}

impl From<&ScalarArray> for DataRange {
    fn from(array: &ScalarArray) -> Self {
        DataRange::new(array.min, array.max)
    }
}

/// A scalar variable, identified by its `.../ScalarVar/<name>` path
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarDataVariable {
    path: String,
    range: DataRange,
    original_range: DataRange,
    specific_ranges: HashMap<String, DataRange>,
    customized: bool,
}

impl ScalarDataVariable {
    pub fn new(path: impl Into<String>, range: DataRange) -> Self {
        Self {
            path: path.into(),
            range,
            original_range: range,
            specific_ranges: HashMap::new(),
            customized: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Short name, matching array names in raw datasets
    pub fn name(&self) -> &str {
        data_path::name(&self.path).unwrap_or(&self.path)
    }

    pub fn range(&self) -> DataRange {
        self.range
    }

    /// Range computed from imported data, ignoring overrides
    pub fn original_range(&self) -> DataRange {
        self.original_range
    }

    pub fn is_customized(&self) -> bool {
        self.customized
    }

    /// Grow the range to include newly imported data
    ///
    /// The pristine range always grows; the current range only grows while
    /// the variable is not customized.
    pub fn widen(&mut self, imported: DataRange) {
        self.original_range = self.original_range.union(&imported);
        if !self.customized {
            self.range = self.original_range;
        }
    }

    /// Override the global range and freeze auto-widening
    pub fn set_range(&mut self, range: DataRange) {
        self.range = range;
        self.customized = true;
    }

    /// Override the range used for one key data object
    pub fn set_specific_range(&mut self, key_data_path: impl Into<String>, range: DataRange) {
        self.specific_ranges.insert(key_data_path.into(), range);
        self.customized = true;
    }

    pub fn specific_range(&self, key_data_path: &str) -> Option<DataRange> {
        self.specific_ranges.get(key_data_path).copied()
    }

    pub fn specific_ranges(&self) -> &HashMap<String, DataRange> {
        &self.specific_ranges
    }

    /// The range that applies to a key data object
    pub fn range_for(&self, key_data_path: &str) -> DataRange {
        self.specific_range(key_data_path).unwrap_or(self.range)
    }

    /// Drop every override and resume auto-widening
    pub fn reset(&mut self) {
        self.range = self.original_range;
        self.specific_ranges.clear();
        self.customized = false;
    }

    /// Whether a raw dataset carries this variable's array
    pub fn belongs_to(&self, raw: &RawDataset) -> bool {
        raw.scalar(self.name()).is_some()
    }
}

/// A vector variable, identified by its `.../VectorVar/<name>` path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorDataVariable {
    path: String,
}

impl VectorDataVariable {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        data_path::name(&self.path).unwrap_or(&self.path)
    }

    pub fn belongs_to(&self, raw: &RawDataset) -> bool {
        raw.vector(self.name()).is_some()
    }
}

/// Geometric family of a key data object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyDataKind {
    Point,
    Line,
    Surface,
    Volume,
}

impl KeyDataKind {
    pub fn from_topology(topology: MeshTopology) -> Self {
        match topology {
            MeshTopology::Points => KeyDataKind::Point,
            MeshTopology::Lines | MeshTopology::LineStrip => KeyDataKind::Line,
            MeshTopology::Triangles | MeshTopology::Quads => KeyDataKind::Surface,
            MeshTopology::Voxels => KeyDataKind::Volume,
        }
    }
}

/// Handle to a key data object; the geometry itself lives in the data manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyData {
    path: String,
    kind: KeyDataKind,
}

impl KeyData {
    pub fn new(path: impl Into<String>, kind: KeyDataKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> KeyDataKind {
        self.kind
    }

    pub fn dataset_path(&self) -> Option<String> {
        data_path::dataset_path(&self.path)
    }
}

/// Uniform scale plus offset that places data into a container
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataTransform {
    pub scale: f32,
    pub data_center: [f32; 3],
    pub container_center: [f32; 3],
}

impl DataTransform {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            data_center: [0.0; 3],
            container_center: [0.0; 3],
        }
    }

    /// Fit `data` inside `container`, preserving aspect ratio
    pub fn fit(data: &Bounds, container: &Bounds) -> Self {
        let data_size = data.size();
        let container_size = container.size();
        let scale = (0..3)
            .filter(|&i| data_size[i] > 0.0)
            .map(|i| container_size[i] / data_size[i])
            .fold(f32::INFINITY, f32::min);
        Self {
            scale: if scale.is_finite() { scale } else { 1.0 },
            data_center: data.center.to_array(),
            container_center: container.center.to_array(),
        }
    }

    pub fn apply(&self, p: [f32; 3]) -> [f32; 3] {
        [
            (p[0] - self.data_center[0]) * self.scale + self.container_center[0],
            (p[1] - self.data_center[1]) * self.scale + self.container_center[1],
            (p[2] - self.data_center[2]) * self.scale + self.container_center[2],
        ]
    }
}

/// A coordinate-space container for key data and variables
#[derive(Debug, Clone)]
pub struct Dataset {
    path: String,
    container_bounds: Bounds,
    data_bounds: Option<Bounds>,
    key_data: BTreeMap<String, KeyData>,
    key_data_bounds: HashMap<String, Bounds>,
    scalar_variables: BTreeMap<String, ScalarDataVariable>,
    vector_variables: BTreeMap<String, VectorDataVariable>,
}

impl Dataset {
    pub fn new(path: impl Into<String>, container_bounds: Bounds) -> Self {
        Self {
            path: path.into(),
            container_bounds,
            data_bounds: None,
            key_data: BTreeMap::new(),
            key_data_bounds: HashMap::new(),
            scalar_variables: BTreeMap::new(),
            vector_variables: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn container_bounds(&self) -> Bounds {
        self.container_bounds
    }

    pub fn set_container_bounds(&mut self, bounds: Bounds) {
        self.container_bounds = bounds;
    }

    /// Union of the bounds of all owned key data
    pub fn data_bounds(&self) -> Option<Bounds> {
        self.data_bounds
    }

    /// Placement of this dataset's data into its container
    pub fn transform(&self) -> DataTransform {
        self.data_bounds
            .map(|b| DataTransform::fit(&b, &self.container_bounds))
            .unwrap_or_else(DataTransform::identity)
    }

    /// Add or replace a key data handle
    pub fn add_key_data(&mut self, key_data: KeyData, bounds: Bounds) {
        self.key_data_bounds
            .insert(key_data.path().to_string(), bounds);
        self.key_data.insert(key_data.path().to_string(), key_data);
        self.recompute_bounds();
    }

    pub fn remove_key_data(&mut self, path: &str) -> bool {
        self.key_data_bounds.remove(path);
        let removed = self.key_data.remove(path).is_some();
        if removed {
            self.recompute_bounds();
        }
        removed
    }

    fn recompute_bounds(&mut self) {
        let mut bounds: Option<Bounds> = None;
        for b in self.key_data_bounds.values() {
            match bounds.as_mut() {
                Some(acc) => acc.encapsulate(b),
                None => bounds = Some(*b),
            }
        }
        self.data_bounds = bounds;
    }

    pub fn key_data(&self) -> impl Iterator<Item = &KeyData> {
        self.key_data.values()
    }

    pub fn key_data_count(&self) -> usize {
        self.key_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_data.is_empty()
    }

    pub fn get_key_data(&self, path: &str) -> Option<&KeyData> {
        self.key_data.get(path)
    }

    pub fn scalar_variables(&self) -> impl Iterator<Item = &ScalarDataVariable> {
        self.scalar_variables.values()
    }

    pub fn scalar_variables_mut(&mut self) -> impl Iterator<Item = &mut ScalarDataVariable> {
        self.scalar_variables.values_mut()
    }

    pub fn vector_variables(&self) -> impl Iterator<Item = &VectorDataVariable> {
        self.vector_variables.values()
    }

    pub fn scalar_variable(&self, path: &str) -> Option<&ScalarDataVariable> {
        self.scalar_variables.get(path)
    }

    pub fn scalar_variable_mut(&mut self, path: &str) -> Option<&mut ScalarDataVariable> {
        self.scalar_variables.get_mut(path)
    }

    pub fn vector_variable(&self, path: &str) -> Option<&VectorDataVariable> {
        self.vector_variables.get(path)
    }

    /// Get or create a scalar variable, widening its range with `range`
    pub fn import_scalar(&mut self, path: String, range: DataRange) -> &ScalarDataVariable {
        let variable = self
            .scalar_variables
            .entry(path)
            .and_modify(|v| v.widen(range))
            .or_insert_with_key(|path| ScalarDataVariable::new(path.clone(), range));
        &*variable
    }

    pub fn import_vector(&mut self, path: String) {
        self.vector_variables
            .entry(path)
            .or_insert_with_key(|path| VectorDataVariable::new(path.clone()));
    }
}
