//! Render pass
//!
//! Four sweeps over every registered impression, each finished for all
//! impressions before the next starts:
//!
//! 1. place each impression's dataset into its group's container
//! 2. build per-key-data geometry for impressions whose data changed
//! 3. build per-impression render info (variables, VisAssets, primitives)
//! 4. push render info to the host object mapped to each impression
//!
//! The host itself sits behind [`RenderHost`]; the engine never touches a
//! scene graph directly.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use abr_io::{Bounds, MeshTopology, RawDataset};
use serde::Serialize;
use uuid::Uuid;

use crate::data_manager::DataManager;
use crate::dataset::DataTransform;
use crate::error::{RenderError, RenderResult};
use crate::impression::{DataImpression, DirtyFlags, ImpressionKind, RenderHints};
use crate::indexer::{self, COLORMAP, COLOR_VARIABLE};
use crate::input::{AbrInput, InputType};
use crate::primitive::Primitive;
use crate::scene::{Light, Scene};
use crate::visasset::{vertex_normals, Color, VisAsset, VisAssetGradient, VisAssetManager, VisAssetType};

/// Samples taken from an opacity primitive gradient
pub const OPACITY_SAMPLES: usize = 256;

/// Handle of a host-side rendered object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectId(pub u64);

/// The 3D host the engine renders into
pub trait RenderHost: Send {
    fn create_object(&mut self, impression: Uuid, kind: ImpressionKind, name: &str) -> RenderResult<ObjectId>;

    fn destroy_object(&mut self, object: ObjectId);

    /// Update an object; `hints` says what changed since the last apply
    fn apply(&mut self, object: ObjectId, info: &RenderInfo, hints: &RenderHints) -> RenderResult<()>;

    fn set_background(&mut self, _color: Color) {}

    fn set_lights(&mut self, _lights: &[Light]) {}
}

/// Key data geometry in container space
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Points {
        positions: Vec<[f32; 3]>,
    },
    Lines {
        positions: Vec<[f32; 3]>,
        /// Vertex indices of each polyline
        polylines: Vec<Vec<u32>>,
    },
    Surface {
        positions: Vec<[f32; 3]>,
        normals: Vec<[f32; 3]>,
        indices: Vec<u32>,
    },
    Volume {
        dimensions: [usize; 3],
        bounds: Bounds,
    },
}

impl Geometry {
    /// Build geometry from raw key data, placed with `transform`
    pub fn build(path: &str, raw: &RawDataset, transform: &DataTransform) -> RenderResult<Self> {
        let invalid = |message: String| RenderError::Geometry {
            path: path.to_string(),
            message,
        };
        let positions: Vec<[f32; 3]> = raw.vertices().iter().map(|v| transform.apply(*v)).collect();
        let index = |i: i32| -> RenderResult<u32> {
            if i < 0 || i as usize >= positions.len() {
                Err(invalid(format!("index {} out of {} vertices", i, positions.len())))
            } else {
                Ok(i as u32)
            }
        };

        Ok(match raw.topology() {
            MeshTopology::Points => Geometry::Points { positions },
            MeshTopology::Lines | MeshTopology::LineStrip => {
                let mut polylines = Vec::with_capacity(raw.num_cells());
                for cell in 0..raw.num_cells() {
                    let indices = raw.cell(cell).unwrap_or(&[]);
                    polylines.push(indices.iter().map(|&i| index(i)).collect::<RenderResult<Vec<_>>>()?);
                }
                Geometry::Lines { positions, polylines }
            }
            MeshTopology::Triangles | MeshTopology::Quads => {
                let mut indices = Vec::new();
                for cell in 0..raw.num_cells() {
                    let corners = raw.cell(cell).unwrap_or(&[]);
                    for k in 1..corners.len().saturating_sub(1) {
                        indices.push(index(corners[0])?);
                        indices.push(index(corners[k])?);
                        indices.push(index(corners[k + 1])?);
                    }
                }
                let normals = vertex_normals(&positions, &indices);
                Geometry::Surface {
                    positions,
                    normals,
                    indices,
                }
            }
            MeshTopology::Voxels => {
                let dimensions = raw
                    .dimensions()
                    .ok_or_else(|| invalid("voxel key data without dimensions".to_string()))?;
                let b = raw.bounds();
                let (min, max) = (transform.apply(b.min()), transform.apply(b.max()));
                Geometry::Volume {
                    dimensions,
                    bounds: Bounds::from_min_max(min, max),
                }
            }
        })
    }

    pub fn vertex_count(&self) -> usize {
        match self {
            Geometry::Points { positions } | Geometry::Lines { positions, .. } | Geometry::Surface { positions, .. } => {
                positions.len()
            }
            Geometry::Volume { dimensions, .. } => dimensions.iter().product(),
        }
    }
}

/// Everything the host needs to draw one impression
#[derive(Debug, Clone, PartialEq)]
pub struct RenderInfo {
    pub kind: ImpressionKind,
    pub key_data: String,
    pub geometry: Arc<Geometry>,
    pub visible: bool,
    /// Subset of vertices to draw (glyph density); `None` draws all
    pub vertex_mask: Option<Vec<u32>>,
    /// Per-vertex scalar values normalized to 0..1, by slot
    pub scalars: BTreeMap<&'static str, Vec<f32>>,
    pub vectors: BTreeMap<&'static str, Vec<[f32; 3]>>,
    pub colormap: Arc<VisAsset>,
    /// VisAsset slots other than the colormap, defaults filled in
    pub visassets: BTreeMap<&'static str, Arc<VisAsset>>,
    pub gradients: BTreeMap<&'static str, Arc<VisAssetGradient>>,
    pub primitives: BTreeMap<&'static str, Primitive>,
    /// Opacity transfer function, sampled over 0..1
    pub opacity: Option<Vec<f32>>,
}

/// Outcome of one render pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderReport {
    pub rendered: Vec<Uuid>,
    /// Impressions without key data, left alone
    pub skipped: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

/// Rendered-object mapping plus per-impression caches
#[derive(Default)]
pub struct Renderer {
    objects: HashMap<Uuid, ObjectId>,
    geometry: HashMap<Uuid, Arc<Geometry>>,
    infos: HashMap<Uuid, RenderInfo>,
    /// Visibility last pushed to each host object
    shown: HashMap<Uuid, bool>,
}

/// Mutable pieces of the engine a render pass works on
pub struct RenderContext<'a> {
    pub impressions: &'a mut BTreeMap<Uuid, DataImpression>,
    pub data: &'a mut DataManager,
    pub visassets: &'a VisAssetManager,
    pub scene: &'a Scene,
    pub host: &'a mut dyn RenderHost,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, impression: &Uuid) -> Option<ObjectId> {
        self.objects.get(impression).copied()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn render_info(&self, impression: &Uuid) -> Option<&RenderInfo> {
        self.infos.get(impression)
    }

    /// Destroy an impression's object and caches
    pub fn destroy(&mut self, impression: &Uuid, host: &mut dyn RenderHost) -> bool {
        self.geometry.remove(impression);
        self.infos.remove(impression);
        self.shown.remove(impression);
        match self.objects.remove(impression) {
            Some(object) => {
                host.destroy_object(object);
                tracing::debug!("Destroyed object {:?} for impression {}", object, impression);
                true
            }
            None => false,
        }
    }

    pub fn destroy_all(&mut self, host: &mut dyn RenderHost) {
        let uuids: Vec<Uuid> = self.objects.keys().copied().collect();
        for uuid in uuids {
            self.destroy(&uuid, host);
        }
        self.geometry.clear();
        self.infos.clear();
    }

    /// Run the four sweeps; failures are logged per impression
    pub fn render(&mut self, ctx: RenderContext<'_>) -> RenderReport {
        let RenderContext {
            impressions,
            data,
            visassets,
            scene,
            host,
        } = ctx;
        let mut report = RenderReport::default();
        let mut failed: HashMap<Uuid, String> = HashMap::new();

        let stale: Vec<Uuid> = self
            .objects
            .keys()
            .filter(|uuid| !impressions.contains_key(uuid))
            .copied()
            .collect();
        for uuid in stale {
            self.destroy(&uuid, host);
        }

        host.set_background(scene.background());
        host.set_lights(scene.lights());

        // 1. container placement
        for impression in impressions.values_mut() {
            let Some(kd) = impression.key_data() else { continue };
            let Some(group) = scene.group_of(&impression.uuid()) else { continue };
            let container = group.container_bounds;
            let path = kd.path().to_string();
            if let Some(dataset) = data.dataset_for_mut(&path) {
                if dataset.container_bounds() != container {
                    dataset.set_container_bounds(container);
                    impression.mark(DirtyFlags::DATA_CHANGED);
                }
            }
        }

        // 2. per-key-data geometry
        for impression in impressions.values() {
            let uuid = impression.uuid();
            let Some(kd) = impression.key_data() else {
                report.skipped.push(uuid);
                continue;
            };
            if !impression.hints.data_changed() && self.geometry.contains_key(&uuid) {
                continue;
            }
            match build_key_data_geometry(data, kd.path()) {
                Ok(geometry) => {
                    self.geometry.insert(uuid, Arc::new(geometry));
                }
                Err(e) => {
                    tracing::error!("Geometry for impression {} failed: {}", uuid, e);
                    failed.insert(uuid, e.to_string());
                }
            }
        }

        // 3. per-impression render info
        for impression in impressions.values() {
            let uuid = impression.uuid();
            if failed.contains_key(&uuid) || impression.key_data().is_none() {
                continue;
            }
            let cached = self.infos.get(&uuid);
            let needs_info = impression.hints.data_changed() || impression.hints.style_changed() || cached.is_none();
            if !needs_info {
                if let Some(info) = self.infos.get_mut(&uuid) {
                    info.visible = impression.hints.visible;
                }
                continue;
            }
            let Some(geometry) = self.geometry.get(&uuid).cloned() else {
                failed.insert(uuid, RenderError::MissingKeyData(uuid.to_string()).to_string());
                continue;
            };
            match build_render_info(impression, geometry, data, visassets) {
                Ok(info) => {
                    self.infos.insert(uuid, info);
                }
                Err(e) => {
                    tracing::error!("Render info for impression {} failed: {}", uuid, e);
                    failed.insert(uuid, e.to_string());
                }
            }
        }

        // 4. push to host objects
        for impression in impressions.values_mut() {
            let uuid = impression.uuid();
            if failed.contains_key(&uuid) {
                continue;
            }
            let Some(info) = self.infos.get(&uuid) else { continue };
            let object = match self.objects.get(&uuid) {
                Some(object) => *object,
                None => match host.create_object(uuid, impression.kind(), &impression.name) {
                    Ok(object) => {
                        self.objects.insert(uuid, object);
                        object
                    }
                    Err(e) => {
                        tracing::error!("Could not create object for impression {}: {}", uuid, e);
                        failed.insert(uuid, e.to_string());
                        continue;
                    }
                },
            };
            if self.shown.get(&uuid).map_or(false, |shown| *shown != info.visible) {
                impression.hints.flags.insert(DirtyFlags::VISIBILITY_CHANGED);
            }
            if impression.hints.is_clean() {
                continue;
            }
            match host.apply(object, info, &impression.hints) {
                Ok(()) => {
                    self.shown.insert(uuid, info.visible);
                    impression.hints.clear();
                    report.rendered.push(uuid);
                }
                Err(e) => {
                    tracing::error!("Host rejected impression {}: {}", uuid, e);
                    failed.insert(uuid, e.to_string());
                }
            }
        }

        let mut failed: Vec<(Uuid, String)> = failed.into_iter().collect();
        failed.sort();
        report.failed = failed;
        report
    }
}

fn build_key_data_geometry(data: &DataManager, path: &str) -> RenderResult<Geometry> {
    let raw = data
        .raw_dataset(path)
        .ok_or_else(|| RenderError::MissingKeyData(path.to_string()))?;
    let transform = data
        .dataset_for(path)
        .map(|ds| ds.transform())
        .unwrap_or_else(DataTransform::identity);
    Geometry::build(path, &raw, &transform)
}

fn build_render_info(
    impression: &DataImpression,
    geometry: Arc<Geometry>,
    data: &DataManager,
    visassets: &VisAssetManager,
) -> RenderResult<RenderInfo> {
    let kd_path = impression
        .key_data()
        .map(|kd| kd.path().to_string())
        .ok_or_else(|| RenderError::MissingKeyData(impression.uuid().to_string()))?;
    let raw = data
        .raw_dataset(&kd_path)
        .ok_or_else(|| RenderError::MissingKeyData(kd_path.clone()))?;

    let mut info = RenderInfo {
        kind: impression.kind(),
        key_data: kd_path.clone(),
        geometry,
        visible: impression.hints.visible,
        vertex_mask: None,
        scalars: BTreeMap::new(),
        vectors: BTreeMap::new(),
        colormap: visassets.default_asset(VisAssetType::Colormap),
        visassets: BTreeMap::new(),
        gradients: BTreeMap::new(),
        primitives: BTreeMap::new(),
        opacity: None,
    };

    for slot in indexer::input_slots(impression.kind()) {
        let input = impression.input(slot.name);
        match (slot.input_type, input) {
            (_, Some(AbrInput::ScalarVariable(path))) => {
                let variable = data
                    .scalar_variable(path)
                    .ok_or_else(|| RenderError::Geometry {
                        path: kd_path.clone(),
                        message: format!("variable {} is not loaded", path),
                    })?;
                let array = raw.scalar(variable.name()).ok_or_else(|| RenderError::Geometry {
                    path: kd_path.clone(),
                    message: format!("no scalar array {}", variable.name()),
                })?;
                let range = variable.range_for(&kd_path);
                info.scalars
                    .insert(slot.name, array.values.iter().map(|v| range.normalize(*v)).collect());
            }
            (_, Some(AbrInput::VectorVariable(path))) => {
                let name = abr_io::data_path::name(path).unwrap_or(path);
                let array = raw.vector(name).ok_or_else(|| RenderError::Geometry {
                    path: kd_path.clone(),
                    message: format!("no vector array {}", name),
                })?;
                info.vectors.insert(slot.name, array.values.clone());
            }
            (_, Some(AbrInput::VisAsset(asset))) if slot.name == COLORMAP => {
                info.colormap = Arc::clone(asset);
            }
            (_, Some(AbrInput::VisAsset(asset))) => {
                info.visassets.insert(slot.name, Arc::clone(asset));
            }
            (InputType::VisAsset(asset_type), Some(AbrInput::Gradient(gradient))) => {
                info.gradients.insert(slot.name, Arc::clone(gradient));
                if let Some(first) = gradient.members.first() {
                    info.visassets
                        .insert(slot.name, visassets.load_or_default(*first, asset_type));
                }
            }
            (_, Some(AbrInput::Primitive(p))) => {
                info.primitives.insert(slot.name, *p);
            }
            (_, Some(AbrInput::PrimitiveGradient(g))) => {
                info.opacity = Some(g.sample_fractions(OPACITY_SAMPLES));
            }
            (InputType::VisAsset(asset_type), None) if slot.name != COLORMAP => {
                info.visassets.insert(slot.name, visassets.default_asset(asset_type));
            }
            _ => {}
        }
    }

    if !info.scalars.contains_key(COLOR_VARIABLE) {
        tracing::trace!("Impression {} has no color variable", impression.uuid());
    }

    match impression.kind() {
        ImpressionKind::Glyphs => {
            if let Some(density) = info.primitives.get("Glyph Density") {
                info.vertex_mask = Some(density_mask(info.geometry.vertex_count(), density.fraction()));
            }
        }
        ImpressionKind::Ribbons => {
            let iterations = info
                .primitives
                .get("Ribbon Smooth")
                .map(|p| p.value().max(0.0) as usize)
                .unwrap_or(0);
            if iterations > 0 {
                if let Geometry::Lines { positions, polylines } = info.geometry.as_ref() {
                    info.geometry = Arc::new(Geometry::Lines {
                        positions: smooth_polylines(positions, polylines, iterations),
                        polylines: polylines.clone(),
                    });
                }
            }
        }
        ImpressionKind::Surfaces | ImpressionKind::Volumes => {}
    }

    Ok(info)
}

/// Evenly spaced subset covering `fraction` of `count` vertices
pub fn density_mask(count: usize, fraction: f32) -> Vec<u32> {
    let fraction = fraction.clamp(0.0, 1.0);
    let keep = (count as f32 * fraction).round() as usize;
    if keep == 0 {
        return Vec::new();
    }
    let step = count as f32 / keep as f32;
    (0..keep).map(|i| (i as f32 * step) as u32).collect()
}

/// Laplacian smoothing along each polyline; endpoints stay fixed
pub fn smooth_polylines(positions: &[[f32; 3]], polylines: &[Vec<u32>], iterations: usize) -> Vec<[f32; 3]> {
    let mut out = positions.to_vec();
    for _ in 0..iterations {
        let current = out.clone();
        for line in polylines {
            for w in line.windows(3) {
                let (a, b, c) = (current[w[0] as usize], current[w[1] as usize], current[w[2] as usize]);
                out[w[1] as usize] = [
                    (a[0] + 2.0 * b[0] + c[0]) / 4.0,
                    (a[1] + 2.0 * b[1] + c[1]) / 4.0,
                    (a[2] + 2.0 * b[2] + c[2]) / 4.0,
                ];
            }
        }
    }
    out
}

/// Render host that keeps objects in memory
///
/// Used by the headless app; it records what each object last received.
#[derive(Debug, Default)]
pub struct HeadlessHost {
    next_id: u64,
    objects: BTreeMap<ObjectId, HeadlessObject>,
    background: Option<Color>,
    light_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadlessObject {
    pub impression: Uuid,
    pub kind: ImpressionKind,
    pub name: String,
    pub vertex_count: usize,
    pub visible: bool,
    pub updates: usize,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn objects(&self) -> impl Iterator<Item = (&ObjectId, &HeadlessObject)> {
        self.objects.iter()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn background(&self) -> Option<Color> {
        self.background
    }

    pub fn light_count(&self) -> usize {
        self.light_count
    }
}

impl RenderHost for HeadlessHost {
    fn create_object(&mut self, impression: Uuid, kind: ImpressionKind, name: &str) -> RenderResult<ObjectId> {
        self.next_id += 1;
        let id = ObjectId(self.next_id);
        self.objects.insert(
            id,
            HeadlessObject {
                impression,
                kind,
                name: name.to_string(),
                vertex_count: 0,
                visible: true,
                updates: 0,
            },
        );
        Ok(id)
    }

    fn destroy_object(&mut self, object: ObjectId) {
        self.objects.remove(&object);
    }

    fn apply(&mut self, object: ObjectId, info: &RenderInfo, _hints: &RenderHints) -> RenderResult<()> {
        let entry = self
            .objects
            .get_mut(&object)
            .ok_or_else(|| RenderError::Host(format!("unknown object {:?}", object)))?;
        entry.vertex_count = info.geometry.vertex_count();
        entry.visible = info.visible;
        entry.updates += 1;
        Ok(())
    }

    fn set_background(&mut self, color: Color) {
        self.background = Some(color);
    }

    fn set_lights(&mut self, lights: &[Light]) {
        self.light_count = lights.len();
    }
}
