//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use abr_core::render::RenderInfo;
use abr_core::visasset::{EmbeddedFetcher, Manifest};
use abr_core::{
    Color, DataManager, DirtyFlags, Engine, EngineConfig, ImpressionKind, Light, ObjectId, RenderHints, RenderHost,
    VisAssetManager,
};
use abr_core::error::RenderResult;
use abr_io::{MemoryDataLoader, MeshTopology, RawDataset};
use serde_json::{json, Value};
use uuid::Uuid;

pub const POINTS: &str = "Test/Ocean/KeyData/Floats";
pub const SURFACE: &str = "Test/Ocean/KeyData/Seafloor";
pub const TEMPERATURE: &str = "Test/Ocean/ScalarVar/Temperature";

pub const GLYPHS_A: &str = "a0000000-0000-4000-8000-000000000001";
pub const GLYPHS_B: &str = "a0000000-0000-4000-8000-000000000002";
pub const SURFACE_C: &str = "a0000000-0000-4000-8000-000000000003";

pub const COLORMAP_RED: &str = "c0000000-0000-4000-8000-000000000001";
pub const COLORMAP_BLUE: &str = "c0000000-0000-4000-8000-000000000002";
pub const COLORMAP_MISSING: &str = "c0000000-0000-4000-8000-0000000000ff";

pub fn uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap()
}

/// What the engine asked the host to do
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Created { impression: Uuid, object: ObjectId },
    Destroyed(ObjectId),
    Applied { object: ObjectId, flags: DirtyFlags, visible: bool },
    Background(Color),
    Lights(usize),
}

/// Render host that logs every call
#[derive(Clone, Default)]
pub struct RecordingHost {
    next_id: u64,
    pub log: Arc<Mutex<Vec<HostEvent>>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderHost for RecordingHost {
    fn create_object(&mut self, impression: Uuid, _kind: ImpressionKind, _name: &str) -> RenderResult<ObjectId> {
        self.next_id += 1;
        let object = ObjectId(self.next_id);
        self.log.lock().unwrap().push(HostEvent::Created { impression, object });
        Ok(object)
    }

    fn destroy_object(&mut self, object: ObjectId) {
        self.log.lock().unwrap().push(HostEvent::Destroyed(object));
    }

    fn apply(&mut self, object: ObjectId, info: &RenderInfo, hints: &RenderHints) -> RenderResult<()> {
        self.log.lock().unwrap().push(HostEvent::Applied {
            object,
            flags: hints.flags,
            visible: info.visible,
        });
        Ok(())
    }

    fn set_background(&mut self, color: Color) {
        self.log.lock().unwrap().push(HostEvent::Background(color));
    }

    fn set_lights(&mut self, lights: &[Light]) {
        self.log.lock().unwrap().push(HostEvent::Lights(lights.len()));
    }
}

pub fn colormap_xml(r: f32, b: f32) -> String {
    format!(
        r#"<ColorMaps><ColorMap><Point x="0" r="0" g="0" b="0"/><Point x="1" r="{}" g="0" b="{}"/></ColorMap></ColorMaps>"#,
        r, b
    )
}

fn colormap_manifest() -> Manifest {
    Manifest::from_value(json!({"type": "colormap", "artifactData": {"colormap": "colormap.xml"}})).unwrap()
}

pub fn points() -> RawDataset {
    RawDataset::builder(MeshTopology::Points)
        .vertices(vec![[0.0, 0.0, 0.0], [1.0, 2.0, 3.0], [2.0, 4.0, 6.0]])
        .scalar("Temperature", vec![4.0, 12.0, 20.0])
        .build()
        .unwrap()
}

pub fn surface() -> RawDataset {
    RawDataset::builder(MeshTopology::Triangles)
        .vertices(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
        .cell(&[0, 1, 2])
        .scalar("Temperature", vec![0.0, 1.0, 2.0])
        .build()
        .unwrap()
}

/// Host call log of a test engine; owns the engine's scratch media root
pub struct HostLog {
    events: Arc<Mutex<Vec<HostEvent>>>,
    media: tempfile::TempDir,
}

/// Engine backed by in-memory key data and colormaps, plus its host log
pub fn engine() -> (Engine, HostLog) {
    let memory = MemoryDataLoader::new();
    memory.insert(POINTS, &points());
    memory.insert(SURFACE, &surface());
    let mut data = DataManager::default();
    data.add_loader(Arc::new(memory));

    let embedded = EmbeddedFetcher::new();
    for (id, xml) in [(COLORMAP_RED, colormap_xml(1.0, 0.0)), (COLORMAP_BLUE, colormap_xml(0.0, 1.0))] {
        let files = HashMap::from([("colormap.xml".to_string(), xml.into_bytes())]);
        embedded.insert(uuid(id), colormap_manifest(), files);
    }
    let mut visassets = VisAssetManager::new();
    visassets.add_fetcher(Arc::new(embedded));

    let host = RecordingHost::new();
    let media = tempfile::tempdir().unwrap();
    let log = HostLog {
        events: Arc::clone(&host.log),
        media,
    };
    let mut config = EngineConfig::with_media_root(log.media.path());
    config.render_on_apply = false;
    let engine = Engine::with_parts(config, data, Arc::new(visassets), Box::new(host));
    (engine, log)
}

pub fn glyphs(key_data: &str, colormap: &str, size: &str) -> Value {
    json!({
        "plateType": "Glyphs",
        "name": "floats",
        "inputValues": {
            "Key Data": {"inputType": "KeyData", "inputValue": key_data, "inputGenre": "KeyData"},
            "Color Variable": {"inputType": "ScalarDataVariable", "inputValue": TEMPERATURE, "inputGenre": "Variable"},
            "Colormap": {"inputType": "ColormapVisAsset", "inputValue": colormap, "inputGenre": "VisAsset"},
            "Glyph Size": {"inputType": "LengthPrimitive", "inputValue": size, "inputGenre": "Primitive"}
        }
    })
}

pub fn surface_impression(colormap: &str) -> Value {
    json!({
        "plateType": "Surfaces",
        "name": "seafloor",
        "inputValues": {
            "Key Data": {"inputType": "KeyData", "inputValue": SURFACE, "inputGenre": "KeyData"},
            "Color Variable": {"inputType": "ScalarDataVariable", "inputValue": TEMPERATURE, "inputGenre": "Variable"},
            "Colormap": {"inputType": "ColormapVisAsset", "inputValue": colormap, "inputGenre": "VisAsset"}
        }
    })
}

/// State with the given impressions
pub fn state(impressions: &[(&str, Value)]) -> String {
    let map: serde_json::Map<String, Value> = impressions
        .iter()
        .map(|(id, imp)| (id.to_string(), imp.clone()))
        .collect();
    json!({"version": "0.2.0", "impressions": map}).to_string()
}

pub fn two_glyphs(colormap_a: &str) -> String {
    state(&[
        (GLYPHS_A, glyphs(POINTS, colormap_a, "0.1m")),
        (GLYPHS_B, glyphs(POINTS, COLORMAP_RED, "0.2m")),
    ])
}

pub fn events(log: &HostLog) -> Vec<HostEvent> {
    log.events.lock().unwrap().clone()
}

pub fn clear_log(log: &HostLog) {
    log.events.lock().unwrap().clear();
}
