//! VisAssets: reusable visual encodings addressed by UUID
//!
//! Every VisAsset lives in its own directory (`visassets/<uuid>/`) with an
//! `artifact.json` manifest and type-specific payload files:
//!
//! | type       | `artifactData`                                        |
//! |------------|-------------------------------------------------------|
//! | `colormap` | `{"colormap": "colormap.xml"}`                        |
//! | `glyph`    | `{"lods": [{"mesh": "...obj", "normalMap": "...png"}]}` |
//! | `texture`  | `{"texture": "...png", "normalMap": "...png"}`        |
//! | `line`     | `{"texture": "...png", "normalMap": "...png"}`        |

mod colormap;
mod fetch;
mod glyph;
mod gradient;
mod manager;

pub use colormap::{Color, Colormap, Lab, DEFAULT_TEXTURE_WIDTH};
pub use fetch::{
    EmbeddedFetcher, FetchSource, MediaDirectoryFetcher, VisAssetFetcher, MANIFEST_FILE,
};
#[cfg(feature = "http")]
pub use fetch::HttpFetcher;
pub use glyph::{vertex_normals, Glyph, GlyphLod, Mesh, PatternTexture, Texture};
pub use gradient::{GradientSample, GradientScale, VisAssetGradient};
pub use manager::VisAssetManager;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{VisAssetError, VisAssetResult};

/// Kind of VisAsset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VisAssetType {
    Colormap,
    Glyph,
    SurfaceTexture,
    LineTexture,
}

impl VisAssetType {
    /// `type` value in `artifact.json`
    pub fn manifest_name(&self) -> &'static str {
        match self {
            VisAssetType::Colormap => "colormap",
            VisAssetType::Glyph => "glyph",
            VisAssetType::SurfaceTexture => "texture",
            VisAssetType::LineTexture => "line",
        }
    }

    pub fn from_manifest_name(name: &str) -> VisAssetResult<Self> {
        match name {
            "colormap" => Ok(VisAssetType::Colormap),
            "glyph" => Ok(VisAssetType::Glyph),
            "texture" => Ok(VisAssetType::SurfaceTexture),
            "line" => Ok(VisAssetType::LineTexture),
            other => Err(VisAssetError::UnsupportedType(other.to_string())),
        }
    }
}

impl fmt::Display for VisAssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_name())
    }
}

/// `artifact.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(rename = "type")]
    pub asset_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub artifact_data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl Manifest {
    pub fn from_json(json: &str) -> VisAssetResult<Self> {
        serde_json::from_str(json).map_err(|e| VisAssetError::InvalidManifest(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> VisAssetResult<Self> {
        serde_json::from_value(value).map_err(|e| VisAssetError::InvalidManifest(e.to_string()))
    }

    pub fn visasset_type(&self) -> VisAssetResult<VisAssetType> {
        VisAssetType::from_manifest_name(&self.asset_type)
    }

    /// Every payload file the manifest references, preview included
    pub fn files(&self) -> Vec<String> {
        fn collect(value: &serde_json::Value, out: &mut Vec<String>) {
            match value {
                serde_json::Value::String(s) => out.push(s.clone()),
                serde_json::Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
                serde_json::Value::Object(map) => map.values().for_each(|v| collect(v, out)),
                _ => {}
            }
        }
        let mut files = Vec::new();
        collect(&self.artifact_data, &mut files);
        files.extend(self.preview.iter().cloned());
        files
    }

    fn data_str(&self, key: &str) -> Option<&str> {
        self.artifact_data.get(key).and_then(|v| v.as_str())
    }
}

/// Decoded payload of a VisAsset
#[derive(Debug, Clone, PartialEq)]
pub enum VisAssetData {
    Colormap(Colormap),
    Glyph(Glyph),
    SurfaceTexture(PatternTexture),
    LineTexture(PatternTexture),
}

/// An immutable, decoded VisAsset
#[derive(Debug, Clone, PartialEq)]
pub struct VisAsset {
    uuid: Uuid,
    name: Option<String>,
    data: VisAssetData,
}

impl VisAsset {
    pub fn new(uuid: Uuid, name: Option<String>, data: VisAssetData) -> Self {
        Self { uuid, name, data }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn data(&self) -> &VisAssetData {
        &self.data
    }

    pub fn asset_type(&self) -> VisAssetType {
        match self.data {
            VisAssetData::Colormap(_) => VisAssetType::Colormap,
            VisAssetData::Glyph(_) => VisAssetType::Glyph,
            VisAssetData::SurfaceTexture(_) => VisAssetType::SurfaceTexture,
            VisAssetData::LineTexture(_) => VisAssetType::LineTexture,
        }
    }

    pub fn as_colormap(&self) -> Option<&Colormap> {
        match &self.data {
            VisAssetData::Colormap(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_glyph(&self) -> Option<&Glyph> {
        match &self.data {
            VisAssetData::Glyph(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_texture(&self) -> Option<&PatternTexture> {
        match &self.data {
            VisAssetData::SurfaceTexture(t) | VisAssetData::LineTexture(t) => Some(t),
            _ => None,
        }
    }

    /// Decode a VisAsset from its manifest, reading payload files with `read`
    pub fn decode(
        uuid: Uuid,
        manifest: &Manifest,
        read: &dyn Fn(&str) -> VisAssetResult<Vec<u8>>,
    ) -> VisAssetResult<Self> {
        let asset_type = manifest.visasset_type()?;
        let required = |key: &str| {
            manifest
                .data_str(key)
                .ok_or_else(|| VisAssetError::InvalidManifest(format!("artifactData.{} missing", key)))
        };

        let data = match asset_type {
            VisAssetType::Colormap => {
                let file = required("colormap")?;
                let xml = read(file)?;
                VisAssetData::Colormap(Colormap::from_xml(&String::from_utf8_lossy(&xml))?)
            }
            VisAssetType::Glyph => {
                let lods = manifest
                    .artifact_data
                    .get("lods")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| VisAssetError::InvalidManifest("artifactData.lods missing".to_string()))?;
                let mut decoded = Vec::with_capacity(lods.len());
                for lod in lods {
                    let mesh_file = lod.get("mesh").and_then(|v| v.as_str()).ok_or_else(|| {
                        VisAssetError::InvalidManifest("glyph LOD without mesh".to_string())
                    })?;
                    let mesh = Mesh::from_obj(&String::from_utf8_lossy(&read(mesh_file)?))?;
                    let normal_map = match lod.get("normalMap").and_then(|v| v.as_str()) {
                        Some(file) => Some(Texture::from_png(&read(file)?, file)?),
                        None => None,
                    };
                    decoded.push(GlyphLod { mesh, normal_map });
                }
                if decoded.is_empty() {
                    return Err(VisAssetError::InvalidManifest("glyph has no LODs".to_string()));
                }
                VisAssetData::Glyph(Glyph { lods: decoded })
            }
            VisAssetType::SurfaceTexture | VisAssetType::LineTexture => {
                let file = required("texture")?;
                let texture = Texture::from_png(&read(file)?, file)?;
                let normal_map = match manifest.data_str("normalMap") {
                    Some(file) => Some(Texture::from_png(&read(file)?, file)?),
                    None => None,
                };
                let pattern = PatternTexture { texture, normal_map };
                if asset_type == VisAssetType::SurfaceTexture {
                    VisAssetData::SurfaceTexture(pattern)
                } else {
                    VisAssetData::LineTexture(pattern)
                }
            }
        };

        Ok(Self::new(uuid, manifest.name.clone(), data))
    }

    /// Fallback asset used when nothing is bound or a fetch failed
    pub fn default_for(asset_type: VisAssetType) -> Self {
        let data = match asset_type {
            VisAssetType::Colormap => VisAssetData::Colormap(Colormap::grayscale()),
            VisAssetType::Glyph => VisAssetData::Glyph(Glyph::octahedron()),
            VisAssetType::SurfaceTexture => VisAssetData::SurfaceTexture(PatternTexture {
                texture: Texture::solid([255; 4]),
                normal_map: None,
            }),
            VisAssetType::LineTexture => VisAssetData::LineTexture(PatternTexture {
                texture: Texture::solid([255; 4]),
                normal_map: None,
            }),
        };
        Self::new(Uuid::nil(), Some("default".to_string()), data)
    }
}
