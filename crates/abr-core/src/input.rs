//! Impression inputs
//!
//! On the wire every input is a flat `{inputType, inputValue, inputGenre}`
//! triple (`RawAbrInput`). Inside the engine it is resolved into an
//! `AbrInput` that holds the live key data handle, variable path, VisAsset
//! or primitive. `AbrInput::to_raw` goes back to the wire form.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use abr_io::data_path::{self, DataPathType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data_manager::DataManager;
use crate::dataset::KeyData;
use crate::error::{InputError, InputResult};
use crate::primitive::{Primitive, PrimitiveGradient, PrimitiveKind};
use crate::visasset::{VisAsset, VisAssetGradient, VisAssetManager, VisAssetType};

/// Broad category of an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputGenre {
    KeyData,
    Variable,
    VisAsset,
    Primitive,
    PrimitiveGradient,
}

/// Concrete type of an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    KeyData,
    ScalarVariable,
    VectorVariable,
    VisAsset(VisAssetType),
    Gradient(VisAssetType),
    Primitive(PrimitiveKind),
    PrimitiveGradient,
}

impl InputType {
    /// `inputType` string on the wire
    pub fn wire_name(&self) -> &'static str {
        match self {
            InputType::KeyData => "KeyData",
            InputType::ScalarVariable => "ScalarDataVariable",
            InputType::VectorVariable => "VectorDataVariable",
            InputType::VisAsset(VisAssetType::Colormap) => "ColormapVisAsset",
            InputType::VisAsset(VisAssetType::Glyph) => "GlyphVisAsset",
            InputType::VisAsset(VisAssetType::SurfaceTexture) => "SurfaceTextureVisAsset",
            InputType::VisAsset(VisAssetType::LineTexture) => "LineTextureVisAsset",
            InputType::Gradient(VisAssetType::Colormap) => "ColormapGradient",
            InputType::Gradient(VisAssetType::Glyph) => "GlyphGradient",
            InputType::Gradient(VisAssetType::SurfaceTexture) => "SurfaceTextureGradient",
            InputType::Gradient(VisAssetType::LineTexture) => "LineTextureGradient",
            InputType::Primitive(PrimitiveKind::Length) => "LengthPrimitive",
            InputType::Primitive(PrimitiveKind::Percent) => "PercentPrimitive",
            InputType::Primitive(PrimitiveKind::Angle) => "AnglePrimitive",
            InputType::Primitive(PrimitiveKind::Integer) => "IntegerPrimitive",
            InputType::Primitive(PrimitiveKind::Float) => "FloatPrimitive",
            InputType::Primitive(PrimitiveKind::Boolean) => "BooleanPrimitive",
            InputType::PrimitiveGradient => "PrimitiveGradient",
        }
    }

    /// Parse an `inputType` string; a dotted namespace prefix is ignored
    pub fn parse(s: &str) -> InputResult<Self> {
        let short = s.rsplit('.').next().unwrap_or(s);
        ALL_INPUT_TYPES
            .iter()
            .find(|t| t.wire_name() == short)
            .copied()
            .ok_or_else(|| InputError::UnknownInputType(s.to_string()))
    }

    pub fn genre(&self) -> InputGenre {
        match self {
            InputType::KeyData => InputGenre::KeyData,
            InputType::ScalarVariable | InputType::VectorVariable => InputGenre::Variable,
            InputType::VisAsset(_) | InputType::Gradient(_) => InputGenre::VisAsset,
            InputType::Primitive(_) => InputGenre::Primitive,
            InputType::PrimitiveGradient => InputGenre::PrimitiveGradient,
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

const ALL_INPUT_TYPES: [InputType; 18] = [
    InputType::KeyData,
    InputType::ScalarVariable,
    InputType::VectorVariable,
    InputType::VisAsset(VisAssetType::Colormap),
    InputType::VisAsset(VisAssetType::Glyph),
    InputType::VisAsset(VisAssetType::SurfaceTexture),
    InputType::VisAsset(VisAssetType::LineTexture),
    InputType::Gradient(VisAssetType::Colormap),
    InputType::Gradient(VisAssetType::Glyph),
    InputType::Gradient(VisAssetType::SurfaceTexture),
    InputType::Gradient(VisAssetType::LineTexture),
    InputType::Primitive(PrimitiveKind::Length),
    InputType::Primitive(PrimitiveKind::Percent),
    InputType::Primitive(PrimitiveKind::Angle),
    InputType::Primitive(PrimitiveKind::Integer),
    InputType::Primitive(PrimitiveKind::Float),
    InputType::Primitive(PrimitiveKind::Boolean),
    InputType::PrimitiveGradient,
];

/// Wire form of an input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAbrInput {
    pub input_type: String,
    pub input_value: String,
    pub input_genre: InputGenre,
}

impl RawAbrInput {
    pub fn new(input_type: InputType, input_value: impl Into<String>) -> Self {
        Self {
            input_type: input_type.wire_name().to_string(),
            input_value: input_value.into(),
            input_genre: input_type.genre(),
        }
    }

    /// Same genre, type and value; namespace prefixes on the type are ignored
    /// and primitives compare by their parsed value
    pub fn same_value(&self, other: &RawAbrInput) -> bool {
        let short = |s: &str| s.rsplit('.').next().unwrap_or(s).to_string();
        if self.input_genre != other.input_genre || short(&self.input_type) != short(&other.input_type) {
            return false;
        }
        match (self.primitive(), other.primitive()) {
            (Some(a), Some(b)) => a == b,
            _ => self.input_value == other.input_value,
        }
    }

    /// Parsed value of a primitive input
    pub fn primitive(&self) -> Option<Primitive> {
        if self.input_genre != InputGenre::Primitive {
            return None;
        }
        match InputType::parse(&self.input_type) {
            Ok(InputType::Primitive(kind)) => Primitive::parse(kind, &self.input_value).ok(),
            _ => None,
        }
    }

    /// UUID value, for VisAsset and primitive gradient genres
    pub fn uuid(&self) -> Option<Uuid> {
        match self.input_genre {
            InputGenre::VisAsset | InputGenre::PrimitiveGradient => {
                Uuid::parse_str(self.input_value.trim()).ok()
            }
            _ => None,
        }
    }
}

/// A resolved input
#[derive(Debug, Clone, PartialEq)]
pub enum AbrInput {
    KeyData(KeyData),
    ScalarVariable(String),
    VectorVariable(String),
    VisAsset(Arc<VisAsset>),
    Gradient(Arc<VisAssetGradient>),
    Primitive(Primitive),
    PrimitiveGradient(PrimitiveGradient),
}

impl AbrInput {
    pub fn input_type(&self) -> InputType {
        match self {
            AbrInput::KeyData(_) => InputType::KeyData,
            AbrInput::ScalarVariable(_) => InputType::ScalarVariable,
            AbrInput::VectorVariable(_) => InputType::VectorVariable,
            AbrInput::VisAsset(asset) => InputType::VisAsset(asset.asset_type()),
            AbrInput::Gradient(g) => {
                InputType::Gradient(g.member_type.unwrap_or(VisAssetType::Glyph))
            }
            AbrInput::Primitive(p) => InputType::Primitive(p.kind()),
            AbrInput::PrimitiveGradient(_) => InputType::PrimitiveGradient,
        }
    }

    pub fn genre(&self) -> InputGenre {
        self.input_type().genre()
    }

    /// Serialize back to the wire triple
    pub fn to_raw(&self) -> RawAbrInput {
        let value = match self {
            AbrInput::KeyData(kd) => kd.path().to_string(),
            AbrInput::ScalarVariable(path) | AbrInput::VectorVariable(path) => path.clone(),
            AbrInput::VisAsset(asset) => asset.uuid().to_string(),
            AbrInput::Gradient(g) => g.uuid.to_string(),
            AbrInput::Primitive(p) => p.to_string(),
            AbrInput::PrimitiveGradient(g) => g.uuid.to_string(),
        };
        RawAbrInput::new(self.input_type(), value)
    }

    /// VisAsset UUIDs this input depends on (gradient members included)
    pub fn visasset_ids(&self) -> Vec<Uuid> {
        match self {
            AbrInput::VisAsset(asset) => vec![asset.uuid()],
            AbrInput::Gradient(g) => {
                let mut ids = vec![g.uuid];
                ids.extend(g.members.iter().copied());
                ids
            }
            _ => Vec::new(),
        }
    }
}

/// Registries an input is resolved against
pub struct ResolveContext<'a> {
    pub data: &'a DataManager,
    pub visassets: &'a VisAssetManager,
    pub primitive_gradients: &'a HashMap<Uuid, PrimitiveGradient>,
}

impl ResolveContext<'_> {
    /// Resolve a wire input; missing resources log a warning and yield `None`
    pub fn resolve(&self, raw: &RawAbrInput) -> Option<AbrInput> {
        let input_type = match InputType::parse(&raw.input_type) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("{}", e);
                return None;
            }
        };
        if input_type.genre() != raw.input_genre {
            tracing::warn!(
                "Input type {} does not belong to genre {:?}",
                raw.input_type,
                raw.input_genre
            );
            return None;
        }
        let value = raw.input_value.trim();

        let resolved = match input_type {
            InputType::KeyData => self.data.key_data(value).cloned().map(AbrInput::KeyData),
            InputType::ScalarVariable => {
                let ok = data_path::follows_convention(value, DataPathType::ScalarVar)
                    && self.data.scalar_variable(value).is_some();
                ok.then(|| AbrInput::ScalarVariable(value.to_string()))
            }
            InputType::VectorVariable => {
                let ok = data_path::follows_convention(value, DataPathType::VectorVar)
                    && self.data.vector_variable(value).is_some();
                ok.then(|| AbrInput::VectorVariable(value.to_string()))
            }
            InputType::VisAsset(expected) => raw
                .uuid()
                .and_then(|uuid| self.visassets.get(&uuid))
                .filter(|asset| asset.asset_type() == expected)
                .map(AbrInput::VisAsset),
            InputType::Gradient(expected) => raw
                .uuid()
                .and_then(|uuid| self.visassets.gradient(&uuid))
                .filter(|g| g.member_type.map_or(true, |t| t == expected))
                .map(AbrInput::Gradient),
            InputType::Primitive(kind) => match Primitive::parse(kind, value) {
                Ok(p) => Some(AbrInput::Primitive(p)),
                Err(e) => {
                    tracing::warn!("{}", e);
                    None
                }
            },
            InputType::PrimitiveGradient => raw
                .uuid()
                .and_then(|uuid| self.primitive_gradients.get(&uuid))
                .cloned()
                .map(AbrInput::PrimitiveGradient),
        };

        if resolved.is_none() {
            tracing::warn!(
                "Unable to resolve {} input '{}'; leaving it unset",
                raw.input_type,
                raw.input_value
            );
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abr_io::{MeshTopology, RawDataset};

    fn data() -> DataManager {
        let mut dm = DataManager::default();
        let raw = RawDataset::builder(MeshTopology::Points)
            .vertices(vec![[0.0; 3], [1.0; 3]])
            .scalar("t", vec![0.0, 1.0])
            .build()
            .unwrap();
        dm.import_raw_dataset("Org/DS/KeyData/pts", Arc::new(raw))
            .unwrap();
        dm
    }

    #[test]
    fn test_parse_namespaced_type() {
        assert_eq!(
            InputType::parse("Some.Namespace.LengthPrimitive").unwrap(),
            InputType::Primitive(PrimitiveKind::Length)
        );
        assert!(InputType::parse("Nope").is_err());
    }

    #[test]
    fn test_raw_wire_shape() {
        let raw = RawAbrInput::new(InputType::Primitive(PrimitiveKind::Percent), "50%");
        let json = serde_json::to_value(&raw).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"inputType": "PercentPrimitive", "inputValue": "50%", "inputGenre": "Primitive"})
        );
    }

    #[test]
    fn test_resolve_and_round_trip() {
        let dm = data();
        let visassets = VisAssetManager::new();
        let gradients = HashMap::new();
        let ctx = ResolveContext {
            data: &dm,
            visassets: &visassets,
            primitive_gradients: &gradients,
        };

        for raw in [
            RawAbrInput::new(InputType::KeyData, "Org/DS/KeyData/pts"),
            RawAbrInput::new(InputType::ScalarVariable, "Org/DS/ScalarVar/t"),
            RawAbrInput::new(InputType::Primitive(PrimitiveKind::Length), "0.5m"),
        ] {
            let resolved = ctx.resolve(&raw).unwrap();
            assert!(resolved.to_raw().same_value(&raw));
        }
    }

    #[test]
    fn test_missing_visasset_is_unset() {
        let dm = data();
        let visassets = VisAssetManager::new();
        let gradients = HashMap::new();
        let ctx = ResolveContext {
            data: &dm,
            visassets: &visassets,
            primitive_gradients: &gradients,
        };
        let raw = RawAbrInput::new(
            InputType::VisAsset(VisAssetType::Colormap),
            Uuid::new_v4().to_string(),
        );
        assert!(ctx.resolve(&raw).is_none());
        let raw = RawAbrInput::new(InputType::ScalarVariable, "Org/DS/ScalarVar/missing");
        assert!(ctx.resolve(&raw).is_none());
    }

    #[test]
    fn test_same_value_ignores_namespace() {
        let a = RawAbrInput::new(InputType::KeyData, "Org/DS/KeyData/pts");
        let mut b = a.clone();
        b.input_type = "Engine.KeyData".to_string();
        assert!(a.same_value(&b));
        b.input_value = "Org/DS/KeyData/other".to_string();
        assert!(!a.same_value(&b));
    }

    #[test]
    fn test_same_value_compares_parsed_primitives() {
        let a = RawAbrInput::new(InputType::Primitive(PrimitiveKind::Length), "0.1m");
        let b = RawAbrInput::new(InputType::Primitive(PrimitiveKind::Length), " 0.10m");
        assert!(a.same_value(&b));
        let c = RawAbrInput::new(InputType::Primitive(PrimitiveKind::Length), "0.2m");
        assert!(!a.same_value(&c));
        let broken = RawAbrInput::new(InputType::Primitive(PrimitiveKind::Length), "wide");
        assert!(!a.same_value(&broken));
        assert!(broken.same_value(&broken.clone()));
    }
}
