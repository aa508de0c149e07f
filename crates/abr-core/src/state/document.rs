//! Typed view of the state document
//!
//! Deserializing into these types is the structural half of schema
//! validation; [`StateDocument::validate`] adds the cross-field checks
//! (known plate types and inputs, gradient shapes, range order).

use std::collections::BTreeMap;

use abr_io::Bounds;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dataset::DataRange;
use crate::error::{StateError, StateResult};
use crate::impression::ImpressionKind;
use crate::indexer;
use crate::input::{InputType, RawAbrInput};
use crate::visasset::{GradientScale, Manifest};

/// Root of a state document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub impressions: BTreeMap<Uuid, ImpressionState>,
    #[serde(default)]
    pub scene: SceneState,
    #[serde(default)]
    pub data_ranges: DataRangesState,
    #[serde(default)]
    pub local_vis_assets: BTreeMap<Uuid, LocalVisAssetState>,
    #[serde(default)]
    pub vis_asset_gradients: BTreeMap<Uuid, VisAssetGradientState>,
    #[serde(default)]
    pub primitive_gradients: BTreeMap<Uuid, PrimitiveGradientState>,
    /// Opaque to the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    pub plate_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub render_hints: RenderHintsState,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub input_values: BTreeMap<String, RawAbrInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderHintsState {
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl Default for RenderHintsState {
    fn default() -> Self {
        Self { visible: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneState {
    #[serde(default)]
    pub impression_groups: BTreeMap<Uuid, ImpressionGroupState>,
    #[serde(default)]
    pub lighting: Vec<LightState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionGroupState {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_bounds: Option<Bounds>,
    #[serde(default)]
    pub impressions: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightState {
    pub name: String,
    #[serde(default = "default_intensity")]
    pub intensity: f32,
    #[serde(default = "default_light_color")]
    pub color: String,
    #[serde(default)]
    pub position: [f32; 3],
    /// Euler angles in degrees
    #[serde(default)]
    pub rotation: [f32; 3],
}

fn default_intensity() -> f32 {
    1.0
}

fn default_light_color() -> String {
    "#FFFFFF".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRangesState {
    /// Variable path -> range
    #[serde(default)]
    pub scalar_ranges: BTreeMap<String, DataRange>,
    /// Variable path -> key data path -> range
    #[serde(default)]
    pub specific_scalar_ranges: BTreeMap<String, BTreeMap<String, DataRange>>,
}

/// A VisAsset defined inline in the state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVisAssetState {
    pub artifact_json: Value,
    /// File name -> file contents
    #[serde(default)]
    pub artifact_data_contents: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisAssetGradientState {
    pub vis_assets: Vec<Uuid>,
    #[serde(default)]
    pub points: Vec<f32>,
    #[serde(default)]
    pub gradient_scale: GradientScale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimitiveGradientState {
    pub points: Vec<f32>,
    pub values: Vec<String>,
}

/// Parsed JSON alongside its validated typed form
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedState {
    pub json: Value,
    pub document: StateDocument,
}

impl StateDocument {
    /// An empty state of the given version
    pub fn empty(version: &str) -> Self {
        Self {
            version: version.to_string(),
            name: None,
            impressions: BTreeMap::new(),
            scene: SceneState::default(),
            data_ranges: DataRangesState::default(),
            local_vis_assets: BTreeMap::new(),
            vis_asset_gradients: BTreeMap::new(),
            primitive_gradients: BTreeMap::new(),
            ui_data: None,
        }
    }

    /// Parse and validate state text
    pub fn parse(text: &str, expected_version: &str) -> StateResult<ValidatedState> {
        let json: Value = serde_json::from_str(text).map_err(|e| StateError::Parse(e.to_string()))?;
        Self::from_value(json, expected_version)
    }

    /// Validate an already parsed JSON value
    pub fn from_value(json: Value, expected_version: &str) -> StateResult<ValidatedState> {
        if !json.is_object() {
            return Err(StateError::schema("", "state must be a JSON object"));
        }
        let document: StateDocument =
            serde_json::from_value(json.clone()).map_err(|e| StateError::schema("", e.to_string()))?;
        document.validate(expected_version)?;
        Ok(ValidatedState { json, document })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Cross-field checks beyond the structural ones
    pub fn validate(&self, expected_version: &str) -> StateResult<()> {
        if !version_compatible(&self.version, expected_version) {
            return Err(StateError::UnsupportedVersion {
                found: self.version.clone(),
                expected: expected_version.to_string(),
            });
        }

        // Plate types and inputs are left to the engine, which skips a bad
        // impression or input on its own
        for (uuid, impression) in &self.impressions {
            if let Some(inner) = impression.uuid {
                if inner != *uuid {
                    return Err(StateError::schema(
                        format!("impressions/{}/uuid", uuid),
                        format!("does not match key ({})", inner),
                    ));
                }
            }
        }

        for (uuid, group) in &self.scene.impression_groups {
            if let Some(bounds) = group.container_bounds {
                if bounds.extents.to_array().iter().any(|e| *e <= 0.0) {
                    return Err(StateError::schema(
                        format!("scene/impressionGroups/{}/containerBounds", uuid),
                        "extents must be positive",
                    ));
                }
            }
        }

        let check_range = |path: String, range: &DataRange| -> StateResult<()> {
            if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
                return Err(StateError::schema(path, format!("invalid range {}..{}", range.min, range.max)));
            }
            Ok(())
        };
        for (var, range) in &self.data_ranges.scalar_ranges {
            check_range(format!("dataRanges/scalarRanges/{}", var), range)?;
        }
        for (var, specific) in &self.data_ranges.specific_scalar_ranges {
            for (key_data, range) in specific {
                check_range(format!("dataRanges/specificScalarRanges/{}/{}", var, key_data), range)?;
            }
        }

        for (uuid, local) in &self.local_vis_assets {
            let path = format!("localVisAssets/{}/artifactJson", uuid);
            let manifest =
                Manifest::from_value(local.artifact_json.clone()).map_err(|e| StateError::schema(&path, e.to_string()))?;
            manifest
                .visasset_type()
                .map_err(|e| StateError::schema(&path, e.to_string()))?;
        }

        for (uuid, gradient) in &self.vis_asset_gradients {
            if gradient.vis_assets.is_empty() || gradient.points.len() + 1 != gradient.vis_assets.len() {
                return Err(StateError::schema(
                    format!("visAssetGradients/{}", uuid),
                    format!(
                        "{} points for {} VisAssets",
                        gradient.points.len(),
                        gradient.vis_assets.len()
                    ),
                ));
            }
        }

        for (uuid, gradient) in &self.primitive_gradients {
            if gradient.points.is_empty() || gradient.points.len() != gradient.values.len() {
                return Err(StateError::schema(
                    format!("primitiveGradients/{}", uuid),
                    format!("{} points for {} values", gradient.points.len(), gradient.values.len()),
                ));
            }
        }

        Ok(())
    }

    /// Strict check of every impression's plate type and inputs
    ///
    /// `validate` accepts states the engine can partly apply; writers that
    /// want the whole state to be well-formed call this as well.
    pub fn check_inputs(&self) -> StateResult<()> {
        for (uuid, impression) in &self.impressions {
            let base = format!("impressions/{}", uuid);
            let kind = ImpressionKind::from_plate_type(&impression.plate_type)
                .map_err(|e| StateError::schema(format!("{}/plateType", base), e.to_string()))?;
            for (name, raw) in &impression.input_values {
                let path = format!("{}/inputValues/{}", base, name);
                if indexer::slot(kind, name).is_none() {
                    return Err(StateError::schema(path, format!("{} has no such input", kind)));
                }
                let input_type =
                    InputType::parse(&raw.input_type).map_err(|e| StateError::schema(&path, e.to_string()))?;
                if input_type.genre() != raw.input_genre {
                    return Err(StateError::schema(
                        path,
                        format!("{} is not of genre {:?}", raw.input_type, raw.input_genre),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Light by name
    pub fn light(&self, name: &str) -> Option<&LightState> {
        self.scene.lighting.iter().find(|l| l.name == name)
    }
}

/// Versions agree on major and minor components
pub fn version_compatible(found: &str, expected: &str) -> bool {
    let major_minor = |v: &str| -> Vec<String> {
        v.trim().split('.').take(2).map(|s| s.to_string()).collect()
    };
    major_minor(found) == major_minor(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const V: &str = "0.2.0";

    fn impression_json() -> Value {
        json!({
            "version": "0.2.0",
            "impressions": {
                "7d0c2a38-0a6e-4d3f-9a41-8a1c6c0b5f11": {
                    "plateType": "Glyphs",
                    "name": "points",
                    "inputValues": {
                        "Glyph Size": {"inputType": "LengthPrimitive", "inputValue": "0.1m", "inputGenre": "Primitive"}
                    }
                }
            },
            "uiData": {"anything": [1, 2, 3]}
        })
    }

    #[test]
    fn test_parse_valid_state() {
        let state = StateDocument::from_value(impression_json(), V).unwrap();
        assert_eq!(state.document.impressions.len(), 1);
        let imp = state.document.impressions.values().next().unwrap();
        assert!(imp.render_hints.visible);
        assert!(state.document.ui_data.is_some());
    }

    #[test]
    fn test_rejects_bad_json() {
        assert!(matches!(StateDocument::parse("{", V), Err(StateError::Parse(_))));
        assert!(matches!(StateDocument::parse("[]", V), Err(StateError::Schema { .. })));
    }

    #[test]
    fn test_rejects_version() {
        let mut json = impression_json();
        json["version"] = json!("1.0.0");
        assert!(matches!(
            StateDocument::from_value(json, V),
            Err(StateError::UnsupportedVersion { .. })
        ));
        assert!(version_compatible("0.2.5", V));
    }

    #[test]
    fn test_unknown_input_passes_validation_but_not_input_check() {
        let mut json = impression_json();
        json["impressions"]["7d0c2a38-0a6e-4d3f-9a41-8a1c6c0b5f11"]["inputValues"]["Pattern"] =
            json!({"inputType": "SurfaceTextureVisAsset", "inputValue": "x", "inputGenre": "VisAsset"});
        let state = StateDocument::from_value(json, V).unwrap();
        let err = state.document.check_inputs().unwrap_err();
        assert!(err.to_string().contains("inputValues/Pattern"));
    }

    #[test]
    fn test_genre_mismatch_fails_input_check() {
        let mut json = impression_json();
        json["impressions"]["7d0c2a38-0a6e-4d3f-9a41-8a1c6c0b5f11"]["inputValues"]["Glyph Size"]["inputGenre"] =
            json!("Variable");
        let state = StateDocument::from_value(json, V).unwrap();
        assert!(state.document.check_inputs().is_err());
    }

    #[test]
    fn test_unknown_plate_type_fails_input_check_only() {
        let mut json = impression_json();
        json["impressions"]["7d0c2a38-0a6e-4d3f-9a41-8a1c6c0b5f11"]["plateType"] = json!("Teapots");
        let state = StateDocument::from_value(json, V).unwrap();
        let err = state.document.check_inputs().unwrap_err();
        assert!(err.to_string().contains("plateType"));
        assert!(StateDocument::from_value(impression_json(), V)
            .unwrap()
            .document
            .check_inputs()
            .is_ok());
    }

    #[test]
    fn test_rejects_mismatched_impression_uuid() {
        let mut json = impression_json();
        json["impressions"]["7d0c2a38-0a6e-4d3f-9a41-8a1c6c0b5f11"]["uuid"] =
            json!("7d0c2a38-0a6e-4d3f-9a41-8a1c6c0b5f12");
        assert!(StateDocument::from_value(json, V).is_err());
    }

    #[test]
    fn test_rejects_bad_gradient_and_range() {
        let mut json = impression_json();
        json["visAssetGradients"] = json!({
            "2f1d1c46-91f5-4c38-bb4a-5ac0d4e7f0a2": {"visAssets": ["2f1d1c46-91f5-4c38-bb4a-5ac0d4e7f0a3"], "points": [0.5]}
        });
        assert!(StateDocument::from_value(json, V).is_err());

        let mut json = impression_json();
        json["dataRanges"] = json!({"scalarRanges": {"A/B/ScalarVar/c": {"min": 2.0, "max": 1.0}}});
        assert!(StateDocument::from_value(json, V).is_err());
    }

    #[test]
    fn test_empty_state() {
        let empty = StateDocument::empty(V);
        let value = empty.to_value();
        assert_eq!(value["version"], json!("0.2.0"));
        assert!(StateDocument::from_value(value, V).is_ok());
    }
}
