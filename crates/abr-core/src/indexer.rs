//! Input slot tables
//!
//! Each impression kind declares its inputs once, as static data: slot
//! name, accepted input type, and whether a change to it needs a data
//! recompute or only a restyle. Generic get/assign goes through these
//! tables instead of per-kind accessors.

use crate::dataset::KeyDataKind;
use crate::error::{InputError, InputResult};
use crate::impression::{DataImpression, DirtyFlags, ImpressionKind};
use crate::input::{AbrInput, InputType};
use crate::primitive::PrimitiveKind;
use crate::visasset::VisAssetType;

pub const KEY_DATA: &str = "Key Data";
pub const COLOR_VARIABLE: &str = "Color Variable";
pub const COLORMAP: &str = "Colormap";

/// Recompute tier for an input change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateLevel {
    Data,
    Style,
}

impl UpdateLevel {
    pub fn dirty_flag(&self) -> DirtyFlags {
        match self {
            UpdateLevel::Data => DirtyFlags::DATA_CHANGED,
            UpdateLevel::Style => DirtyFlags::STYLE_CHANGED,
        }
    }
}

/// One declared input of an impression kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSlot {
    pub name: &'static str,
    pub input_type: InputType,
    /// VisAsset slots that also take a gradient of the same VisAsset type
    pub gradient: bool,
    pub update_level: UpdateLevel,
}

impl InputSlot {
    const fn new(name: &'static str, input_type: InputType, update_level: UpdateLevel) -> Self {
        Self {
            name,
            input_type,
            gradient: false,
            update_level,
        }
    }

    const fn with_gradient(name: &'static str, asset: VisAssetType, update_level: UpdateLevel) -> Self {
        Self {
            name,
            input_type: InputType::VisAsset(asset),
            gradient: true,
            update_level,
        }
    }

    /// Whether a value of `input_type` may be assigned to this slot
    pub fn accepts(&self, input_type: InputType) -> bool {
        if input_type == self.input_type {
            return true;
        }
        match (self.input_type, input_type) {
            (InputType::VisAsset(slot), InputType::Gradient(value)) => self.gradient && slot == value,
            _ => false,
        }
    }
}

use InputType::{KeyData as KD, PrimitiveGradient as PG, ScalarVariable as SV, VectorVariable as VV};
use UpdateLevel::{Data, Style};

const fn prim(kind: PrimitiveKind) -> InputType {
    InputType::Primitive(kind)
}

const COLORMAP_TYPE: InputType = InputType::VisAsset(VisAssetType::Colormap);

static GLYPH_INPUTS: [InputSlot; 12] = [
    InputSlot::new(KEY_DATA, KD, Data),
    InputSlot::new(COLOR_VARIABLE, SV, Style),
    InputSlot::new(COLORMAP, COLORMAP_TYPE, Style),
    InputSlot::new("Glyph Variable", SV, Data),
    InputSlot::with_gradient("Glyph", VisAssetType::Glyph, Data),
    InputSlot::new("Glyph Size", prim(PrimitiveKind::Length), Style),
    InputSlot::new("Glyph Density", prim(PrimitiveKind::Percent), Data),
    InputSlot::new("Forward Variable", VV, Data),
    InputSlot::new("Up Variable", VV, Data),
    InputSlot::new("Use Random Orientation", prim(PrimitiveKind::Boolean), Data),
    InputSlot::new("Show Outline", prim(PrimitiveKind::Boolean), Style),
    InputSlot::new("Outline Width", prim(PrimitiveKind::Length), Style),
];

static RIBBON_INPUTS: [InputSlot; 11] = [
    InputSlot::new(KEY_DATA, KD, Data),
    InputSlot::new(COLOR_VARIABLE, SV, Style),
    InputSlot::new(COLORMAP, COLORMAP_TYPE, Style),
    InputSlot::new("Ribbon Variable", SV, Style),
    InputSlot::with_gradient("Ribbon Texture", VisAssetType::LineTexture, Style),
    InputSlot::new("Ribbon Width", prim(PrimitiveKind::Length), Style),
    InputSlot::new("Ribbon Rotation", prim(PrimitiveKind::Angle), Style),
    InputSlot::new("Ribbon Brightness", prim(PrimitiveKind::Percent), Style),
    InputSlot::new("Texture Cutoff", prim(PrimitiveKind::Percent), Style),
    InputSlot::new("Ribbon Smooth", prim(PrimitiveKind::Integer), Data),
    InputSlot::new("Average Sample Count", prim(PrimitiveKind::Integer), Data),
];

static SURFACE_INPUTS: [InputSlot; 11] = [
    InputSlot::new(KEY_DATA, KD, Data),
    InputSlot::new(COLOR_VARIABLE, SV, Style),
    InputSlot::new(COLORMAP, COLORMAP_TYPE, Style),
    InputSlot::new("Pattern Variable", SV, Style),
    InputSlot::with_gradient("Pattern", VisAssetType::SurfaceTexture, Style),
    InputSlot::new("Pattern Size", prim(PrimitiveKind::Length), Style),
    InputSlot::new("Pattern Seam Blend", prim(PrimitiveKind::Percent), Style),
    InputSlot::new("Pattern Saturation", prim(PrimitiveKind::Percent), Style),
    InputSlot::new("Pattern Intensity", prim(PrimitiveKind::Percent), Style),
    InputSlot::new("Show Outline", prim(PrimitiveKind::Boolean), Style),
    InputSlot::new("Outline Width", prim(PrimitiveKind::Length), Style),
];

static VOLUME_INPUTS: [InputSlot; 4] = [
    InputSlot::new(KEY_DATA, KD, Data),
    InputSlot::new(COLOR_VARIABLE, SV, Style),
    InputSlot::new(COLORMAP, COLORMAP_TYPE, Style),
    InputSlot::new("Opacitymap", PG, Style),
];

/// Declared inputs of an impression kind, in declaration order
pub fn input_slots(kind: ImpressionKind) -> &'static [InputSlot] {
    match kind {
        ImpressionKind::Glyphs => &GLYPH_INPUTS,
        ImpressionKind::Ribbons => &RIBBON_INPUTS,
        ImpressionKind::Surfaces => &SURFACE_INPUTS,
        ImpressionKind::Volumes => &VOLUME_INPUTS,
    }
}

pub fn slot(kind: ImpressionKind, name: &str) -> Option<&'static InputSlot> {
    input_slots(kind).iter().find(|s| s.name == name)
}

pub fn input_names(kind: ImpressionKind) -> Vec<&'static str> {
    input_slots(kind).iter().map(|s| s.name).collect()
}

fn find_slot(kind: ImpressionKind, name: &str) -> InputResult<&'static InputSlot> {
    slot(kind, name).ok_or_else(|| InputError::UnknownInput {
        plate: kind.plate_type().to_string(),
        input: name.to_string(),
    })
}

/// Current value of a named input
pub fn get_input(impression: &DataImpression, name: &str) -> InputResult<Option<AbrInput>> {
    let slot = find_slot(impression.kind(), name)?;
    Ok(impression.inputs.get(slot.name).cloned())
}

pub fn is_input_set(impression: &DataImpression, name: &str) -> bool {
    impression.inputs.contains_key(name)
}

/// Assign (or, with `None`, clear) a named input
///
/// The value must match the slot's declared type. Key data must also be of
/// the kind the plate renders.
pub fn assign_input(impression: &mut DataImpression, name: &str, value: Option<AbrInput>) -> InputResult<()> {
    let slot = find_slot(impression.kind(), name)?;
    let Some(value) = value else {
        impression.inputs.remove(slot.name);
        return Ok(());
    };

    let actual = value.input_type();
    if !slot.accepts(actual) {
        return Err(InputError::TypeMismatch {
            input: slot.name.to_string(),
            expected: slot.input_type.to_string(),
            actual: actual.to_string(),
        });
    }
    if let AbrInput::KeyData(kd) = &value {
        let expected: KeyDataKind = impression.kind().key_data_kind();
        if kd.kind() != expected {
            return Err(InputError::TypeMismatch {
                input: slot.name.to_string(),
                expected: format!("{:?} key data", expected),
                actual: format!("{:?} key data ({})", kd.kind(), kd.path()),
            });
        }
    }

    impression.inputs.insert(slot.name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::KeyData;
    use crate::primitive::Primitive;
    use uuid::Uuid;

    #[test]
    fn test_slot_tables() {
        assert_eq!(input_slots(ImpressionKind::Glyphs).len(), 12);
        assert_eq!(input_names(ImpressionKind::Volumes), vec![KEY_DATA, COLOR_VARIABLE, COLORMAP, "Opacitymap"]);
        for kind in ImpressionKind::ALL {
            let slots = input_slots(kind);
            assert_eq!(slots[0].name, KEY_DATA);
            assert_eq!(slots[0].update_level, UpdateLevel::Data);
            assert_eq!(slot(kind, COLORMAP).map(|s| s.update_level), Some(UpdateLevel::Style));
        }
    }

    #[test]
    fn test_assign_and_clear() {
        let mut imp = DataImpression::new(ImpressionKind::Glyphs, Uuid::new_v4());
        assign_input(&mut imp, "Glyph Size", Some(AbrInput::Primitive(Primitive::Length(0.2)))).unwrap();
        assert_eq!(
            get_input(&imp, "Glyph Size").unwrap(),
            Some(AbrInput::Primitive(Primitive::Length(0.2)))
        );
        assign_input(&mut imp, "Glyph Size", None).unwrap();
        assert!(!is_input_set(&imp, "Glyph Size"));
    }

    #[test]
    fn test_type_mismatch() {
        let mut imp = DataImpression::new(ImpressionKind::Glyphs, Uuid::new_v4());
        let err = assign_input(&mut imp, "Glyph Size", Some(AbrInput::Primitive(Primitive::Percent(5.0))));
        assert!(matches!(err, Err(InputError::TypeMismatch { .. })));
        let err = assign_input(&mut imp, "Pattern", None);
        assert!(matches!(err, Err(InputError::UnknownInput { .. })));
    }

    #[test]
    fn test_key_data_topology_must_match() {
        let mut imp = DataImpression::new(ImpressionKind::Surfaces, Uuid::new_v4());
        let points = KeyData::new("Org/DS/KeyData/pts", KeyDataKind::Point);
        assert!(assign_input(&mut imp, KEY_DATA, Some(AbrInput::KeyData(points))).is_err());
        let surface = KeyData::new("Org/DS/KeyData/tris", KeyDataKind::Surface);
        assign_input(&mut imp, KEY_DATA, Some(AbrInput::KeyData(surface))).unwrap();
        assert_eq!(imp.key_data().map(|k| k.path()), Some("Org/DS/KeyData/tris"));
    }

    #[test]
    fn test_gradient_slots() {
        let glyph = slot(ImpressionKind::Glyphs, "Glyph").unwrap();
        assert!(glyph.accepts(InputType::Gradient(VisAssetType::Glyph)));
        assert!(!glyph.accepts(InputType::Gradient(VisAssetType::Colormap)));
        let colormap = slot(ImpressionKind::Glyphs, COLORMAP).unwrap();
        assert!(!colormap.accepts(InputType::Gradient(VisAssetType::Colormap)));
    }
}
