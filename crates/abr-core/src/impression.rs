//! Data impressions
//!
//! An impression is one visual layer: a plate kind plus a set of named
//! inputs. Which inputs a kind accepts is declared in [`crate::indexer`].

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset::{KeyData, KeyDataKind};
use crate::error::{InputError, InputResult};
use crate::input::AbrInput;

/// Plate kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImpressionKind {
    Glyphs,
    Ribbons,
    Surfaces,
    Volumes,
}

impl ImpressionKind {
    pub const ALL: [ImpressionKind; 4] = [
        ImpressionKind::Glyphs,
        ImpressionKind::Ribbons,
        ImpressionKind::Surfaces,
        ImpressionKind::Volumes,
    ];

    /// Plate type name used in the state document
    pub fn plate_type(&self) -> &'static str {
        match self {
            ImpressionKind::Glyphs => "Glyphs",
            ImpressionKind::Ribbons => "Ribbons",
            ImpressionKind::Surfaces => "Surfaces",
            ImpressionKind::Volumes => "Volumes",
        }
    }

    pub fn from_plate_type(plate_type: &str) -> InputResult<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.plate_type().eq_ignore_ascii_case(plate_type.trim()))
            .ok_or_else(|| InputError::UnknownPlateType(plate_type.to_string()))
    }

    /// Key data kind this plate renders
    pub fn key_data_kind(&self) -> KeyDataKind {
        match self {
            ImpressionKind::Glyphs => KeyDataKind::Point,
            ImpressionKind::Ribbons => KeyDataKind::Line,
            ImpressionKind::Surfaces => KeyDataKind::Surface,
            ImpressionKind::Volumes => KeyDataKind::Volume,
        }
    }
}

impl fmt::Display for ImpressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plate_type())
    }
}

bitflags! {
    /// Recomputation an impression needs before its next render
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct DirtyFlags: u8 {
        const DATA_CHANGED = 0b001;
        const STYLE_CHANGED = 0b010;
        const VISIBILITY_CHANGED = 0b100;
    }
}

/// Dirty flags plus visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderHints {
    pub flags: DirtyFlags,
    pub visible: bool,
}

impl RenderHints {
    pub fn data_changed(&self) -> bool {
        self.flags.contains(DirtyFlags::DATA_CHANGED)
    }

    pub fn style_changed(&self) -> bool {
        self.flags.contains(DirtyFlags::STYLE_CHANGED)
    }

    pub fn visibility_changed(&self) -> bool {
        self.flags.contains(DirtyFlags::VISIBILITY_CHANGED)
    }

    pub fn is_clean(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn clear(&mut self) {
        self.flags = DirtyFlags::empty();
    }
}

impl Default for RenderHints {
    /// A new impression needs everything computed
    fn default() -> Self {
        Self {
            flags: DirtyFlags::DATA_CHANGED | DirtyFlags::STYLE_CHANGED,
            visible: true,
        }
    }
}

/// One visual layer
#[derive(Debug, Clone, PartialEq)]
pub struct DataImpression {
    uuid: Uuid,
    kind: ImpressionKind,
    pub name: String,
    pub tags: Vec<String>,
    pub hints: RenderHints,
    pub(crate) inputs: BTreeMap<&'static str, AbrInput>,
}

impl DataImpression {
    pub fn new(kind: ImpressionKind, uuid: Uuid) -> Self {
        Self {
            uuid,
            kind,
            name: format!("{} {}", kind.plate_type(), uuid.simple()),
            tags: Vec::new(),
            hints: RenderHints::default(),
            inputs: BTreeMap::new(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn kind(&self) -> ImpressionKind {
        self.kind
    }

    /// Assigned inputs, by slot name
    pub fn inputs(&self) -> impl Iterator<Item = (&'static str, &AbrInput)> {
        self.inputs.iter().map(|(name, input)| (*name, input))
    }

    pub fn input(&self, name: &str) -> Option<&AbrInput> {
        self.inputs.get(name)
    }

    pub fn key_data(&self) -> Option<&KeyData> {
        match self.inputs.get(crate::indexer::KEY_DATA) {
            Some(AbrInput::KeyData(kd)) => Some(kd),
            _ => None,
        }
    }

    /// Scalar variable paths bound to any slot
    pub fn scalar_variables(&self) -> impl Iterator<Item = &str> {
        self.inputs.values().filter_map(|input| match input {
            AbrInput::ScalarVariable(path) => Some(path.as_str()),
            _ => None,
        })
    }

    pub fn mark(&mut self, flags: DirtyFlags) {
        self.hints.flags |= flags;
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
