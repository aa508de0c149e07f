//! Mesh topology tags
//!
//! The header stores topology as an integer code. Codes 0-5 follow the
//! mesh topology numbering used by common engine mesh APIs; volumes use 100.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Topology of a key data object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum MeshTopology {
    Triangles,
    Quads,
    Lines,
    LineStrip,
    Points,
    Voxels,
}

impl MeshTopology {
    /// Integer code stored in the header
    pub fn code(&self) -> i32 {
        match self {
            MeshTopology::Triangles => 0,
            MeshTopology::Quads => 2,
            MeshTopology::Lines => 3,
            MeshTopology::LineStrip => 4,
            MeshTopology::Points => 5,
            MeshTopology::Voxels => 100,
        }
    }

    /// Look up a topology from its header code
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(MeshTopology::Triangles),
            2 => Some(MeshTopology::Quads),
            3 => Some(MeshTopology::Lines),
            4 => Some(MeshTopology::LineStrip),
            5 => Some(MeshTopology::Points),
            100 => Some(MeshTopology::Voxels),
            _ => None,
        }
    }

    /// Voxel data has implicit positions and no vertex block
    pub fn is_volumetric(&self) -> bool {
        matches!(self, MeshTopology::Voxels)
    }

    /// Whether each cell in the index stream is prefixed by its vertex count
    pub fn has_prefixed_cells(&self) -> bool {
        !matches!(self, MeshTopology::Points | MeshTopology::Voxels)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MeshTopology::Triangles => "Triangles",
            MeshTopology::Quads => "Quads",
            MeshTopology::Lines => "Lines",
            MeshTopology::LineStrip => "LineStrip",
            MeshTopology::Points => "Points",
            MeshTopology::Voxels => "Voxels",
        }
    }
}

impl fmt::Display for MeshTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<i32> for MeshTopology {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        MeshTopology::from_code(code).ok_or_else(|| format!("Unknown mesh topology code: {}", code))
    }
}

impl From<MeshTopology> for i32 {
    fn from(topology: MeshTopology) -> Self {
        topology.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for topology in [
            MeshTopology::Triangles,
            MeshTopology::Quads,
            MeshTopology::Lines,
            MeshTopology::LineStrip,
            MeshTopology::Points,
            MeshTopology::Voxels,
        ] {
            assert_eq!(MeshTopology::from_code(topology.code()), Some(topology));
        }
        assert_eq!(MeshTopology::from_code(1), None);
    }

    #[test]
    fn test_serde_as_integer() {
        let json = serde_json::to_string(&MeshTopology::Voxels).unwrap();
        assert_eq!(json, "100");
        let parsed: MeshTopology = serde_json::from_str("4").unwrap();
        assert_eq!(parsed, MeshTopology::LineStrip);
        assert!(serde_json::from_str::<MeshTopology>("7").is_err());
    }

    #[test]
    fn test_prefixed_cells() {
        assert!(MeshTopology::Triangles.has_prefixed_cells());
        assert!(!MeshTopology::Points.has_prefixed_cells());
        assert!(!MeshTopology::Voxels.has_prefixed_cells());
    }
}
