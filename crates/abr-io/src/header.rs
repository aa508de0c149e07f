//! Key-data JSON header
//!
//! The header is the JSON half of a key-data `<name>.json` / `<name>.bin`
//! pair. It names the arrays stored in the body, their precomputed ranges,
//! the topology, and the bounding box of the geometry.

use serde::{Deserialize, Serialize};

use crate::loader::{IoError, IoResult};
use crate::topology::MeshTopology;

/// A 3-component vector as written in headers (`{"x":..,"y":..,"z":..}`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f32; 3]> for Vector3 {
    fn from(arr: [f32; 3]) -> Self {
        Self::new(arr[0], arr[1], arr[2])
    }
}

/// Axis-aligned bounds stored as center and half-extents
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub center: Vector3,
    pub extents: Vector3,
}

impl Bounds {
    /// Create bounds from center and half-extents
    pub fn new(center: Vector3, extents: Vector3) -> Self {
        Self { center, extents }
    }

    /// Create bounds from min/max corners
    pub fn from_min_max(min: [f32; 3], max: [f32; 3]) -> Self {
        let center = [
            (min[0] + max[0]) / 2.0,
            (min[1] + max[1]) / 2.0,
            (min[2] + max[2]) / 2.0,
        ];
        let extents = [
            (max[0] - min[0]) / 2.0,
            (max[1] - min[1]) / 2.0,
            (max[2] - min[2]) / 2.0,
        ];
        Self::new(center.into(), extents.into())
    }

    /// Smallest bounds containing every point, `None` for no points
    pub fn from_points(points: &[[f32; 3]]) -> Option<Self> {
        let first = points.first()?;
        let mut min = *first;
        let mut max = *first;
        for p in points.iter().skip(1) {
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        Some(Self::from_min_max(min, max))
    }

    pub fn min(&self) -> [f32; 3] {
        [
            self.center.x - self.extents.x,
            self.center.y - self.extents.y,
            self.center.z - self.extents.z,
        ]
    }

    pub fn max(&self) -> [f32; 3] {
        [
            self.center.x + self.extents.x,
            self.center.y + self.extents.y,
            self.center.z + self.extents.z,
        ]
    }

    /// Full edge lengths
    pub fn size(&self) -> [f32; 3] {
        [
            self.extents.x * 2.0,
            self.extents.y * 2.0,
            self.extents.z * 2.0,
        ]
    }

    /// Grow to include another bounds
    pub fn encapsulate(&mut self, other: &Bounds) {
        let (a_min, a_max) = (self.min(), self.max());
        let (b_min, b_max) = (other.min(), other.max());
        let mut min = [0.0; 3];
        let mut max = [0.0; 3];
        for i in 0..3 {
            min[i] = a_min[i].min(b_min[i]);
            max[i] = a_max[i].max(b_max[i]);
        }
        *self = Bounds::from_min_max(min, max);
    }

    /// Check if a point is contained
    pub fn contains(&self, point: [f32; 3]) -> bool {
        let (min, max) = (self.min(), self.max());
        (0..3).all(|i| point[i] >= min[i] && point[i] <= max[i])
    }
}

/// JSON header describing a key-data body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDataHeader {
    #[serde(rename = "meshTopology")]
    pub topology: MeshTopology,

    pub num_points: usize,

    pub num_cells: usize,

    pub num_cell_indices: usize,

    #[serde(rename = "scalarArrayNames", default)]
    pub scalar_array_names: Vec<String>,

    #[serde(rename = "vectorArrayNames", default)]
    pub vector_array_names: Vec<String>,

    #[serde(rename = "scalarMins", default)]
    pub scalar_mins: Vec<f32>,

    #[serde(rename = "scalarMaxes", default)]
    pub scalar_maxes: Vec<f32>,

    pub bounds: Bounds,

    /// Voxel grid dimensions (volumetric topology only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<[usize; 3]>,
}

impl KeyDataHeader {
    /// Parse a header from JSON text and validate it
    pub fn from_json(json: &str) -> IoResult<Self> {
        let header: KeyDataHeader = serde_json::from_str(json)
            .map_err(|e| IoError::InvalidHeader(e.to_string()))?;
        header.validate()?;
        Ok(header)
    }

    /// Serialize the header to JSON
    pub fn to_json(&self) -> IoResult<String> {
        serde_json::to_string(self).map_err(|e| IoError::InvalidHeader(e.to_string()))
    }

    /// Check internal consistency of the header
    pub fn validate(&self) -> IoResult<()> {
        if self.scalar_mins.len() != self.scalar_array_names.len()
            || self.scalar_maxes.len() != self.scalar_array_names.len()
        {
            return Err(IoError::InvalidHeader(format!(
                "{} scalar arrays but {} mins and {} maxes",
                self.scalar_array_names.len(),
                self.scalar_mins.len(),
                self.scalar_maxes.len()
            )));
        }

        if self.topology.is_volumetric() {
            let dims = self.dimensions.ok_or_else(|| {
                IoError::InvalidHeader("Voxel topology requires dimensions".to_string())
            })?;
            let voxels = dims[0]
                .checked_mul(dims[1])
                .and_then(|n| n.checked_mul(dims[2]))
                .ok_or_else(|| overflow("dimensions"))?;
            if voxels != self.num_points {
                return Err(IoError::InvalidHeader(format!(
                    "Dimensions {:?} hold {} voxels but num_points is {}",
                    dims, voxels, self.num_points
                )));
            }
        }

        self.expected_body_len()?;
        Ok(())
    }

    /// Number of f32 values in the vertex block
    pub fn vertex_value_count(&self) -> IoResult<usize> {
        if self.topology.is_volumetric() {
            Ok(0)
        } else {
            self.num_points.checked_mul(3).ok_or_else(|| overflow("num_points"))
        }
    }

    /// Exact byte length the body must have
    pub fn expected_body_len(&self) -> IoResult<usize> {
        let scalars = self.scalar_array_names.len().checked_mul(self.num_points);
        let vectors = self
            .vector_array_names
            .len()
            .checked_mul(3)
            .and_then(|n| n.checked_mul(self.num_points));
        self.vertex_value_count()?
            .checked_add(self.num_cell_indices)
            .zip(scalars)
            .and_then(|(n, s)| n.checked_add(s))
            .zip(vectors)
            .and_then(|(n, v)| n.checked_add(v))
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| overflow("body size"))
    }
}

fn overflow(field: &str) -> IoError {
    IoError::InvalidHeader(format!("{} is too large", field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_json() -> &'static str {
        r#"{
            "meshTopology": 0,
            "num_points": 3,
            "num_cells": 1,
            "num_cell_indices": 4,
            "scalarArrayNames": ["temperature"],
            "vectorArrayNames": [],
            "scalarMins": [0.0],
            "scalarMaxes": [1.0],
            "bounds": {
                "m_Center": {"x": 0.5, "y": 0.5, "z": 0.0},
                "m_Extent": {"x": 0.5, "y": 0.5, "z": 0.0},
                "center": {"x": 0.5, "y": 0.5, "z": 0.0},
                "extents": {"x": 0.5, "y": 0.5, "z": 0.0}
            },
            "dimensions": null
        }"#
    }

    #[test]
    fn test_parse_header() {
        let header = KeyDataHeader::from_json(header_json()).unwrap();
        assert_eq!(header.topology, MeshTopology::Triangles);
        assert_eq!(header.scalar_array_names, vec!["temperature"]);
        assert_eq!(header.bounds.max(), [1.0, 1.0, 0.0]);
        // 9 vertex floats + 4 indices + 3 scalar values
        assert_eq!(header.expected_body_len().unwrap(), (9 + 4 + 3) * 4);
    }

    #[test]
    fn test_mismatched_ranges_rejected() {
        let json = header_json().replace("\"scalarMins\": [0.0]", "\"scalarMins\": []");
        assert!(matches!(
            KeyDataHeader::from_json(&json),
            Err(IoError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_voxels_require_dimensions() {
        let json = header_json().replace("\"meshTopology\": 0", "\"meshTopology\": 100");
        assert!(KeyDataHeader::from_json(&json).is_err());
    }

    #[test]
    fn test_bounds_encapsulate() {
        let mut a = Bounds::from_min_max([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let b = Bounds::from_min_max([-1.0, 0.5, 0.0], [0.5, 2.0, 1.0]);
        a.encapsulate(&b);
        assert_eq!(a.min(), [-1.0, 0.0, 0.0]);
        assert_eq!(a.max(), [1.0, 2.0, 1.0]);
        assert!(a.contains([0.0, 1.5, 0.5]));
    }

    #[test]
    fn test_bounds_from_points() {
        assert!(Bounds::from_points(&[]).is_none());
        let b = Bounds::from_points(&[[0.0, 0.0, 0.0], [2.0, -2.0, 4.0]]).unwrap();
        assert_eq!(b.center, Vector3::new(1.0, -1.0, 2.0));
        assert_eq!(b.size(), [2.0, 2.0, 4.0]);
    }

    #[test]
    fn test_overflowing_counts_rejected() {
        let json = header_json().replace("\"num_points\": 3", "\"num_points\": 4611686018427387904");
        assert!(matches!(
            KeyDataHeader::from_json(&json),
            Err(IoError::InvalidHeader(_))
        ));

        let json = header_json().replace("\"num_cell_indices\": 4", "\"num_cell_indices\": 18446744073709551615");
        assert!(matches!(
            KeyDataHeader::from_json(&json),
            Err(IoError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_overflowing_dimensions_rejected() {
        let json = header_json()
            .replace("\"meshTopology\": 0", "\"meshTopology\": 100")
            .replace("\"dimensions\": null", "\"dimensions\": [4294967296, 4294967296, 2]");
        assert!(matches!(
            KeyDataHeader::from_json(&json),
            Err(IoError::InvalidHeader(_))
        ));
    }
}
