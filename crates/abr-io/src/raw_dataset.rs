//! Raw key-data decoding
//!
//! A `RawDataset` is the decoded form of one key-data header/body pair:
//! vertex positions (or voxel dimensions), a flattened cell index array with
//! per-cell offset/count tables, and named per-vertex scalar and vector
//! arrays. It is immutable once built.
//!
//! # Cell index stream
//!
//! For line and surface topologies the stored index stream is
//! cell-length-prefixed:
//!
//! ```text
//! [k0, i, i, ..., k1, i, i, ..., ...]
//! ```
//!
//! Decoding strips the prefixes in a single pass, producing the flat index
//! array together with `cell_offsets`/`cell_counts` so that any cell can be
//! looked up in O(1). Points and voxels store one index per cell; streams
//! written as `[1, i, 1, i, ...]` pairs are accepted as well.

use serde::{Deserialize, Serialize};

use crate::header::{Bounds, KeyDataHeader};
use crate::loader::{IoError, IoResult};
use crate::topology::MeshTopology;

/// A named per-vertex scalar array with its value range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarArray {
    pub name: String,
    pub values: Vec<f32>,
    pub min: f32,
    pub max: f32,
}

impl ScalarArray {
    /// Create an array, computing min/max from the finite values
    pub fn new(name: impl Into<String>, values: Vec<f32>) -> Self {
        let (min, max) = value_range(&values);
        Self {
            name: name.into(),
            values,
            min,
            max,
        }
    }
}

/// A named per-vertex 3-vector array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorArray {
    pub name: String,
    pub values: Vec<[f32; 3]>,
}

impl VectorArray {
    pub fn new(name: impl Into<String>, values: Vec<[f32; 3]>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

fn value_range(values: &[f32]) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in values.iter().filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }
    if min > max {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}

/// Decoded geometry and per-vertex data for one key data object
#[derive(Debug, Clone, PartialEq)]
pub struct RawDataset {
    topology: MeshTopology,
    num_points: usize,
    vertices: Vec<[f32; 3]>,
    dimensions: Option<[usize; 3]>,
    indices: Vec<i32>,
    cell_offsets: Vec<usize>,
    cell_counts: Vec<usize>,
    scalars: Vec<ScalarArray>,
    vectors: Vec<VectorArray>,
    bounds: Bounds,
}

/// Little-endian 4-byte word reader over a body buffer
struct WordReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> WordReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, cursor: 0 }
    }

    fn word(&mut self) -> [u8; 4] {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[self.cursor..self.cursor + 4]);
        self.cursor += 4;
        word
    }

    fn f32s(&mut self, count: usize) -> Vec<f32> {
        (0..count).map(|_| f32::from_le_bytes(self.word())).collect()
    }

    fn i32s(&mut self, count: usize) -> Vec<i32> {
        (0..count).map(|_| i32::from_le_bytes(self.word())).collect()
    }

    fn vec3s(&mut self, count: usize) -> Vec<[f32; 3]> {
        (0..count)
            .map(|_| {
                [
                    f32::from_le_bytes(self.word()),
                    f32::from_le_bytes(self.word()),
                    f32::from_le_bytes(self.word()),
                ]
            })
            .collect()
    }
}

/// Flattened cell tables produced from an index stream
#[derive(Debug, Default)]
struct CellTables {
    indices: Vec<i32>,
    offsets: Vec<usize>,
    counts: Vec<usize>,
}

/// Strip per-cell length prefixes in one linear scan
fn scan_prefixed_cells(stream: &[i32], num_cells: usize) -> IoResult<CellTables> {
    let mut tables = CellTables {
        indices: Vec::with_capacity(stream.len().saturating_sub(num_cells)),
        offsets: Vec::with_capacity(num_cells),
        counts: Vec::with_capacity(num_cells),
    };

    let mut src = 0usize;
    let mut dst = 0usize;
    for cell in 0..num_cells {
        let count = *stream.get(src).ok_or_else(|| {
            IoError::InvalidCells(format!(
                "Index stream ended at cell {} of {}",
                cell, num_cells
            ))
        })?;
        if count < 0 {
            return Err(IoError::InvalidCells(format!(
                "Cell {} has negative vertex count {}",
                cell, count
            )));
        }
        let count = count as usize;
        let start = src + 1;
        let end = start + count;
        if end > stream.len() {
            return Err(IoError::InvalidCells(format!(
                "Cell {} needs {} indices but only {} remain",
                cell,
                count,
                stream.len() - start
            )));
        }

        tables.offsets.push(dst);
        tables.counts.push(count);
        tables.indices.extend_from_slice(&stream[start..end]);

        src = end;
        dst += count;
    }

    if src != stream.len() {
        return Err(IoError::InvalidCells(format!(
            "{} trailing indices after {} cells",
            stream.len() - src,
            num_cells
        )));
    }

    Ok(tables)
}

/// One index per cell, implicit count of one
fn implicit_single_cells(stream: &[i32]) -> CellTables {
    CellTables {
        indices: stream.to_vec(),
        offsets: (0..stream.len()).collect(),
        counts: vec![1; stream.len()],
    }
}

impl RawDataset {
    /// Start building a dataset in memory
    pub fn builder(topology: MeshTopology) -> RawDatasetBuilder {
        RawDatasetBuilder::new(topology)
    }

    /// Decode a header/body pair
    pub fn decode(header: &KeyDataHeader, body: &[u8]) -> IoResult<Self> {
        header.validate()?;

        let expected = header.expected_body_len()?;
        if body.len() != expected {
            return Err(IoError::Truncated {
                expected,
                actual: body.len(),
            });
        }

        let n = header.num_points;
        let mut reader = WordReader::new(body);

        let vertices = reader.vec3s(header.vertex_value_count()? / 3);
        let stream = reader.i32s(header.num_cell_indices);

        let tables = if header.topology.has_prefixed_cells()
            || (header.num_cells > 0 && header.num_cell_indices == 2 * header.num_cells)
        {
            scan_prefixed_cells(&stream, header.num_cells)?
        } else {
            implicit_single_cells(&stream)
        };

        if let Some(bad) = tables
            .indices
            .iter()
            .find(|&&i| i < 0 || i as usize >= n)
        {
            return Err(IoError::InvalidCells(format!(
                "Index {} out of range for {} points",
                bad, n
            )));
        }

        let scalars = header
            .scalar_array_names
            .iter()
            .enumerate()
            .map(|(i, name)| ScalarArray {
                name: name.clone(),
                values: reader.f32s(n),
                min: header.scalar_mins[i],
                max: header.scalar_maxes[i],
            })
            .collect();

        let vectors = header
            .vector_array_names
            .iter()
            .map(|name| VectorArray::new(name.clone(), reader.vec3s(n)))
            .collect();

        Ok(Self {
            topology: header.topology,
            num_points: n,
            vertices,
            dimensions: header.dimensions,
            indices: tables.indices,
            cell_offsets: tables.offsets,
            cell_counts: tables.counts,
            scalars,
            vectors,
            bounds: header.bounds,
        })
    }

    /// Decode from JSON header text and body bytes
    pub fn decode_pair(header_json: &str, body: &[u8]) -> IoResult<Self> {
        let header = KeyDataHeader::from_json(header_json)?;
        Self::decode(&header, body)
    }

    /// Produce the header describing this dataset
    pub fn header(&self) -> KeyDataHeader {
        KeyDataHeader {
            topology: self.topology,
            num_points: self.num_points,
            num_cells: self.cell_counts.len(),
            num_cell_indices: self.encoded_index_stream().len(),
            scalar_array_names: self.scalars.iter().map(|s| s.name.clone()).collect(),
            vector_array_names: self.vectors.iter().map(|v| v.name.clone()).collect(),
            scalar_mins: self.scalars.iter().map(|s| s.min).collect(),
            scalar_maxes: self.scalars.iter().map(|s| s.max).collect(),
            bounds: self.bounds,
            dimensions: self.dimensions,
        }
    }

    fn encoded_index_stream(&self) -> Vec<i32> {
        if !self.topology.has_prefixed_cells() {
            return self.indices.clone();
        }
        let mut stream = Vec::with_capacity(self.indices.len() + self.cell_counts.len());
        for cell in 0..self.cell_counts.len() {
            let indices = self.cell(cell).unwrap_or_default();
            stream.push(indices.len() as i32);
            stream.extend_from_slice(indices);
        }
        stream
    }

    /// Encode the body bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = self.header();
        let mut out = Vec::with_capacity(header.expected_body_len().unwrap_or(0));
        if !self.topology.is_volumetric() {
            for v in &self.vertices {
                for c in v {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
        }
        for i in self.encoded_index_stream() {
            out.extend_from_slice(&i.to_le_bytes());
        }
        for s in &self.scalars {
            for v in &s.values {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        for vec in &self.vectors {
            for v in &vec.values {
                for c in v {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
        }
        out
    }

    pub fn topology(&self) -> MeshTopology {
        self.topology
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn num_cells(&self) -> usize {
        self.cell_counts.len()
    }

    pub fn vertices(&self) -> &[[f32; 3]] {
        &self.vertices
    }

    pub fn dimensions(&self) -> Option<[usize; 3]> {
        self.dimensions
    }

    pub fn indices(&self) -> &[i32] {
        &self.indices
    }

    pub fn cell_offsets(&self) -> &[usize] {
        &self.cell_offsets
    }

    pub fn cell_counts(&self) -> &[usize] {
        &self.cell_counts
    }

    /// Indices of one cell
    pub fn cell(&self, cell: usize) -> Option<&[i32]> {
        let offset = *self.cell_offsets.get(cell)?;
        let count = *self.cell_counts.get(cell)?;
        self.indices.get(offset..offset + count)
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn scalars(&self) -> &[ScalarArray] {
        &self.scalars
    }

    pub fn vectors(&self) -> &[VectorArray] {
        &self.vectors
    }

    pub fn scalar(&self, name: &str) -> Option<&ScalarArray> {
        self.scalars.iter().find(|s| s.name == name)
    }

    pub fn vector(&self, name: &str) -> Option<&VectorArray> {
        self.vectors.iter().find(|v| v.name == name)
    }

    pub fn scalar_names(&self) -> impl Iterator<Item = &str> {
        self.scalars.iter().map(|s| s.name.as_str())
    }

    pub fn vector_names(&self) -> impl Iterator<Item = &str> {
        self.vectors.iter().map(|v| v.name.as_str())
    }
}

/// Builder for in-memory datasets
#[derive(Debug, Clone)]
pub struct RawDatasetBuilder {
    topology: MeshTopology,
    vertices: Vec<[f32; 3]>,
    dimensions: Option<[usize; 3]>,
    cells: Vec<Vec<i32>>,
    scalars: Vec<ScalarArray>,
    vectors: Vec<VectorArray>,
    bounds: Option<Bounds>,
}

impl RawDatasetBuilder {
    pub fn new(topology: MeshTopology) -> Self {
        Self {
            topology,
            vertices: Vec::new(),
            dimensions: None,
            cells: Vec::new(),
            scalars: Vec::new(),
            vectors: Vec::new(),
            bounds: None,
        }
    }

    pub fn vertices(mut self, vertices: Vec<[f32; 3]>) -> Self {
        self.vertices = vertices;
        self
    }

    /// Voxel grid dimensions (volumetric topology)
    pub fn dimensions(mut self, dimensions: [usize; 3]) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn cell(mut self, indices: &[i32]) -> Self {
        self.cells.push(indices.to_vec());
        self
    }

    pub fn cells(mut self, cells: impl IntoIterator<Item = Vec<i32>>) -> Self {
        self.cells.extend(cells);
        self
    }

    pub fn scalar(mut self, name: impl Into<String>, values: Vec<f32>) -> Self {
        self.scalars.push(ScalarArray::new(name, values));
        self
    }

    pub fn vector(mut self, name: impl Into<String>, values: Vec<[f32; 3]>) -> Self {
        self.vectors.push(VectorArray::new(name, values));
        self
    }

    pub fn bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn build(self) -> IoResult<RawDataset> {
        let num_points = match (self.topology.is_volumetric(), self.dimensions) {
            (true, Some(d)) => d[0] * d[1] * d[2],
            (true, None) => {
                return Err(IoError::InvalidHeader(
                    "Voxel topology requires dimensions".to_string(),
                ))
            }
            (false, _) => self.vertices.len(),
        };

        let mut cells = self.cells;
        if cells.is_empty() && !self.topology.has_prefixed_cells() {
            cells = (0..num_points as i32).map(|i| vec![i]).collect();
        }

        let mut tables = CellTables::default();
        for cell in &cells {
            if !self.topology.has_prefixed_cells() && cell.len() != 1 {
                return Err(IoError::InvalidCells(format!(
                    "{} cells hold exactly one index, got {}",
                    self.topology,
                    cell.len()
                )));
            }
            tables.offsets.push(tables.indices.len());
            tables.counts.push(cell.len());
            tables.indices.extend_from_slice(cell);
        }

        if let Some(bad) = tables
            .indices
            .iter()
            .find(|&&i| i < 0 || i as usize >= num_points)
        {
            return Err(IoError::InvalidCells(format!(
                "Index {} out of range for {} points",
                bad, num_points
            )));
        }

        for s in &self.scalars {
            if s.values.len() != num_points {
                return Err(IoError::LengthMismatch {
                    name: s.name.clone(),
                    expected: num_points,
                    actual: s.values.len(),
                });
            }
        }
        for v in &self.vectors {
            if v.values.len() != num_points {
                return Err(IoError::LengthMismatch {
                    name: v.name.clone(),
                    expected: num_points,
                    actual: v.values.len(),
                });
            }
        }

        let bounds = match (self.bounds, self.dimensions) {
            (Some(b), _) => b,
            (None, Some(d)) if self.topology.is_volumetric() => {
                Bounds::from_min_max([0.0; 3], [d[0] as f32, d[1] as f32, d[2] as f32])
            }
            _ => Bounds::from_points(&self.vertices).unwrap_or_default(),
        };

        Ok(RawDataset {
            topology: self.topology,
            num_points,
            vertices: if self.topology.is_volumetric() {
                Vec::new()
            } else {
                self.vertices
            },
            dimensions: self.dimensions,
            indices: tables.indices,
            cell_offsets: tables.offsets,
            cell_counts: tables.counts,
            scalars: self.scalars,
            vectors: self.vectors,
            bounds,
        })
    }
}
