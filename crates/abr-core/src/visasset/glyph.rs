//! Glyph and texture VisAssets
//!
//! A glyph is a list of levels of detail, each an OBJ mesh with an optional
//! normal map. Surface and line textures are a PNG with an optional normal
//! map. Images are decoded to RGBA8.

use crate::error::{VisAssetError, VisAssetResult};

/// Triangle mesh with per-vertex normals
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Parse a Wavefront OBJ file
    ///
    /// Only `v`, `vn` and `f` records are read. Polygons are
    /// fan-triangulated. When the file has no normals (or faces reference
    /// them inconsistently), flat face normals are accumulated per vertex.
    pub fn from_obj(text: &str) -> VisAssetResult<Self> {
        let mut positions: Vec<[f32; 3]> = Vec::new();
        let mut file_normals: Vec<[f32; 3]> = Vec::new();
        let mut faces: Vec<Vec<(usize, Option<usize>)>> = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let bad = |message: &str| VisAssetError::Decode {
                file: "obj".to_string(),
                message: format!("line {}: {}", line_no + 1, message),
            };
            match fields.next() {
                Some("v") => positions.push(parse_vec3(&mut fields).ok_or_else(|| bad("bad vertex"))?),
                Some("vn") => {
                    file_normals.push(parse_vec3(&mut fields).ok_or_else(|| bad("bad normal"))?)
                }
                Some("f") => {
                    let face = fields
                        .map(|f| parse_face_vertex(f, positions.len(), file_normals.len()))
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| bad("bad face"))?;
                    if face.len() < 3 {
                        return Err(bad("face has fewer than 3 vertices"));
                    }
                    faces.push(face);
                }
                _ => {}
            }
        }

        let mut mesh = Mesh {
            positions: Vec::new(),
            normals: Vec::new(),
            indices: Vec::new(),
        };
        let use_file_normals = !file_normals.is_empty()
            && faces.iter().flatten().all(|(_, n)| n.is_some());

        if use_file_normals {
            // Split vertices per (position, normal) pair
            let mut seen = std::collections::HashMap::new();
            for face in &faces {
                let ids: Vec<u32> = face
                    .iter()
                    .map(|&(p, n)| {
                        let n = n.unwrap_or(0);
                        *seen.entry((p, n)).or_insert_with(|| {
                            mesh.positions.push(positions[p]);
                            mesh.normals.push(file_normals[n]);
                            (mesh.positions.len() - 1) as u32
                        })
                    })
                    .collect();
                fan(&ids, &mut mesh.indices);
            }
        } else {
            mesh.positions = positions;
            for face in &faces {
                let ids: Vec<u32> = face.iter().map(|&(p, _)| p as u32).collect();
                fan(&ids, &mut mesh.indices);
            }
            mesh.normals = vertex_normals(&mesh.positions, &mesh.indices);
        }

        Ok(mesh)
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

fn parse_vec3<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Option<[f32; 3]> {
    let x = fields.next()?.parse().ok()?;
    let y = fields.next()?.parse().ok()?;
    let z = fields.next()?.parse().ok()?;
    Some([x, y, z])
}

/// Resolve a 1-based (or negative, relative) OBJ index
fn resolve_index(token: &str, count: usize) -> Option<usize> {
    let i: i64 = token.parse().ok()?;
    let resolved = if i < 0 { count as i64 + i } else { i - 1 };
    (resolved >= 0 && (resolved as usize) < count).then_some(resolved as usize)
}

fn parse_face_vertex(token: &str, positions: usize, normals: usize) -> Option<(usize, Option<usize>)> {
    let mut parts = token.split('/');
    let p = resolve_index(parts.next()?, positions)?;
    let _uv = parts.next();
    let n = match parts.next() {
        Some(n) if !n.is_empty() => Some(resolve_index(n, normals)?),
        _ => None,
    };
    Some((p, n))
}

fn fan(ids: &[u32], out: &mut Vec<u32>) {
    for i in 1..ids.len().saturating_sub(1) {
        out.extend_from_slice(&[ids[0], ids[i], ids[i + 1]]);
    }
}

/// Area-weighted vertex normals
pub fn vertex_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut normals = vec![[0.0f32; 3]; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        if a >= positions.len() || b >= positions.len() || c >= positions.len() {
            continue;
        }
        let n = cross(sub(positions[b], positions[a]), sub(positions[c], positions[a]));
        for v in [a, b, c] {
            for k in 0..3 {
                normals[v][k] += n[k];
            }
        }
    }
    normals.iter().map(|n| normalize(*n)).collect()
}

pub(crate) fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub(crate) fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len > 0.0 {
        [v[0] / len, v[1] / len, v[2] / len]
    } else {
        [0.0, 0.0, 1.0]
    }
}

/// RGBA8 image
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Texture {
    /// Decode a PNG (or any format the `image` crate was built with)
    pub fn from_png(bytes: &[u8], file: &str) -> VisAssetResult<Self> {
        let image = image::load_from_memory(bytes).map_err(|e| VisAssetError::Decode {
            file: file.to_string(),
            message: e.to_string(),
        })?;
        let rgba = image.to_rgba8();
        Ok(Self {
            width: rgba.width(),
            height: rgba.height(),
            rgba: rgba.into_raw(),
        })
    }

    /// A single-color texture
    pub fn solid(color: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            rgba: color.to_vec(),
        }
    }
}

/// One level of detail of a glyph
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphLod {
    pub mesh: Mesh,
    pub normal_map: Option<Texture>,
}

/// A glyph: meshes from most to least detailed
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub lods: Vec<GlyphLod>,
}

impl Glyph {
    /// Most detailed level
    pub fn mesh(&self) -> Option<&Mesh> {
        self.lods.first().map(|lod| &lod.mesh)
    }

    /// Unit octahedron, used when no glyph is bound
    pub fn octahedron() -> Self {
        let positions = vec![
            [0.5, 0.0, 0.0],
            [-0.5, 0.0, 0.0],
            [0.0, 0.5, 0.0],
            [0.0, -0.5, 0.0],
            [0.0, 0.0, 0.5],
            [0.0, 0.0, -0.5],
        ];
        let indices = vec![
            0, 2, 4, 2, 1, 4, 1, 3, 4, 3, 0, 4, 2, 0, 5, 1, 2, 5, 3, 1, 5, 0, 3, 5,
        ];
        let normals = vertex_normals(&positions, &indices);
        Self {
            lods: vec![GlyphLod {
                mesh: Mesh {
                    positions,
                    normals,
                    indices,
                },
                normal_map: None,
            }],
        }
    }
}

/// Surface or line texture with optional normal map
#[derive(Debug, Clone, PartialEq)]
pub struct PatternTexture {
    pub texture: Texture,
    pub normal_map: Option<Texture>,
}
