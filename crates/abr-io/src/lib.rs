//! abr-io - Key-data I/O for the abr engine
//!
//! This crate provides the on-disk and on-wire representation of the
//! geometric "key data" that data impressions are built from:
//!
//! - **DataPath**: `Organization/Dataset/Type/Name` addressing
//! - **MeshTopology**: Points, Lines, LineStrip, Triangles, Quads, Voxels
//! - **KeyDataHeader**: the JSON half of a `<name>.json` / `<name>.bin` pair
//! - **RawDataset**: decoded geometry, cell tables and per-vertex arrays
//! - **DataLoader**: file, HTTP and in-memory sources of raw datasets
//!
//! # Binary layout
//!
//! ```text
//! [vertices: 3*N f32] [cell indices: M i32] [scalar_i: N f32]... [vector_i: 3*N f32]...
//! ```
//!
//! Voxel data omits the vertex block. All values are little-endian.

pub mod data_path;
pub mod header;
pub mod histogram;
pub mod loader;
pub mod raw_dataset;
pub mod topology;

pub use data_path::*;
pub use header::*;
pub use histogram::*;
pub use loader::*;
pub use raw_dataset::*;
pub use topology::*;
