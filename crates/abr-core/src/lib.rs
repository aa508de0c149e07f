//! abr-core - State-driven visualization engine
//!
//! This crate turns a JSON state document into a set of rendered data
//! impressions and keeps the two in sync as the state is edited:
//!
//! - **Data**: datasets, key data and scalar/vector variables with ranges
//! - **VisAssets**: colormaps, glyphs and textures from a chain of fetchers
//! - **Impressions**: Glyphs, Ribbons, Surfaces and Volumes with typed inputs
//! - **State**: schema validation, structural diffing and incremental apply
//! - **Render**: a four-sweep render pass against a pluggable render host
//! - **Runtime**: worker-thread prefetch and a latest-wins update slot
//!
//! # Update flow
//!
//! ```text
//! state JSON ─> StateDocument::parse ─> StateDiff ─> apply_state ─> dirty flags
//!                                                                      │
//!                                      RenderHost <─ Renderer::render <┘
//! ```

pub mod config;
pub mod data_manager;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod impression;
pub mod indexer;
pub mod input;
pub mod primitive;
pub mod render;
pub mod runtime;
pub mod scene;
pub mod state;
pub mod visasset;

pub use config::EngineConfig;
pub use data_manager::{fetch_raw_dataset, DataManager, SharedLoader};
pub use dataset::{DataRange, Dataset, KeyData, KeyDataKind, ScalarDataVariable, VectorDataVariable};
pub use engine::Engine;
pub use error::{
    AbrError, AbrResult, ConfigError, DataError, InputError, RenderError, StateError, VisAssetError,
};
pub use impression::{DataImpression, DirtyFlags, ImpressionKind, RenderHints};
pub use input::{AbrInput, InputGenre, InputType, RawAbrInput};
pub use primitive::{Primitive, PrimitiveGradient, PrimitiveKind};
pub use render::{HeadlessHost, ObjectId, RenderHost, RenderInfo, RenderReport, Renderer};
pub use runtime::{OutboundSender, Runtime, RuntimeHandle, StateRequest};
pub use scene::{ImpressionGroup, Light, Scene};
pub use state::{ApplyOutcome, StateDiff, StateDocument, StateLoader};
pub use visasset::{Color, FetchSource, VisAsset, VisAssetManager, VisAssetType};
