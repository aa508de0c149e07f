//! State documents: schema, diffing, loading and application

pub mod diff;
pub mod document;
pub mod loader;
pub mod parser;

pub use diff::{Edit, EditOp, StateDiff};
pub use document::{
    version_compatible, ImpressionState, SceneState, StateDocument, ValidatedState,
};
#[cfg(feature = "http")]
pub use loader::HttpStateLoader;
pub use loader::{CachingStateLoader, FileStateLoader, RawStateLoader, ResourceStateLoader, StateLoader};
pub use parser::{apply_state, ApplyContext, ApplyOutcome};
