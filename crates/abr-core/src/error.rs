//! Error types for abr-core
//!
//! Provides error handling for:
//! - Dataset import and lookup
//! - VisAsset fetching and decoding
//! - State parsing, validation and loading
//! - Input resolution and assignment
//! - Render passes

use abr_io::IoError;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum AbrError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("VisAsset error: {0}")]
    VisAsset(#[from] VisAssetError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Errors related to datasets and key data
#[derive(Error, Debug)]
pub enum DataError {
    /// Path does not follow the data path convention
    #[error("Invalid data path: {0}")]
    InvalidPath(String),

    /// No loader could provide the key data
    #[error("Key data not found: {0}")]
    NotFound(String),

    /// Dataset has not been imported
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    /// Variable does not exist in the dataset
    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Errors related to VisAssets
#[derive(Error, Debug)]
pub enum VisAssetError {
    /// No fetcher could provide the VisAsset
    #[error("VisAsset not found: {0}")]
    NotFound(Uuid),

    /// Manifest names a type the engine cannot decode
    #[error("Unsupported VisAsset type: {0}")]
    UnsupportedType(String),

    /// `artifact.json` could not be parsed
    #[error("Invalid VisAsset manifest: {0}")]
    InvalidManifest(String),

    /// A payload file is missing from the VisAsset
    #[error("VisAsset {uuid} is missing file {file}")]
    MissingFile { uuid: Uuid, file: String },

    /// A payload file could not be decoded
    #[error("Failed to decode {file}: {message}")]
    Decode { file: String, message: String },

    /// Gradient members are not all the same VisAsset type
    #[error("Gradient {0} mixes VisAsset types")]
    MixedGradient(Uuid),

    /// Gradient stop count does not match its members
    #[error("Gradient {uuid} has {points} points for {members} VisAssets")]
    GradientPoints {
        uuid: Uuid,
        points: usize,
        members: usize,
    },

    /// Transport failure while fetching
    #[error("Fetch failed: {0}")]
    Fetch(String),
}

/// Errors related to state documents
#[derive(Error, Debug)]
pub enum StateError {
    /// The state text is not valid JSON
    #[error("Failed to parse state: {0}")]
    Parse(String),

    /// The state does not satisfy the schema
    #[error("Schema validation failed - {path}: {message}")]
    Schema { path: String, message: String },

    /// The state declares a schema version this engine does not accept
    #[error("Unsupported state version {found} (expected {expected})")]
    UnsupportedVersion { found: String, expected: String },

    /// A state loader could not provide or store the state
    #[error("Failed to load state from {locator}: {message}")]
    Load { locator: String, message: String },

    /// A second update arrived while one was being applied
    #[error("A state update is already in progress")]
    UpdateInProgress,
}

impl StateError {
    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        StateError::Schema {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn load(locator: impl Into<String>, message: impl ToString) -> Self {
        StateError::Load {
            locator: locator.into(),
            message: message.to_string(),
        }
    }
}

/// Errors related to impression inputs
#[derive(Error, Debug)]
pub enum InputError {
    /// Plate type is not a known impression kind
    #[error("Unknown plate type: {0}")]
    UnknownPlateType(String),

    /// Impression kind has no input of this name
    #[error("{plate} has no input named '{input}'")]
    UnknownInput { plate: String, input: String },

    /// Input value is of the wrong kind for the slot
    #[error("Input '{input}' expects {expected}, got {actual}")]
    TypeMismatch {
        input: String,
        expected: String,
        actual: String,
    },

    /// Primitive value string could not be parsed
    #[error("Invalid primitive value '{value}' for {kind}")]
    InvalidPrimitive { kind: String, value: String },

    /// Input type string is not recognised
    #[error("Unknown input type: {0}")]
    UnknownInputType(String),
}

/// Errors related to render passes
#[derive(Error, Debug)]
pub enum RenderError {
    /// The render host rejected an operation
    #[error("Render host error: {0}")]
    Host(String),

    /// Key data bound to an impression is not resident
    #[error("Key data not loaded: {0}")]
    MissingKeyData(String),

    /// Arrays referenced by an impression do not match its key data
    #[error("Inconsistent geometry for {path}: {message}")]
    Geometry { path: String, message: String },
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Value is out of valid range
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type alias for engine operations
pub type AbrResult<T> = Result<T, AbrError>;

/// Result type alias for data operations
pub type DataResult<T> = Result<T, DataError>;

/// Result type alias for VisAsset operations
pub type VisAssetResult<T> = Result<T, VisAssetError>;

/// Result type alias for state operations
pub type StateResult<T> = Result<T, StateError>;

/// Result type alias for input operations
pub type InputResult<T> = Result<T, InputError>;

/// Result type alias for render operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Result type alias for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_display() {
        let err = StateError::schema("impressions/abc", "missing plateType");
        assert_eq!(
            err.to_string(),
            "Schema validation failed - impressions/abc: missing plateType"
        );
    }

    #[test]
    fn test_wrapped_io_error() {
        let err: DataError = IoError::FileNotFound("a.json".to_string()).into();
        assert!(err.to_string().contains("a.json"));
        let err: AbrError = err.into();
        assert!(matches!(err, AbrError::Data(DataError::Io(_))));
    }

    #[test]
    fn test_gradient_error_display() {
        let err = VisAssetError::GradientPoints {
            uuid: Uuid::nil(),
            points: 3,
            members: 2,
        };
        assert!(err.to_string().contains("3 points for 2"));
    }
}
