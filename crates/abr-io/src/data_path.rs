//! Data path addressing
//!
//! Every data entity is identified by a slash-delimited path:
//!
//! - `Organization/Dataset` addresses a dataset
//! - `Organization/Dataset/KeyData/Name` addresses a key data object
//! - `Organization/Dataset/ScalarVar/Name` addresses a scalar variable
//! - `Organization/Dataset/VectorVar/Name` addresses a vector variable
//!
//! Paths are the only identity key for data entities. The accessors here
//! never panic on malformed input: they log a warning and return `None`,
//! so callers can treat a bad path as "not found".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Segment separator
pub const SEPARATOR: char = '/';

/// Kind of entity a data path addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataPathType {
    ScalarVar,
    VectorVar,
    KeyData,
    Dataset,
}

impl DataPathType {
    /// The token used in the third path segment
    pub fn as_str(&self) -> &'static str {
        match self {
            DataPathType::ScalarVar => "ScalarVar",
            DataPathType::VectorVar => "VectorVar",
            DataPathType::KeyData => "KeyData",
            DataPathType::Dataset => "Dataset",
        }
    }

    /// Number of segments a well-formed path of this type has
    pub fn segment_count(&self) -> usize {
        match self {
            DataPathType::Dataset => 2,
            _ => 4,
        }
    }
}

impl fmt::Display for DataPathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataPathType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ScalarVar" => Ok(DataPathType::ScalarVar),
            "VectorVar" => Ok(DataPathType::VectorVar),
            "KeyData" => Ok(DataPathType::KeyData),
            "Dataset" => Ok(DataPathType::Dataset),
            other => Err(format!("Unknown data path type: {}", other)),
        }
    }
}

/// Split a path into its segments
pub fn parts(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).collect()
}

fn part(path: &str, index: usize, min_segments: usize) -> Option<&str> {
    let segments = parts(path);
    if segments.len() < min_segments || segments.iter().any(|s| s.is_empty()) {
        tracing::warn!(
            "Data path `{}` has {} segments, expected at least {}",
            path,
            segments.len(),
            min_segments
        );
        return None;
    }
    segments.get(index).copied()
}

/// Join two path fragments with exactly one separator between them
pub fn join(base: &str, segment: &str) -> String {
    if base.ends_with(SEPARATOR) {
        format!("{}{}", base, segment)
    } else {
        format!("{}{}{}", base, SEPARATOR, segment)
    }
}

/// Build a typed path below a dataset path (`Org/Dataset` + type + name)
pub fn join_typed(dataset_path: &str, path_type: DataPathType, name: &str) -> String {
    join(&join(dataset_path, path_type.as_str()), name)
}

/// Build a full four-segment path
pub fn make_path(organization: &str, dataset: &str, path_type: DataPathType, name: &str) -> String {
    join_typed(&join(organization, dataset), path_type, name)
}

/// First segment
pub fn organization(path: &str) -> Option<&str> {
    part(path, 0, 2)
}

/// Second segment
pub fn dataset(path: &str) -> Option<&str> {
    part(path, 1, 2)
}

/// Type of a four-segment path
pub fn path_type(path: &str) -> Option<DataPathType> {
    let token = part(path, 2, 4)?;
    match token.parse() {
        Ok(path_type) => Some(path_type),
        Err(e) => {
            tracing::warn!("Data path `{}`: {}", path, e);
            None
        }
    }
}

/// Last segment of a four-segment path
pub fn name(path: &str) -> Option<&str> {
    part(path, 3, 4)
}

/// The `Organization/Dataset` prefix of any path
pub fn dataset_path(path: &str) -> Option<String> {
    let org = organization(path)?;
    let dataset = dataset(path)?;
    Some(join(org, dataset))
}

/// Check that a path matches the convention for its type
pub fn follows_convention(path: &str, path_type: DataPathType) -> bool {
    let segments = parts(path);
    if segments.iter().any(|s| s.is_empty()) {
        return false;
    }
    match path_type {
        DataPathType::Dataset => segments.len() == 2,
        other => segments.len() == 4 && segments[2] == other.as_str(),
    }
}

/// Human-readable convention for a path type
pub fn convention(path_type: DataPathType) -> String {
    match path_type {
        DataPathType::Dataset => "Organization/Dataset".to_string(),
        other => format!("Organization/Dataset/{}/Name", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments() {
        let path = "TACC/GulfOfMexico/ScalarVar/temperature";
        assert_eq!(organization(path), Some("TACC"));
        assert_eq!(dataset(path), Some("GulfOfMexico"));
        assert_eq!(path_type(path), Some(DataPathType::ScalarVar));
        assert_eq!(name(path), Some("temperature"));
    }

    #[test]
    fn test_dataset_path_round_trip() {
        let path = "Org/Dataset/ScalarVar/Foo";
        let ds = dataset_path(path).unwrap();
        assert_eq!(ds, "Org/Dataset");
        assert_eq!(join_typed(&ds, DataPathType::ScalarVar, "Foo"), path);
    }

    #[test]
    fn test_join_trailing_separator() {
        assert_eq!(join("Org/", "Dataset"), "Org/Dataset");
        assert_eq!(join("Org", "Dataset"), "Org/Dataset");
    }

    #[test]
    fn test_make_path() {
        assert_eq!(
            make_path("Org", "DS", DataPathType::KeyData, "surface"),
            "Org/DS/KeyData/surface"
        );
    }

    #[test]
    fn test_follows_convention() {
        assert!(follows_convention("Org/DS", DataPathType::Dataset));
        assert!(follows_convention("Org/DS/KeyData/a", DataPathType::KeyData));
        assert!(!follows_convention("Org/DS/KeyData/a", DataPathType::ScalarVar));
        assert!(!follows_convention("Org/DS/KeyData", DataPathType::KeyData));
        assert!(!follows_convention("Org/DS/a", DataPathType::Dataset));
        assert!(!follows_convention("Org//KeyData/a", DataPathType::KeyData));
    }

    #[test]
    fn test_malformed_paths_are_not_found() {
        assert_eq!(name("Org/DS"), None);
        assert_eq!(path_type("Org/DS/Bogus/x"), None);
        assert_eq!(dataset_path("justone"), None);
        assert_eq!(organization(""), None);
    }

    #[test]
    fn test_convention_strings() {
        assert_eq!(convention(DataPathType::Dataset), "Organization/Dataset");
        assert_eq!(
            convention(DataPathType::VectorVar),
            "Organization/Dataset/VectorVar/Name"
        );
    }
}
