//! The canonical state
//!
//! Every write goes through a pending copy that must validate before it
//! replaces the current state. Each accepted change pushes its diff onto
//! the undo stack and clears the redo stack.

use abr_core::state::{StateDiff, StateDocument};
use abr_core::StateError;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Schema validation failed - {0}")]
    Invalid(#[from] StateError),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Split a request path into state path segments
///
/// Segments wrapped in double quotes are kept whole, so keys containing
/// `/` (such as data paths) can be addressed: `dataRanges/scalarRanges/"Org/DS/ScalarVar/T"`.
pub fn parse_state_path(path: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for (i, chunk) in path.split('"').enumerate() {
        if i % 2 == 0 {
            parts.extend(chunk.split('/').filter(|s| !s.is_empty()).map(str::to_string));
        } else if !chunk.is_empty() {
            parts.push(chunk.to_string());
        }
    }
    parts
}

pub struct StateStore {
    state: Value,
    schema_version: String,
    undo: Vec<StateDiff>,
    redo: Vec<StateDiff>,
}

impl StateStore {
    pub fn new(schema_version: impl Into<String>) -> Self {
        let schema_version = schema_version.into();
        Self {
            state: Self::default_state(&schema_version),
            schema_version,
            undo: Vec::new(),
            redo: Vec::new(),
        }
    }

    fn default_state(version: &str) -> Value {
        serde_json::json!({ "version": version })
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    /// Value at a path, `None` when any segment is missing
    pub fn get_path(&self, path: &[String]) -> Option<&Value> {
        path.iter().try_fold(&self.state, |value, key| match value {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Set a value, creating intermediate objects; returns whether anything changed
    pub fn set_path(&mut self, path: &[String], value: Value) -> StoreResult<bool> {
        let mut pending = self.state.clone();
        insert_at(&mut pending, path, value);
        self.commit(pending)
    }

    /// Remove the value at a path; the empty path resets to an empty state
    pub fn remove_path(&mut self, path: &[String]) -> StoreResult<bool> {
        let mut pending = self.state.clone();
        match path.split_last() {
            None => pending = Self::default_state(&self.schema_version),
            Some((last, parents)) => {
                let parent = parents
                    .iter()
                    .try_fold(&mut pending, |v, key| v.as_object_mut().and_then(|m| m.get_mut(key)));
                if let Some(Value::Object(map)) = parent {
                    map.remove(last);
                }
            }
        }
        self.commit(pending)
    }

    /// Remove a key from every object in the state
    pub fn remove_all(&mut self, key: &str) -> StoreResult<bool> {
        let mut pending = self.state.clone();
        remove_key_everywhere(&mut pending, key);
        self.commit(pending)
    }

    pub fn undo(&mut self) -> StoreResult<()> {
        let diff = self.undo.pop().ok_or(StoreError::NothingToUndo)?;
        diff.revert(&mut self.state);
        self.redo.push(diff);
        tracing::info!("Undo ({} left)", self.undo.len());
        Ok(())
    }

    pub fn redo(&mut self) -> StoreResult<()> {
        let diff = self.redo.pop().ok_or(StoreError::NothingToRedo)?;
        diff.apply(&mut self.state);
        self.undo.push(diff);
        tracing::info!("Redo ({} left)", self.redo.len());
        Ok(())
    }

    fn commit(&mut self, pending: Value) -> StoreResult<bool> {
        let validated = StateDocument::from_value(pending.clone(), &self.schema_version)?;
        validated.document.check_inputs()?;
        let diff = StateDiff::compute(&self.state, &pending);
        if diff.is_empty() {
            return Ok(false);
        }
        tracing::debug!("State changed at {} paths", diff.len());
        self.undo.push(diff);
        self.redo.clear();
        self.state = pending;
        Ok(true)
    }
}

fn insert_at(target: &mut Value, path: &[String], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        let child = map
            .entry(first.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        insert_at(child, rest, value);
    }
}

fn remove_key_everywhere(value: &mut Value, key: &str) {
    if let Value::Object(map) = value {
        map.remove(key);
        for child in map.values_mut() {
            remove_key_everywhere(child, key);
        }
    }
}
