//! The Diff Engine — the only writer of a StateTree.
//!
//! RULES:
//!   - Ops apply strictly in the order given.
//!   - `set` creates missing intermediate levels as maps; it never drops
//!     an op because a parent key is absent.
//!   - `remove` of an absent key is a no-op, not an error.
//!   - A malformed op is reported and skipped. Ops before and after it in
//!     the same batch stay applied.

use crate::{
    error::SyncError,
    state::{parse_path, StateTree},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One path-addressed mutation instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StateChange {
    Set { path: String, value: Value },
    Remove { path: String },
}

impl StateChange {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set { path: path.into(), value: value.into() }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. } | Self::Remove { path } => path,
        }
    }
}

/// A diff op that could not be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffFailure {
    /// Position of the op in its batch.
    pub index:  usize,
    pub change: StateChange,
    pub reason: String,
}

impl DiffFailure {
    pub fn to_error(&self) -> SyncError {
        SyncError::MalformedPath {
            path:   self.change.path().to_string(),
            reason: self.reason.clone(),
        }
    }
}

/// Outcome of applying one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffReport {
    pub applied:  usize,
    pub failures: Vec<DiffFailure>,
}

impl DiffReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: DiffReport) {
        self.applied += other.applied;
        self.failures.extend(other.failures);
    }
}

pub struct DiffEngine;

impl DiffEngine {
    /// Apply `diffs` to `tree` in order. See module rules for failure
    /// semantics.
    pub fn apply(tree: &mut StateTree, diffs: &[StateChange]) -> DiffReport {
        let mut report = DiffReport::default();
        for (index, change) in diffs.iter().enumerate() {
            let result = match change {
                StateChange::Set { path, value } => set(tree.root_mut(), path, value.clone()),
                StateChange::Remove { path } => remove(tree.root_mut(), path),
            };
            match result {
                Ok(()) => report.applied += 1,
                Err(reason) => report.failures.push(DiffFailure {
                    index,
                    change: change.clone(),
                    reason,
                }),
            }
        }
        report
    }
}

fn set(root: &mut Value, path: &str, value: Value) -> Result<(), String> {
    let segments = parse_path(path)?;
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| "empty path".to_string())?;

    let mut node = root;
    for segment in parents {
        node = match node {
            Value::Object(map) => map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let i = array_index(segment, items.len())?;
                if i == items.len() {
                    items.push(Value::Object(Map::new()));
                }
                &mut items[i]
            }
            other => return Err(not_a_container(segment, other)),
        };
    }

    match node {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            let i = array_index(last, items.len())?;
            if i == items.len() {
                items.push(value);
            } else {
                items[i] = value;
            }
            Ok(())
        }
        other => Err(not_a_container(last, other)),
    }
}

fn remove(root: &mut Value, path: &str) -> Result<(), String> {
    let segments = parse_path(path)?;
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| "empty path".to_string())?;

    let mut node = root;
    for segment in parents {
        node = match node {
            Value::Object(map) => match map.get_mut(segment) {
                Some(child) => child,
                None => return Ok(()),
            },
            Value::Array(items) => {
                let i = segment
                    .parse::<usize>()
                    .map_err(|_| format!("'{segment}' is not an array index"))?;
                match items.get_mut(i) {
                    Some(child) => child,
                    None => return Ok(()),
                }
            }
            other => return Err(not_a_container(segment, other)),
        };
    }

    match node {
        Value::Object(map) => {
            map.remove(last);
            Ok(())
        }
        Value::Array(items) => {
            let i = last
                .parse::<usize>()
                .map_err(|_| format!("'{last}' is not an array index"))?;
            if i < items.len() {
                items.remove(i);
            }
            Ok(())
        }
        other => Err(not_a_container(last, other)),
    }
}

/// Index for a write: existing slot or exactly one past the end.
fn array_index(segment: &str, len: usize) -> Result<usize, String> {
    let i = segment
        .parse::<usize>()
        .map_err(|_| format!("'{segment}' is not an array index"))?;
    if i > len {
        return Err(format!("index {i} beyond array length {len}"));
    }
    Ok(i)
}

fn not_a_container(segment: &str, node: &Value) -> String {
    let kind = match node {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("cannot index {kind} with '{segment}'")
}
