//! Snapshots — immutable point-in-time copies of the State Tree.
//!
//! Phases hold one to validate against; the client reconciler holds one
//! as its rollback point. A snapshot is replaced, never edited.

use crate::{
    state::{lookup, parse_path, StateTree},
    types::Checksum,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    root: Arc<Value>,
}

impl Snapshot {
    pub(crate) fn new(root: Value) -> Self {
        Self { root: Arc::new(root) }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let segments = parse_path(path).ok()?;
        lookup(&self.root, &segments)
    }

    /// Deserialize the subtree at `path`. Absent or mistyped reads as None.
    pub fn read<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.get(path)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// A fresh mutable tree with this snapshot's contents.
    pub fn to_tree(&self) -> StateTree {
        StateTree::from_value((*self.root).clone())
    }

    pub fn checksum(&self) -> Checksum {
        crate::checksum::checksum_value(&self.root)
    }
}
