//! Structural checksum of a State Tree.
//!
//! Cheap, not cryptographic. Computed over a canonical walk of the
//! document: map keys are visited in sorted order, every node is
//! prefixed with a type tag, so `{"a":1}` and `{"a":"1"}` differ.
//!
//! The root's top-level entries are hashed one by one and the section
//! hashes folded together. `ChecksumCache` keeps the section hashes
//! between batches and rehashes only the sections a batch touched.

use crate::{
    diff::StateChange,
    state::{parse_path, StateTree},
    types::Checksum,
};
use serde_json::Value;
use std::collections::BTreeMap;
use xxhash_rust::xxh3::Xxh3;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_ARRAY: u8 = 4;
const TAG_OBJECT: u8 = 5;

pub fn checksum(tree: &StateTree) -> Checksum {
    checksum_value(tree.root())
}

pub fn checksum_value(value: &Value) -> Checksum {
    match value {
        Value::Object(map) => fold(map.iter().map(|(key, child)| (key.as_str(), hash_node(child)))),
        other => hash_node(other),
    }
}

/// Section hashes of the last tree seen, keyed by top-level entry.
#[derive(Debug, Default, Clone)]
pub struct ChecksumCache {
    sections: BTreeMap<String, Checksum>,
}

impl ChecksumCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the sections `diffs` may have changed.
    pub fn invalidate(&mut self, diffs: &[StateChange]) {
        // Malformed paths never reach the tree.
        for diff in diffs {
            if let Some(first) = parse_path(diff.path()).ok().and_then(|s| s.into_iter().next()) {
                self.sections.remove(&first);
            }
        }
    }

    pub fn clear(&mut self) {
        self.sections.clear();
    }

    /// Same value as `checksum(tree)`, rehashing only uncached sections.
    pub fn checksum(&mut self, tree: &StateTree) -> Checksum {
        let Value::Object(map) = tree.root() else {
            self.sections.clear();
            return checksum(tree);
        };
        self.sections.retain(|key, _| map.contains_key(key));
        for (key, child) in map {
            if !self.sections.contains_key(key) {
                self.sections.insert(key.clone(), hash_node(child));
            }
        }
        fold(self.sections.iter().map(|(key, hash)| (key.as_str(), *hash)))
    }

    pub fn cached_sections(&self) -> usize {
        self.sections.len()
    }
}

/// Both `serde_json::Map` (BTreeMap-backed) and the cache iterate in
/// key order, so the fold is canonical.
fn fold<'a>(sections: impl ExactSizeIterator<Item = (&'a str, Checksum)>) -> Checksum {
    let mut hasher = Xxh3::new();
    hasher.update(&[TAG_OBJECT]);
    hasher.update(&(sections.len() as u64).to_le_bytes());
    for (key, hash) in sections {
        write_str(&mut hasher, key);
        hasher.update(&hash.to_le_bytes());
    }
    hasher.digest()
}

fn hash_node(value: &Value) -> Checksum {
    let mut hasher = Xxh3::new();
    feed(&mut hasher, value);
    hasher.digest()
}

fn feed(hasher: &mut Xxh3, value: &Value) {
    match value {
        Value::Null => hasher.update(&[TAG_NULL]),
        Value::Bool(b) => hasher.update(&[TAG_BOOL, u8::from(*b)]),
        Value::Number(n) => {
            hasher.update(&[TAG_NUMBER]);
            write_str(hasher, &n.to_string());
        }
        Value::String(s) => {
            hasher.update(&[TAG_STRING]);
            write_str(hasher, s);
        }
        Value::Array(items) => {
            hasher.update(&[TAG_ARRAY]);
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                feed(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.update(&[TAG_OBJECT]);
            hasher.update(&(map.len() as u64).to_le_bytes());
            // serde_json::Map is BTreeMap-backed: iteration is key-sorted.
            for (key, child) in map {
                write_str(hasher, key);
                feed(hasher, child);
            }
        }
    }
}

fn write_str(hasher: &mut Xxh3, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":{"b":2,"a":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":{"a":3,"b":2},"x":1}"#).unwrap();
        assert_eq!(checksum_value(&a), checksum_value(&b));
    }

    #[test]
    fn types_are_distinguished() {
        assert_ne!(checksum_value(&json!({"a": 1})), checksum_value(&json!({"a": "1"})));
        assert_ne!(checksum_value(&json!([["a"], []])), checksum_value(&json!([[], ["a"]])));
    }

    #[test]
    fn cache_rehashes_only_touched_sections_and_agrees_with_a_full_walk() {
        let mut tree = StateTree::from_value(json!({
            "board": {"width": 24},
            "entities": {"a1": {"wounds": 3}},
            "players": {"P1": {"vp": 0}},
        }));
        let mut cache = ChecksumCache::new();
        assert_eq!(cache.checksum(&tree), checksum(&tree));
        assert_eq!(cache.cached_sections(), 3);

        let batch = vec![
            StateChange::set("entities.a1.wounds", 2),
            StateChange::remove("players"),
            StateChange::set("phase.resolved", true),
        ];
        crate::diff::DiffEngine::apply(&mut tree, &batch);
        cache.invalidate(&batch);
        assert_eq!(cache.cached_sections(), 1, "only board survives");
        assert_eq!(cache.checksum(&tree), checksum(&tree));
        assert_eq!(cache.cached_sections(), 3);

        cache.invalidate(&[StateChange::set("a..b", 1)]);
        assert_eq!(cache.cached_sections(), 3);
    }
}
