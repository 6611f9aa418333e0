//! The State Tree — one canonical nested document per process.
//!
//! RULE: Nothing outside diff.rs mutates a StateTree.
//! Readers get `get()` or a Snapshot; writers emit StateChange ops.

use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateTree {
    root: Value,
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTree {
    /// An empty document (`{}`).
    pub fn new() -> Self {
        Self { root: Value::Object(Map::new()) }
    }

    /// Adopt an existing document, e.g. from a Welcome or a stored snapshot.
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub(crate) fn root_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    /// Read the value at a path. Malformed or absent paths read as None.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let segments = parse_path(path).ok()?;
        lookup(&self.root, &segments)
    }

    /// Immutable deep copy of the current tree.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.root.clone())
    }
}

/// Walk already-parsed segments through maps and arrays.
pub(crate) fn lookup<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = match node {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

/// Split a path like `entities.E7.flags.moved` or `board.objectives[2].x`
/// into segments. `[n]` is an alias of `.n`.
pub fn parse_path(path: &str) -> Result<Vec<String>, String> {
    if path.is_empty() {
        return Err("empty path".into());
    }
    let mut segments = Vec::new();
    for part in path.split('.') {
        let (head, mut rest) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            None => (part, ""),
        };
        if head.is_empty() && rest.is_empty() {
            return Err("empty segment".into());
        }
        if !head.is_empty() {
            segments.push(head.to_string());
        } else if segments.is_empty() {
            return Err("path cannot start with an index".into());
        }
        while !rest.is_empty() {
            let close = rest.find(']').ok_or_else(|| "unclosed '['".to_string())?;
            let index = &rest[1..close];
            if index.is_empty() || index.parse::<usize>().is_err() {
                return Err(format!("bad index '[{index}]'"));
            }
            segments.push(index.to_string());
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(format!("unexpected '{rest}' after index"));
            }
        }
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_and_bracketed_paths() {
        assert_eq!(parse_path("a.b.c").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(parse_path("board.objectives[2].x").unwrap(), vec!["board", "objectives", "2", "x"]);
        assert_eq!(parse_path("grid[1][3]").unwrap(), vec!["grid", "1", "3"]);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(parse_path("").is_err());
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a[1").is_err());
        assert!(parse_path("a[x]").is_err());
        assert!(parse_path("a[1]b").is_err());
        assert!(parse_path("[0]").is_err());
    }

    #[test]
    fn get_reads_through_arrays() {
        let tree = StateTree::from_value(serde_json::json!({
            "board": { "objectives": [ {"x": 1}, {"x": 7} ] }
        }));
        assert_eq!(tree.get("board.objectives[1].x"), Some(&serde_json::json!(7)));
        assert_eq!(tree.get("board.objectives.0.x"), Some(&serde_json::json!(1)));
        assert_eq!(tree.get("board.objectives.9"), None);
        assert_eq!(tree.get("board.objectives.0.x.y"), None);
    }
}
