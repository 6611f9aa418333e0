//! The action log — ordered, append-only record of accepted actions.
//!
//! Total order of entries defines the canonical replay.

use crate::{
    action::Action,
    diff::StateChange,
    error::{SyncError, SyncResult},
    rng::RngDraw,
    types::{Checksum, Sequence},
};
use serde::{Deserialize, Serialize};

/// Version of the export format. Bump on any incompatible change.
pub const LOG_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub sequence:           Sequence,
    pub action:             Action,
    pub diffs:              Vec<StateChange>,
    pub rng_draws:          Vec<RngDraw>,
    pub resulting_checksum: Checksum,
}

#[derive(Debug, Clone, Default)]
pub struct ActionLog {
    entries: Vec<ActionLogEntry>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next entry. Sequences are dense; a replica that joined
    /// mid-game starts from the sequence it was welcomed at.
    pub fn append(&mut self, entry: ActionLogEntry) {
        if let Some(last) = self.entries.last() {
            if entry.sequence != last.sequence + 1 {
                log::warn!("log sequence jumps {} -> {}", last.sequence, entry.sequence);
            }
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ActionLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_checksum(&self) -> Option<Checksum> {
        self.entries.last().map(|e| e.resulting_checksum)
    }

    /// Entries after `sequence`.
    pub fn since(&self, sequence: Sequence) -> &[ActionLogEntry] {
        let start = self.entries.partition_point(|e| e.sequence <= sequence);
        &self.entries[start..]
    }

    pub fn first_sequence(&self) -> Option<Sequence> {
        self.entries.first().map(|e| e.sequence)
    }

    pub fn export(&self) -> ActionLogExport {
        ActionLogExport {
            version: LOG_FORMAT_VERSION,
            entries: self
                .entries
                .iter()
                .map(|e| ExportRecord {
                    sequence: e.sequence,
                    action:   e.action.clone(),
                    diffs:    e.diffs.clone(),
                    checksum: e.resulting_checksum,
                })
                .collect(),
        }
    }
}

/// Stable, versioned export consumed by debugging and replay tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogExport {
    pub version: u32,
    pub entries: Vec<ExportRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub sequence: Sequence,
    pub action:   Action,
    pub diffs:    Vec<StateChange>,
    pub checksum: Checksum,
}

impl ActionLogExport {
    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        let export: ActionLogExport = serde_json::from_str(json)?;
        if export.version != LOG_FORMAT_VERSION {
            return Err(SyncError::Other(anyhow::anyhow!(
                "unsupported action log version {} (expected {LOG_FORMAT_VERSION})",
                export.version
            )));
        }
        Ok(export)
    }
}
