//! Replay tooling over recorded action logs.
//!
//! Two levels:
//!   - replay_diffs: re-apply the recorded diffs, checking every checksum.
//!     Needs no phase logic; this is what a lagging replica does.
//!   - reexecute: re-run the recorded actions through a fresh
//!     orchestrator. Proves that phases and RNG are deterministic.

use crate::{
    action_log::{ActionLogEntry, ExportRecord},
    checksum::checksum,
    config::GameSetup,
    diff::DiffEngine,
    error::{SyncError, SyncResult},
    orchestrator::Orchestrator,
    state::StateTree,
    types::Checksum,
};

#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub tree:      StateTree,
    /// Checksum after each record, in order.
    pub checksums: Vec<Checksum>,
}

pub fn replay_diffs(initial: &StateTree, records: &[ExportRecord]) -> SyncResult<ReplayReport> {
    let mut tree = initial.clone();
    let mut checksums = Vec::with_capacity(records.len());
    for record in records {
        let report = DiffEngine::apply(&mut tree, &record.diffs);
        for failure in &report.failures {
            log::warn!("replay seq={} {}", record.sequence, failure.to_error());
        }
        let actual = checksum(&tree);
        if actual != record.checksum {
            return Err(SyncError::Divergence {
                sequence: record.sequence,
                expected: record.checksum,
                actual,
            });
        }
        checksums.push(actual);
    }
    Ok(ReplayReport { tree, checksums })
}

/// Re-run `entries` from a fresh game. `setup` must carry the seed the
/// log was recorded with.
pub fn reexecute(setup: &GameSetup, entries: &[ActionLogEntry]) -> SyncResult<Orchestrator> {
    if setup.seed.is_none() {
        return Err(SyncError::Other(anyhow::anyhow!("reexecute needs the recorded seed")));
    }
    let mut orchestrator = Orchestrator::new(setup)?;
    for entry in entries {
        let executed = orchestrator.execute(entry.action.clone())?;
        if executed.sequence != entry.sequence || executed.checksum != entry.resulting_checksum {
            return Err(SyncError::Divergence {
                sequence: entry.sequence,
                expected: entry.resulting_checksum,
                actual:   executed.checksum,
            });
        }
        if executed.draws != entry.rng_draws {
            log::warn!("replay seq={} drew differently with equal checksum", entry.sequence);
        }
    }
    Ok(orchestrator)
}
