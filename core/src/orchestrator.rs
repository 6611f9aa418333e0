//! The orchestrator — owns one State Tree and the phase active on it.
//!
//! EXECUTION ORDER per action (fixed, never reordered):
//!   1. phase.validate       reject without mutation on any error
//!   2. phase.process        diffs computed, nothing applied yet
//!   3. exit diffs           only when the action ends the phase
//!   4. Diff Engine apply    then snapshot and checksum refresh, immediately
//!   5. next phase on_enter  applied and refreshed the same way
//!   6. action log append    host path only
//!
//! RULES:
//!   - One action runs to completion before the next starts.
//!   - The phase never sees a pre-mutation snapshot after its own action
//!     has been applied.
//!   - The RNG seed comes from the action, stamped by the host.

use crate::{
    action::Action,
    action_log::{ActionLog, ActionLogEntry},
    checksum::ChecksumCache,
    config::GameSetup,
    diff::{DiffEngine, DiffFailure, DiffReport, StateChange},
    effect::GameEffect,
    error::{SyncError, SyncResult},
    model::{self, paths, STATE_FORMAT_VERSION},
    phase::{self, Phase, PhaseKind, Validation},
    rng::{GameRng, RngBank, RngDraw},
    snapshot::Snapshot,
    state::StateTree,
    types::{Checksum, Sequence},
};
use serde_json::json;

/// What an accepted action did on the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sequence:      Sequence,
    /// The action as stamped with its RNG seed.
    pub action:        Action,
    pub diffs:         Vec<StateChange>,
    pub effects:       Vec<GameEffect>,
    pub draws:         Vec<RngDraw>,
    pub checksum:      Checksum,
    pub diff_failures: Vec<DiffFailure>,
}

/// An action run against the local tree without being logged.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub diffs:   Vec<StateChange>,
    pub effects: Vec<GameEffect>,
    pub draws:   Vec<RngDraw>,
    pub report:  DiffReport,
}

pub struct Orchestrator {
    tree:      StateTree,
    snapshot:  Snapshot,
    phase:     Box<dyn Phase>,
    rng_bank:  RngBank,
    log:       ActionLog,
    checksums: ChecksumCache,
    /// Checksum of `tree`, refreshed after every applied batch.
    checksum:  Checksum,
}

impl Orchestrator {
    /// Build a fresh game from `setup`. Without a seed the orchestrator
    /// self-seeds; the chosen seed is written to `meta.seed`.
    pub fn new(setup: &GameSetup) -> SyncResult<Self> {
        let seed = match setup.seed {
            Some(seed) => seed,
            None => {
                let seed = GameRng::from_entropy().seed();
                log::info!("no seed configured, self-seeded with {seed}");
                seed
            }
        };
        Self::from_tree(initial_tree(setup, seed)?)
    }

    /// Adopt an existing tree, e.g. a replica's confirmed state.
    pub fn from_tree(tree: StateTree) -> SyncResult<Self> {
        let snapshot = tree.snapshot();
        let seed = model::master_seed(&snapshot)
            .ok_or_else(|| anyhow::anyhow!("state tree carries no {}", paths::META_SEED))?;
        let mut checksums = ChecksumCache::new();
        let checksum = checksums.checksum(&tree);
        Ok(Self {
            phase:    phase::for_snapshot(snapshot.clone()),
            rng_bank: RngBank::new(seed),
            log:      ActionLog::new(),
            snapshot,
            tree,
            checksums,
            checksum,
        })
    }

    /// Two-player test game on the default board.
    pub fn build_test(seed: u64) -> SyncResult<Self> {
        Self::new(&GameSetup::default_test(seed))
    }

    // ── Host path ──────────────────────────────────────────────────

    /// Validate, process, apply and log one action. On any error the
    /// tree, the phase and the log are untouched.
    pub fn execute(&mut self, action: Action) -> SyncResult<Executed> {
        let sequence = self.next_sequence();
        let action = action.with_seed(self.rng_bank.seed_for(sequence));
        let run = self.run(&action)?;
        let checksum = self.checksum;

        self.log.append(ActionLogEntry {
            sequence,
            action:             action.clone(),
            diffs:              run.diffs.clone(),
            rng_draws:          run.draws.clone(),
            resulting_checksum: checksum,
        });
        log::debug!(
            "seq={sequence} {} by {}: {} diffs, checksum={checksum:016x}",
            action.kind.name(),
            action.actor,
            run.diffs.len()
        );

        Ok(Executed {
            sequence,
            action,
            diffs: run.diffs,
            effects: run.effects,
            draws: run.draws,
            checksum,
            diff_failures: run.report.failures,
        })
    }

    // ── Replica path ───────────────────────────────────────────────

    /// Run an already-seeded action locally without logging it.
    /// Used for optimistic prediction.
    pub fn predict(&mut self, action: &Action) -> SyncResult<Run> {
        self.run(action)
    }

    /// Apply diffs computed elsewhere: host confirmations, caller previews.
    pub fn apply_diffs(&mut self, diffs: &[StateChange]) -> DiffReport {
        let report = self.apply(diffs);
        self.sync_phase();
        report
    }

    /// Replace the tree with `snapshot` (rollback).
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.tree = snapshot.to_tree();
        self.checksums.clear();
        self.checksum = self.checksums.checksum(&self.tree);
        self.snapshot = snapshot;
        self.phase.refresh(self.snapshot.clone());
        self.sync_phase();
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Latest applied state.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.clone()
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn phase(&self) -> &dyn Phase {
        self.phase.as_ref()
    }

    pub fn phase_kind(&self) -> PhaseKind {
        self.phase.kind()
    }

    /// Dry-run validation against the current snapshot.
    pub fn validate(&self, action: &Action) -> Validation {
        self.phase.validate(action)
    }

    pub fn action_log(&self) -> &ActionLog {
        &self.log
    }

    pub fn rng_bank(&self) -> RngBank {
        self.rng_bank
    }

    pub fn master_seed(&self) -> u64 {
        self.rng_bank.master_seed()
    }

    /// Global sequence the next executed action will occupy.
    pub fn next_sequence(&self) -> Sequence {
        self.log.len() as Sequence + 1
    }

    // ── Internals ──────────────────────────────────────────────────

    fn run(&mut self, action: &Action) -> SyncResult<Run> {
        let validation = self.phase.validate(action);
        if !validation.is_ok() {
            log::warn!(
                "{} by {} rejected in {}: {}",
                action.kind.name(),
                action.actor,
                self.phase.kind(),
                validation.errors.join("; ")
            );
            return Err(SyncError::Validation { errors: validation.errors });
        }

        let seed = action
            .rng_seed
            .ok_or(SyncError::MissingSeed { sequence: action.sequence })?;
        let mut rng = GameRng::new(seed);
        let outcome = self.phase.process(action, &mut rng)?;
        let transition = outcome.transition();

        let mut diffs = match transition {
            Some(_) => self.phase.on_exit(),
            None => Vec::new(),
        };
        diffs.extend(outcome.diffs);
        let mut report = self.apply(&diffs);

        if let Some(next) = transition {
            log::info!("phase {} -> {next}", self.phase.kind());
            self.phase = phase::instantiate(next, self.snapshot.clone());
            let enter = self.phase.on_enter();
            report.merge(self.apply(&enter));
            diffs.extend(enter);
        }

        Ok(Run {
            diffs,
            effects: outcome.effects,
            draws: rng.into_draws(),
            report,
        })
    }

    /// Apply through the Diff Engine, then refresh the snapshot the phase
    /// reads. Malformed ops are logged; the rest of the batch still lands.
    fn apply(&mut self, diffs: &[StateChange]) -> DiffReport {
        let report = DiffEngine::apply(&mut self.tree, diffs);
        for failure in &report.failures {
            log::warn!("diff op {} skipped: {}", failure.index, failure.to_error());
        }
        self.checksums.invalidate(diffs);
        self.checksum = self.checksums.checksum(&self.tree);
        self.snapshot = self.tree.snapshot();
        self.phase.refresh(self.snapshot.clone());
        report
    }

    /// Follow `phase.current` after diffs this process did not compute.
    fn sync_phase(&mut self) {
        let kind = model::turn(&self.snapshot).current;
        if kind != self.phase.kind() {
            log::debug!("replica phase {} -> {kind}", self.phase.kind());
            self.phase = phase::instantiate(kind, self.snapshot.clone());
        }
    }
}

/// The diffs that build a new game's tree from `{}`.
pub fn initial_diffs(setup: &GameSetup, seed: u64) -> Vec<StateChange> {
    let board = &setup.board;
    let mut diffs = vec![
        StateChange::set(paths::META_SEED, seed),
        StateChange::set(paths::META_FORMAT, STATE_FORMAT_VERSION),
        StateChange::set(paths::META_PLAYERS, json!(setup.players)),
        StateChange::set(
            paths::BOARD,
            json!({
                "width":      board.width,
                "height":     board.height,
                "objectives": board.objectives,
                "max_units":  setup.max_units_per_player,
            }),
        ),
        StateChange::set(paths::ENTITIES, json!({})),
    ];
    for player in &setup.players {
        diffs.push(StateChange::set(
            paths::player(player),
            json!({ "cp": 0, "vp": 0, "deployed": 0 }),
        ));
    }
    diffs.push(StateChange::set(paths::PHASE_CURRENT, PhaseKind::Setup.name()));
    diffs.push(StateChange::set(paths::PHASE_ROUND, 0));
    diffs
}

/// A new game's tree, built through the Diff Engine.
pub fn initial_tree(setup: &GameSetup, seed: u64) -> SyncResult<StateTree> {
    let mut tree = StateTree::new();
    let report = DiffEngine::apply(&mut tree, &initial_diffs(setup, seed));
    match report.failures.first() {
        Some(failure) => Err(failure.to_error()),
        None => Ok(tree),
    }
}
