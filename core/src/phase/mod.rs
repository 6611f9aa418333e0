//! Phase state machine.
//!
//! RULES:
//!   - Exactly one phase is active per process. It is derived from
//!     `phase.current` in the State Tree, never from ambient state.
//!   - validate() is pure over the phase's cached snapshot.
//!   - process() computes diffs; it never applies them.
//!   - Transitions happen only through an explicit EndPhase action.
//!     should_auto_advance() is false for every phase in every state.
//!
//! TURN ORDER (fixed):
//!   Setup (once)
//!   then per player, in meta.players order:
//!     CommandStep → MovementStep → AttackStep → ResolutionStep → ScoringStep

mod attack;
mod command;
mod movement;
mod resolution;
mod scoring;
mod setup;

pub use attack::AttackPhase;
pub use command::CommandPhase;
pub use movement::MovementPhase;
pub use resolution::ResolutionPhase;
pub use scoring::ScoringPhase;
pub use setup::SetupPhase;

use crate::{
    action::Action,
    diff::StateChange,
    effect::GameEffect,
    error::{SyncError, SyncResult},
    model::{self, paths},
    rng::GameRng,
    snapshot::Snapshot,
    types::PlayerId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Setup,
    CommandStep,
    MovementStep,
    AttackStep,
    ResolutionStep,
    ScoringStep,
}

impl PhaseKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Setup          => "setup",
            Self::CommandStep    => "command_step",
            Self::MovementStep   => "movement_step",
            Self::AttackStep     => "attack_step",
            Self::ResolutionStep => "resolution_step",
            Self::ScoringStep    => "scoring_step",
        }
    }

    /// The phase that follows this one in the per-player cycle.
    pub fn next(&self) -> PhaseKind {
        match self {
            Self::Setup          => Self::CommandStep,
            Self::CommandStep    => Self::MovementStep,
            Self::MovementStep   => Self::AttackStep,
            Self::AttackStep     => Self::ResolutionStep,
            Self::ResolutionStep => Self::ScoringStep,
            Self::ScoringStep    => Self::CommandStep,
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of `Phase::validate`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub errors: Vec<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self { errors: vec![reason.into()] }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, reason: impl Into<String>) {
        self.errors.push(reason.into());
    }

    /// Record `reason` unless `cond` holds.
    pub fn require(&mut self, cond: bool, reason: impl Into<String>) {
        if !cond {
            self.push(reason);
        }
    }

    pub fn into_result(self) -> SyncResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(SyncError::Validation { errors: self.errors })
        }
    }
}

/// Result of a successful `Phase::process`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseOutcome {
    pub diffs:   Vec<StateChange>,
    pub effects: Vec<GameEffect>,
}

impl PhaseOutcome {
    /// The phase this outcome transitions into, if it ends the phase.
    pub fn transition(&self) -> Option<PhaseKind> {
        self.effects.iter().find_map(|e| match e {
            GameEffect::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
    }
}

/// The contract every phase fulfills.
pub trait Phase: Send {
    fn kind(&self) -> PhaseKind;

    /// The snapshot validate() and process() read from.
    fn snapshot(&self) -> &Snapshot;

    /// Replace the cached snapshot. Called after every diff application.
    fn refresh(&mut self, snapshot: Snapshot);

    /// Is `action` legal right now? Never mutates.
    fn validate(&self, action: &Action) -> Validation;

    /// Compute the diffs for a validated action. Randomness only via `rng`.
    fn process(&self, action: &Action, rng: &mut GameRng) -> SyncResult<PhaseOutcome>;

    /// Always false. Phases end only on an explicit EndPhase action.
    fn should_auto_advance(&self) -> bool {
        false
    }

    /// UI hint: "you may end the phase now". Never triggers a transition.
    fn is_complete(&self) -> bool;

    /// Diffs establishing phase-local state, applied right after entry.
    fn on_enter(&self) -> Vec<StateChange> {
        Vec::new()
    }

    /// Diffs tearing down phase-local state, applied right before the
    /// transition diffs.
    fn on_exit(&self) -> Vec<StateChange> {
        Vec::new()
    }
}

/// Build the phase object for `kind` over `snapshot`.
pub fn instantiate(kind: PhaseKind, snapshot: Snapshot) -> Box<dyn Phase> {
    match kind {
        PhaseKind::Setup          => Box::new(SetupPhase::new(snapshot)),
        PhaseKind::CommandStep    => Box::new(CommandPhase::new(snapshot)),
        PhaseKind::MovementStep   => Box::new(MovementPhase::new(snapshot)),
        PhaseKind::AttackStep     => Box::new(AttackPhase::new(snapshot)),
        PhaseKind::ResolutionStep => Box::new(ResolutionPhase::new(snapshot)),
        PhaseKind::ScoringStep    => Box::new(ScoringPhase::new(snapshot)),
    }
}

/// Build the phase named by the tree's `phase.current`.
pub fn for_snapshot(snapshot: Snapshot) -> Box<dyn Phase> {
    let kind = model::turn(&snapshot).current;
    instantiate(kind, snapshot)
}

// ── Helpers shared by the concrete phases ──────────────────────────

pub(crate) fn not_legal(kind: PhaseKind, action: &Action) -> Validation {
    Validation::fail(format!(
        "'{}' is not legal during {kind}",
        action.kind.name()
    ))
}

/// Outside Setup only the active player may act.
pub(crate) fn require_active_player(snapshot: &Snapshot, action: &Action, v: &mut Validation) {
    let turn = model::turn(snapshot);
    match turn.active_player {
        Some(active) if active == action.actor => {}
        Some(active) => v.push(format!(
            "'{}' is not the active player ('{active}' is)",
            action.actor
        )),
        None => v.push("no active player".to_string()),
    }
}

pub(crate) fn process_error(kind: PhaseKind, reason: impl Into<String>) -> SyncError {
    SyncError::Process {
        phase:  kind.name().to_string(),
        reason: reason.into(),
    }
}

/// Who acts next and in which round when `from` ends.
fn next_turn(snapshot: &Snapshot, from: PhaseKind) -> SyncResult<(PlayerId, u32)> {
    let players = model::players(snapshot);
    let first = players
        .first()
        .cloned()
        .ok_or_else(|| process_error(from, "no players seated"))?;
    let turn = model::turn(snapshot);

    match from {
        PhaseKind::Setup => Ok((first, 1)),
        PhaseKind::ScoringStep => {
            let active = turn
                .active_player
                .ok_or_else(|| process_error(from, "no active player"))?;
            let index = players
                .iter()
                .position(|p| *p == active)
                .ok_or_else(|| process_error(from, format!("active player '{active}' not seated")))?;
            if index + 1 < players.len() {
                Ok((players[index + 1].clone(), turn.round))
            } else {
                Ok((first, turn.round + 1))
            }
        }
        _ => {
            let active = turn
                .active_player
                .ok_or_else(|| process_error(from, "no active player"))?;
            Ok((active, turn.round))
        }
    }
}

/// Diffs and effect for leaving `from`. Exit and entry diffs are added
/// by the orchestrator around these.
pub(crate) fn end_phase(snapshot: &Snapshot, from: PhaseKind) -> SyncResult<PhaseOutcome> {
    let to = from.next();
    let (active_player, round) = next_turn(snapshot, from)?;
    Ok(PhaseOutcome {
        diffs: vec![
            StateChange::set(paths::PHASE_CURRENT, to.name()),
            StateChange::set(paths::PHASE_ACTIVE, active_player.clone()),
            StateChange::set(paths::PHASE_ROUND, round),
        ],
        effects: vec![GameEffect::PhaseChanged {
            from,
            to,
            active_player,
            round,
        }],
    })
}
