use crate::{
    model::{Buff, Position, UnitProfile},
    types::{EntityId, PlayerId, Sequence},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every action kind a peer can submit. Shared by sender and receivers,
/// so an unknown kind cannot be sent or silently ignored.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ActionKind {
    // ── Setup ─────────────────────────────────────
    DeployEntity {
        entity_id: EntityId,
        profile:   UnitProfile,
        pos:       Position,
    },

    // ── Command step ──────────────────────────────
    SpendCommandPoint {
        entity_id: EntityId,
        buff:      Buff,
    },

    // ── Movement step ─────────────────────────────
    MoveEntity {
        entity_id: EntityId,
        to:        Position,
    },

    // ── Attack step ───────────────────────────────
    DeclareAttack {
        attacker: EntityId,
        target:   EntityId,
    },

    // ── Resolution step ───────────────────────────
    ResolveAttacks,

    // ── Scoring step ──────────────────────────────
    ScoreObjectives,

    // ── Any phase ─────────────────────────────────
    EndPhase,
}

impl ActionKind {
    /// Stable name used in logs and the action_log.action_type column.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeployEntity { .. }      => "deploy_entity",
            Self::SpendCommandPoint { .. } => "spend_command_point",
            Self::MoveEntity { .. }        => "move_entity",
            Self::DeclareAttack { .. }     => "declare_attack",
            Self::ResolveAttacks           => "resolve_attacks",
            Self::ScoreObjectives          => "score_objectives",
            Self::EndPhase                 => "end_phase",
        }
    }
}

/// A single intent to mutate state. Immutable once submitted; the host
/// produces a stamped copy carrying the RNG seed for its sequence slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind:      ActionKind,
    pub actor:     PlayerId,
    pub timestamp: DateTime<Utc>,
    /// Submitting peer's local sequence number.
    pub sequence:  Sequence,
    /// Seed chosen by the host. Present on every confirmed action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng_seed:  Option<u64>,
}

impl Action {
    pub fn new(
        actor: impl Into<PlayerId>,
        sequence: Sequence,
        kind: ActionKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            actor: actor.into(),
            timestamp,
            sequence,
            rng_seed: None,
        }
    }

    /// Copy of this action with `seed` stamped in.
    pub fn with_seed(&self, seed: u64) -> Self {
        Self { rng_seed: Some(seed), ..self.clone() }
    }

    /// Copy of this action numbered as the submitting peer's `sequence`.
    pub fn with_sequence(&self, sequence: Sequence) -> Self {
        Self { sequence, ..self.clone() }
    }

    pub fn is_end_phase(&self) -> bool {
        matches!(self.kind, ActionKind::EndPhase)
    }
}
