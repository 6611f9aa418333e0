//! Effects — what a processed action did, for UI and logging.
//!
//! Effects are informational. Replicas never apply them; the diffs are
//! the only thing that changes state.

use crate::{
    model::{Buff, Position},
    phase::PhaseKind,
    rng::DrawKind,
    types::{EntityId, PlayerId},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEffect {
    EntityDeployed {
        entity_id: EntityId,
        owner:     PlayerId,
        pos:       Position,
    },
    CommandPointSpent {
        player:    PlayerId,
        entity_id: EntityId,
        buff:      Buff,
        remaining: i64,
    },
    EntityMoved {
        entity_id: EntityId,
        from:      Position,
        to:        Position,
    },
    AttackDeclared {
        attacker: EntityId,
        target:   EntityId,
    },
    DiceRolled {
        entity_id: EntityId,
        kind:      DrawKind,
        values:    Vec<u32>,
    },
    WoundsInflicted {
        target:    EntityId,
        amount:    i64,
        remaining: i64,
    },
    EntityDestroyed {
        entity_id: EntityId,
    },
    ObjectiveScored {
        player:    PlayerId,
        objective: usize,
        vp:        i64,
    },
    PhaseChanged {
        from:          PhaseKind,
        to:            PhaseKind,
        active_player: PlayerId,
        round:         u32,
    },
}
