//! Movement step — each of the active player's entities may move once.

use super::{
    end_phase, not_legal, process_error, require_active_player, Phase, PhaseKind, PhaseOutcome,
    Validation,
};
use crate::{
    action::{Action, ActionKind},
    diff::StateChange,
    effect::GameEffect,
    error::SyncResult,
    model::{self, paths, Position},
    rng::GameRng,
    snapshot::Snapshot,
    types::EntityId,
};

pub struct MovementPhase {
    snapshot: Snapshot,
}

impl MovementPhase {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    fn validate_move(&self, action: &Action, entity_id: &EntityId, to: &Position) -> Validation {
        let snap = &self.snapshot;
        let mut v = Validation::ok();
        require_active_player(snap, action, &mut v);

        let Some(entity) = model::entity(snap, entity_id) else {
            v.push(format!("no entity '{entity_id}'"));
            return v;
        };
        v.require(
            entity.owner == action.actor,
            format!("'{entity_id}' belongs to '{}'", entity.owner),
        );
        v.require(!entity.flags.moved, format!("'{entity_id}' has already moved"));

        match model::board(snap) {
            Some(board) => v.require(board.contains(to), format!("({}, {}) is off the board", to.x, to.y)),
            None => v.push("board not initialised"),
        }

        let allowance = entity.movement_allowance();
        v.require(
            entity.pos.within(to, allowance),
            format!("'{entity_id}' can move at most {allowance}"),
        );

        let blocked = model::entities(snap)
            .iter()
            .any(|(id, other)| id != entity_id && other.pos == *to);
        v.require(!blocked, format!("({}, {}) is occupied", to.x, to.y));
        v
    }
}

impl Phase for MovementPhase {
    fn kind(&self) -> PhaseKind { PhaseKind::MovementStep }

    fn snapshot(&self) -> &Snapshot { &self.snapshot }

    fn refresh(&mut self, snapshot: Snapshot) { self.snapshot = snapshot; }

    fn validate(&self, action: &Action) -> Validation {
        match &action.kind {
            ActionKind::MoveEntity { entity_id, to } => self.validate_move(action, entity_id, to),
            ActionKind::EndPhase => {
                let mut v = Validation::ok();
                require_active_player(&self.snapshot, action, &mut v);
                v
            }
            _ => not_legal(self.kind(), action),
        }
    }

    fn process(&self, action: &Action, _rng: &mut GameRng) -> SyncResult<PhaseOutcome> {
        match &action.kind {
            ActionKind::MoveEntity { entity_id, to } => {
                let entity = model::entity(&self.snapshot, entity_id)
                    .ok_or_else(|| process_error(self.kind(), format!("'{entity_id}' vanished")))?;
                Ok(PhaseOutcome {
                    diffs: vec![
                        StateChange::set(paths::entity_field(entity_id, "pos"), serde_json::to_value(to)?),
                        StateChange::set(paths::entity_field(entity_id, "flags.moved"), true),
                    ],
                    effects: vec![GameEffect::EntityMoved {
                        entity_id: entity_id.clone(),
                        from:      entity.pos,
                        to:        *to,
                    }],
                })
            }
            ActionKind::EndPhase => end_phase(&self.snapshot, self.kind()),
            other => Err(process_error(self.kind(), format!("unexpected '{}'", other.name()))),
        }
    }

    fn is_complete(&self) -> bool {
        let Some(active) = model::turn(&self.snapshot).active_player else {
            return true;
        };
        model::entities(&self.snapshot)
            .values()
            .filter(|e| e.owner == active)
            .all(|e| e.flags.moved)
    }
}
