//! Setup — players deploy entities. Runs once per game.

use super::{end_phase, not_legal, process_error, Phase, PhaseKind, PhaseOutcome, Validation};
use crate::{
    action::{Action, ActionKind},
    diff::StateChange,
    effect::GameEffect,
    error::SyncResult,
    model::{self, paths, Entity, EntityFlags, Buffs},
    rng::GameRng,
    snapshot::Snapshot,
};

pub struct SetupPhase {
    snapshot: Snapshot,
}

impl SetupPhase {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    fn validate_deploy(&self, action: &Action) -> Validation {
        let ActionKind::DeployEntity { entity_id, profile, pos } = &action.kind else {
            return not_legal(self.kind(), action);
        };
        let snap = &self.snapshot;
        let mut v = Validation::ok();

        v.require(
            model::players(snap).contains(&action.actor),
            format!("'{}' is not a seated player", action.actor),
        );
        v.require(
            !entity_id.is_empty() && !entity_id.contains(|c| matches!(c, '.' | '[' | ']')),
            format!("entity id '{entity_id}' must be non-empty and free of path separators"),
        );
        v.require(
            model::entity(snap, entity_id).is_none(),
            format!("entity '{entity_id}' already exists"),
        );
        for problem in profile.problems() {
            v.push(problem);
        }

        match model::board(snap) {
            Some(board) => {
                v.require(board.contains(pos), format!("({}, {}) is off the board", pos.x, pos.y));
                let deployed = model::player_state(snap, &action.actor).deployed;
                v.require(
                    deployed < board.max_units,
                    format!("'{}' already deployed {deployed} of {} units", action.actor, board.max_units),
                );
            }
            None => v.push("board not initialised"),
        }

        if model::entities(snap).values().any(|e| e.pos == *pos) {
            v.push(format!("({}, {}) is occupied", pos.x, pos.y));
        }
        v
    }

    fn validate_end(&self, action: &Action) -> Validation {
        let snap = &self.snapshot;
        let players = model::players(snap);
        let mut v = Validation::ok();
        v.require(
            players.contains(&action.actor),
            format!("'{}' is not a seated player", action.actor),
        );
        for player in &players {
            v.require(
                model::player_state(snap, player).deployed > 0,
                format!("'{player}' has not deployed any units"),
            );
        }
        v
    }
}

impl Phase for SetupPhase {
    fn kind(&self) -> PhaseKind { PhaseKind::Setup }

    fn snapshot(&self) -> &Snapshot { &self.snapshot }

    fn refresh(&mut self, snapshot: Snapshot) { self.snapshot = snapshot; }

    fn validate(&self, action: &Action) -> Validation {
        match &action.kind {
            ActionKind::DeployEntity { .. } => self.validate_deploy(action),
            ActionKind::EndPhase => self.validate_end(action),
            _ => not_legal(self.kind(), action),
        }
    }

    fn process(&self, action: &Action, _rng: &mut GameRng) -> SyncResult<PhaseOutcome> {
        match &action.kind {
            ActionKind::DeployEntity { entity_id, profile, pos } => {
                let entity = Entity {
                    owner:   action.actor.clone(),
                    pos:     *pos,
                    profile: *profile,
                    wounds:  profile.wounds,
                    flags:   EntityFlags::default(),
                    buffs:   Buffs::default(),
                };
                let deployed = model::player_state(&self.snapshot, &action.actor).deployed;
                Ok(PhaseOutcome {
                    diffs: vec![
                        StateChange::set(paths::entity(entity_id), serde_json::to_value(&entity)?),
                        StateChange::set(paths::player_field(&action.actor, "deployed"), deployed + 1),
                    ],
                    effects: vec![GameEffect::EntityDeployed {
                        entity_id: entity_id.clone(),
                        owner:     action.actor.clone(),
                        pos:       *pos,
                    }],
                })
            }
            ActionKind::EndPhase => end_phase(&self.snapshot, self.kind()),
            other => Err(process_error(self.kind(), format!("unexpected '{}'", other.name()))),
        }
    }

    fn is_complete(&self) -> bool {
        let players = model::players(&self.snapshot);
        !players.is_empty()
            && players
                .iter()
                .all(|p| model::player_state(&self.snapshot, p).deployed > 0)
    }
}
