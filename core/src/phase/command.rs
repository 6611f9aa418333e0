//! Command step — the active player gains a command point on entry and
//! may spend points to buff their entities. Buffs last through the
//! opponent's turn and lapse when their owner's next command step begins.

use super::{
    end_phase, not_legal, process_error, require_active_player, Phase, PhaseKind, PhaseOutcome,
    Validation,
};
use crate::{
    action::{Action, ActionKind},
    diff::StateChange,
    effect::GameEffect,
    error::SyncResult,
    model::{self, paths, Buff, Buffs},
    rng::GameRng,
    snapshot::Snapshot,
};

pub struct CommandPhase {
    snapshot: Snapshot,
}

impl CommandPhase {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    fn validate_spend(&self, action: &Action, entity_id: &str, buff: Buff) -> Validation {
        let snap = &self.snapshot;
        let mut v = Validation::ok();
        require_active_player(snap, action, &mut v);

        let cp = model::player_state(snap, &action.actor).cp;
        v.require(cp > 0, format!("'{}' has no command points", action.actor));

        match model::entity(snap, entity_id) {
            Some(entity) => {
                v.require(
                    entity.owner == action.actor,
                    format!("'{entity_id}' belongs to '{}'", entity.owner),
                );
                let active = match buff {
                    Buff::Swift => entity.buffs.swift,
                    Buff::Hardened => entity.buffs.hardened,
                };
                v.require(!active, format!("'{entity_id}' is already {}", buff.key()));
            }
            None => v.push(format!("no entity '{entity_id}'")),
        }
        v
    }
}

impl Phase for CommandPhase {
    fn kind(&self) -> PhaseKind { PhaseKind::CommandStep }

    fn snapshot(&self) -> &Snapshot { &self.snapshot }

    fn refresh(&mut self, snapshot: Snapshot) { self.snapshot = snapshot; }

    fn validate(&self, action: &Action) -> Validation {
        match &action.kind {
            ActionKind::SpendCommandPoint { entity_id, buff } => {
                self.validate_spend(action, entity_id, *buff)
            }
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
            ActionKind::SpendCommandPoint { entity_id, buff } => {
                let remaining = model::player_state(&self.snapshot, &action.actor).cp - 1;
                Ok(PhaseOutcome {
                    diffs: vec![
                        StateChange::set(paths::player_field(&action.actor, "cp"), remaining),
                        StateChange::set(
                            paths::entity_field(entity_id, &format!("buffs.{}", buff.key())),
                            true,
                        ),
                    ],
                    effects: vec![GameEffect::CommandPointSpent {
                        player: action.actor.clone(),
                        entity_id: entity_id.clone(),
                        buff: *buff,
                        remaining,
                    }],
                })
            }
            ActionKind::EndPhase => end_phase(&self.snapshot, self.kind()),
            other => Err(process_error(self.kind(), format!("unexpected '{}'", other.name()))),
        }
    }

    fn is_complete(&self) -> bool {
        match model::turn(&self.snapshot).active_player {
            Some(active) => model::player_state(&self.snapshot, &active).cp == 0,
            None => true,
        }
    }

    fn on_enter(&self) -> Vec<StateChange> {
        let Some(active) = model::turn(&self.snapshot).active_player else {
            return Vec::new();
        };
        let cp = model::player_state(&self.snapshot, &active).cp;
        let mut diffs = vec![StateChange::set(paths::player_field(&active, "cp"), cp + 1)];
        for (id, entity) in model::entities(&self.snapshot) {
            if entity.owner == active && entity.buffs != Buffs::default() {
                diffs.push(StateChange::remove(paths::entity_field(&id, "buffs")));
            }
        }
        diffs
    }
}
