//! Attack step — the active player declares attacks. Declarations are
//! phase-local state kept under `phase.pending_attacks`; nothing is
//! rolled until the resolution step.

use super::{
    end_phase, not_legal, process_error, require_active_player, Phase, PhaseKind, PhaseOutcome,
    Validation,
};
use crate::{
    action::{Action, ActionKind},
    diff::StateChange,
    effect::GameEffect,
    error::SyncResult,
    model::{self, paths},
    rng::GameRng,
    snapshot::Snapshot,
    types::EntityId,
};

pub struct AttackPhase {
    snapshot: Snapshot,
}

impl AttackPhase {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    fn validate_declare(&self, action: &Action, attacker: &EntityId, target: &EntityId) -> Validation {
        let snap = &self.snapshot;
        let mut v = Validation::ok();
        require_active_player(snap, action, &mut v);

        let (Some(from), Some(to)) = (model::entity(snap, attacker), model::entity(snap, target)) else {
            v.push(format!("'{attacker}' and '{target}' must both exist"));
            return v;
        };
        v.require(
            from.owner == action.actor,
            format!("'{attacker}' belongs to '{}'", from.owner),
        );
        v.require(to.owner != action.actor, format!("'{target}' is a friendly unit"));
        v.require(!from.flags.attacked, format!("'{attacker}' has already attacked"));
        v.require(
            from.pos.within(&to.pos, from.profile.range),
            format!("'{target}' is out of range of '{attacker}'"),
        );
        v
    }
}

impl Phase for AttackPhase {
    fn kind(&self) -> PhaseKind { PhaseKind::AttackStep }

    fn snapshot(&self) -> &Snapshot { &self.snapshot }

    fn refresh(&mut self, snapshot: Snapshot) { self.snapshot = snapshot; }

    fn validate(&self, action: &Action) -> Validation {
        match &action.kind {
            ActionKind::DeclareAttack { attacker, target } => {
                self.validate_declare(action, attacker, target)
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
            ActionKind::DeclareAttack { attacker, target } => Ok(PhaseOutcome {
                diffs: vec![
                    StateChange::set(paths::entity_field(attacker, "flags.attacked"), true),
                    StateChange::set(paths::pending_attack(attacker), target.clone()),
                ],
                effects: vec![GameEffect::AttackDeclared {
                    attacker: attacker.clone(),
                    target:   target.clone(),
                }],
            }),
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
            .all(|e| e.flags.attacked)
    }
}
