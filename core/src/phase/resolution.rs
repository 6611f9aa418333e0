//! Resolution step — roll for every pending declaration.
//!
//! One D6 per attack, hit on `>= hit_on`. A hardened target ignores the
//! first hit of each attack. Declarations resolve in attacker-id order,
//! so every replica draws in the same order from the same seed.

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
    rng::{DrawKind, GameRng},
    snapshot::Snapshot,
};
use std::collections::BTreeMap;

pub struct ResolutionPhase {
    snapshot: Snapshot,
}

impl ResolutionPhase {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    fn resolve(&self, rng: &mut GameRng) -> SyncResult<PhaseOutcome> {
        let snap = &self.snapshot;
        let mut outcome = PhaseOutcome::default();
        // Running wounds, so several attacks on one target stack.
        let mut wounds: BTreeMap<String, i64> = BTreeMap::new();

        for (attacker_id, target_id) in model::pending_attacks(snap) {
            let attacker = model::entity(snap, &attacker_id).ok_or_else(|| {
                process_error(self.kind(), format!("attacker '{attacker_id}' vanished"))
            })?;
            let Some(target) = model::entity(snap, &target_id) else {
                continue;
            };
            let current = *wounds.entry(target_id.clone()).or_insert(target.wounds);
            if current <= 0 {
                continue;
            }

            let rolls = rng.draw(DrawKind::D6, attacker.profile.attacks as usize);
            let hits = rolls.iter().filter(|r| **r >= attacker.profile.hit_on).count() as i64;
            let absorbed = i64::from(target.buffs.hardened && hits > 0);
            let damage = hits - absorbed;
            outcome.effects.push(GameEffect::DiceRolled {
                entity_id: attacker_id.clone(),
                kind:      DrawKind::D6,
                values:    rolls,
            });
            if damage == 0 {
                continue;
            }

            let remaining = current - damage;
            wounds.insert(target_id.clone(), remaining);
            outcome.effects.push(GameEffect::WoundsInflicted {
                target: target_id.clone(),
                amount: damage,
                remaining: remaining.max(0),
            });
        }

        for (target_id, remaining) in wounds {
            if remaining <= 0 {
                outcome.diffs.push(StateChange::remove(paths::entity(&target_id)));
                outcome.effects.push(GameEffect::EntityDestroyed { entity_id: target_id });
            } else {
                outcome.diffs.push(StateChange::set(paths::entity_field(&target_id, "wounds"), remaining));
            }
        }
        outcome.diffs.push(StateChange::remove(paths::PENDING_ATTACKS));
        outcome.diffs.push(StateChange::set(paths::RESOLVED, true));
        Ok(outcome)
    }
}

impl Phase for ResolutionPhase {
    fn kind(&self) -> PhaseKind { PhaseKind::ResolutionStep }

    fn snapshot(&self) -> &Snapshot { &self.snapshot }

    fn refresh(&mut self, snapshot: Snapshot) { self.snapshot = snapshot; }

    fn validate(&self, action: &Action) -> Validation {
        match &action.kind {
            ActionKind::ResolveAttacks => {
                let mut v = Validation::ok();
                require_active_player(&self.snapshot, action, &mut v);
                v.require(!model::flag(&self.snapshot, paths::RESOLVED), "attacks already resolved");
                v.require(
                    !model::pending_attacks(&self.snapshot).is_empty(),
                    "no attacks declared",
                );
                v
            }
            ActionKind::EndPhase => {
                let mut v = Validation::ok();
                require_active_player(&self.snapshot, action, &mut v);
                v
            }
            _ => not_legal(self.kind(), action),
        }
    }

    fn process(&self, action: &Action, rng: &mut GameRng) -> SyncResult<PhaseOutcome> {
        match &action.kind {
            ActionKind::ResolveAttacks => self.resolve(rng),
            ActionKind::EndPhase => end_phase(&self.snapshot, self.kind()),
            other => Err(process_error(self.kind(), format!("unexpected '{}'", other.name()))),
        }
    }

    fn is_complete(&self) -> bool {
        model::flag(&self.snapshot, paths::RESOLVED)
            || model::pending_attacks(&self.snapshot).is_empty()
    }

    /// Unresolved declarations lapse.
    fn on_exit(&self) -> Vec<StateChange> {
        vec![
            StateChange::remove(paths::PENDING_ATTACKS),
            StateChange::remove(paths::RESOLVED),
        ]
    }
}
