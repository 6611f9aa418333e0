//! Scoring step — the active player scores each objective they hold
//! uncontested, once per turn. Leaving the step ends the player's turn
//! and clears their entities' per-turn flags.

use super::{
    end_phase, not_legal, process_error, require_active_player, Phase, PhaseKind, PhaseOutcome,
    Validation,
};
use crate::{
    action::{Action, ActionKind},
    diff::StateChange,
    effect::GameEffect,
    error::SyncResult,
    model::{self, paths, OBJECTIVE_RANGE},
    rng::GameRng,
    snapshot::Snapshot,
};

pub struct ScoringPhase {
    snapshot: Snapshot,
}

impl ScoringPhase {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    fn score(&self, action: &Action) -> SyncResult<PhaseOutcome> {
        let snap = &self.snapshot;
        let board = model::board(snap)
            .ok_or_else(|| process_error(self.kind(), "board not initialised"))?;
        let entities = model::entities(snap);
        let mut vp = model::player_state(snap, &action.actor).vp;
        let mut effects = Vec::new();

        for (index, objective) in board.objectives.iter().enumerate() {
            let near = entities.values().filter(|e| e.pos.within(objective, OBJECTIVE_RANGE));
            let (mine, theirs) = near.fold((0, 0), |(m, t), e| {
                if e.owner == action.actor { (m + 1, t) } else { (m, t + 1) }
            });
            if mine > 0 && theirs == 0 {
                vp += 1;
                effects.push(GameEffect::ObjectiveScored {
                    player: action.actor.clone(),
                    objective: index,
                    vp,
                });
            }
        }

        Ok(PhaseOutcome {
            diffs: vec![
                StateChange::set(paths::player_field(&action.actor, "vp"), vp),
                StateChange::set(paths::SCORED, true),
            ],
            effects,
        })
    }
}

impl Phase for ScoringPhase {
    fn kind(&self) -> PhaseKind { PhaseKind::ScoringStep }

    fn snapshot(&self) -> &Snapshot { &self.snapshot }

    fn refresh(&mut self, snapshot: Snapshot) { self.snapshot = snapshot; }

    fn validate(&self, action: &Action) -> Validation {
        match &action.kind {
            ActionKind::ScoreObjectives => {
                let mut v = Validation::ok();
                require_active_player(&self.snapshot, action, &mut v);
                v.require(!model::flag(&self.snapshot, paths::SCORED), "objectives already scored this turn");
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

    fn process(&self, action: &Action, _rng: &mut GameRng) -> SyncResult<PhaseOutcome> {
        match &action.kind {
            ActionKind::ScoreObjectives => self.score(action),
            ActionKind::EndPhase => end_phase(&self.snapshot, self.kind()),
            other => Err(process_error(self.kind(), format!("unexpected '{}'", other.name()))),
        }
    }

    fn is_complete(&self) -> bool {
        model::flag(&self.snapshot, paths::SCORED)
    }

    fn on_exit(&self) -> Vec<StateChange> {
        let mut diffs = vec![StateChange::remove(paths::SCORED)];
        let Some(active) = model::turn(&self.snapshot).active_player else {
            return diffs;
        };
        for (id, entity) in model::entities(&self.snapshot) {
            if entity.owner == active {
                diffs.push(StateChange::remove(paths::entity_field(&id, "flags")));
            }
        }
        diffs
    }
}
