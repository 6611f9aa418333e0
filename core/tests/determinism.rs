//! THE MOST IMPORTANT TEST IN THE PROJECT.
//!
//! Two orchestrators, same seed, same actions.
//! They must produce identical action logs, draws and checksums.
//! Any divergence here means replicas will desynchronize.

use chrono::{TimeZone, Utc};
use tabletop_sync_core::{
    action::{Action, ActionKind},
    action_log::ActionLogEntry,
    config::GameSetup,
    model::{Position, UnitProfile},
    orchestrator::{initial_tree, Orchestrator},
    replay::{reexecute, replay_diffs},
};

const SEED: u64 = 0xDEAD_BEEF_CAFE_1234;

fn script() -> Vec<Action> {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let profile = UnitProfile { movement: 6, attacks: 4, hit_on: 3, wounds: 5, range: 12 };
    let steps: Vec<(&str, ActionKind)> = vec![
        ("P1", ActionKind::DeployEntity { entity_id: "a1".into(), profile, pos: Position::new(4, 10) }),
        ("P1", ActionKind::DeployEntity { entity_id: "a2".into(), profile, pos: Position::new(6, 10) }),
        ("P2", ActionKind::DeployEntity { entity_id: "b1".into(), profile, pos: Position::new(10, 16) }),
        ("P1", ActionKind::EndPhase),
        ("P1", ActionKind::EndPhase),
        ("P1", ActionKind::MoveEntity { entity_id: "a1".into(), to: Position::new(4, 12) }),
        ("P1", ActionKind::EndPhase),
        ("P1", ActionKind::DeclareAttack { attacker: "a1".into(), target: "b1".into() }),
        ("P1", ActionKind::DeclareAttack { attacker: "a2".into(), target: "b1".into() }),
        ("P1", ActionKind::EndPhase),
        ("P1", ActionKind::ResolveAttacks),
        ("P1", ActionKind::EndPhase),
        ("P1", ActionKind::ScoreObjectives),
        ("P1", ActionKind::EndPhase),
    ];
    steps
        .into_iter()
        .enumerate()
        .map(|(i, (actor, kind))| Action::new(actor, i as u64 + 1, kind, at))
        .collect()
}

fn play(seed: u64) -> Orchestrator {
    let mut game = Orchestrator::build_test(seed).expect("build game");
    for action in script() {
        let name = action.kind.name();
        game.execute(action)
            .unwrap_or_else(|e| panic!("{name} rejected: {e}"));
    }
    game
}

fn entries(game: &Orchestrator) -> Vec<ActionLogEntry> {
    game.action_log().entries().to_vec()
}

#[test]
fn same_seed_produces_identical_action_logs() {
    let game_a = play(SEED);
    let game_b = play(SEED);

    let log_a = entries(&game_a);
    let log_b = entries(&game_b);
    assert_eq!(
        log_a.len(), log_b.len(),
        "Action log lengths differ: {} vs {}",
        log_a.len(), log_b.len()
    );
    for (a, b) in log_a.iter().zip(log_b.iter()) {
        assert_eq!(a, b, "Action log diverged at sequence {}", a.sequence);
    }
    assert_eq!(game_a.checksum(), game_b.checksum());
}

#[test]
fn resolution_draws_are_recorded() {
    let game = play(SEED);
    let resolve = game
        .action_log()
        .entries()
        .iter()
        .find(|e| e.action.kind == ActionKind::ResolveAttacks)
        .expect("resolve entry");

    // One D6 batch per attacker, a1 then a2. Five wounds outlast one
    // attacker, so both always roll.
    assert_eq!(resolve.rng_draws.len(), 2);
    for draw in &resolve.rng_draws {
        assert_eq!(draw.values.len(), 4);
        assert!(draw.values.iter().all(|v| (1..=6).contains(v)));
    }
}

#[test]
fn recorded_diffs_replay_to_the_same_checksums() {
    let game = play(SEED);
    let export = game.action_log().export();
    let initial = initial_tree(&GameSetup::default_test(SEED), SEED).expect("initial tree");

    let report = replay_diffs(&initial, &export.entries).expect("replay");
    assert_eq!(report.checksums.len(), export.entries.len());
    assert_eq!(report.tree, *game.tree());
}

#[test]
fn recorded_actions_reexecute_to_the_same_state() {
    let game = play(SEED);
    let replayed = reexecute(&GameSetup::default_test(SEED), &entries(&game)).expect("reexecute");
    assert_eq!(replayed.checksum(), game.checksum());
    assert_eq!(entries(&replayed), entries(&game));
}

#[test]
fn reexecute_with_the_wrong_seed_is_detected() {
    let game = play(SEED);
    let result = reexecute(&GameSetup::default_test(SEED ^ 1), &entries(&game));
    assert!(result.is_err(), "a different master seed must not reproduce the log");
}
