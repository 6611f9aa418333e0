//! Orchestrator execution order: validate, process, exit, apply, enter,
//! log. One action runs to completion before the next.

use chrono::{TimeZone, Utc};
use tabletop_sync_core::{
    action::{Action, ActionKind},
    checksum::checksum,
    config::GameSetup,
    diff::StateChange,
    model::{self, paths, Position, UnitProfile},
    orchestrator::{initial_tree, Orchestrator},
    phase::PhaseKind,
};

const SEED: u64 = 77;

fn act(actor: &str, kind: ActionKind) -> Action {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    Action::new(actor, 0, kind, at)
}

fn deploy(actor: &str, id: &str, x: i64, y: i64) -> Action {
    act(actor, ActionKind::DeployEntity {
        entity_id: id.into(),
        profile:   UnitProfile { movement: 6, attacks: 2, hit_on: 4, wounds: 3, range: 12 },
        pos:       Position::new(x, y),
    })
}

fn build_test() -> Orchestrator {
    let mut game = Orchestrator::build_test(SEED).expect("build game");
    game.execute(deploy("P1", "a1", 4, 10)).expect("deploy a1");
    game.execute(deploy("P2", "b1", 10, 16)).expect("deploy b1");
    game
}

#[test]
fn initial_tree_carries_meta_board_and_players() {
    let tree = initial_tree(&GameSetup::default_test(SEED), SEED).expect("initial tree");
    let snap = tree.snapshot();
    assert_eq!(model::players(&snap), vec!["P1".to_string(), "P2".to_string()]);
    assert_eq!(model::board(&snap).map(|b| b.objectives.len()), Some(3));
    assert_eq!(model::player_state(&snap, "P2").deployed, 0);
    assert_eq!(model::turn(&snap).current, PhaseKind::Setup);
}

#[test]
fn game_without_seed_self_seeds_and_records_it() {
    let setup = GameSetup { seed: None, ..GameSetup::default_test(0) };
    let game = Orchestrator::new(&setup).expect("self-seeded game");
    assert_eq!(model::master_seed(&game.snapshot()), Some(game.master_seed()));
}

#[test]
fn every_accepted_action_is_logged_with_its_seed_and_checksum() {
    let game = build_test();
    let log = game.action_log();
    assert_eq!(log.len(), 2);
    for (i, entry) in log.entries().iter().enumerate() {
        assert_eq!(entry.sequence, i as u64 + 1);
        assert_eq!(entry.action.rng_seed, Some(game.rng_bank().seed_for(entry.sequence)));
    }
    assert_eq!(log.last_checksum(), Some(game.checksum()));
    assert_eq!(game.next_sequence(), 3);
}

#[test]
fn rejected_action_leaves_tree_phase_and_log_untouched() {
    let mut game = build_test();
    let before = game.checksum();

    let result = game.execute(act("P1", ActionKind::MoveEntity {
        entity_id: "a1".into(),
        to:        Position::new(5, 10),
    }));

    assert!(result.is_err());
    assert_eq!(game.checksum(), before);
    assert_eq!(game.phase_kind(), PhaseKind::Setup);
    assert_eq!(game.action_log().len(), 2);
}

#[test]
fn transition_logs_exit_transition_and_entry_diffs_as_one_entry() {
    let mut game = build_test();
    let executed = game.execute(act("P1", ActionKind::EndPhase)).expect("end setup");

    assert!(executed.diffs.contains(&StateChange::set(paths::PHASE_CURRENT, "command_step")));
    // Command step's on_enter grant rides in the same entry.
    assert!(executed.diffs.contains(&StateChange::set(paths::player_field("P1", "cp"), 1)));
    let last = game.action_log().entries().last().expect("entry");
    assert_eq!(last.diffs, executed.diffs);
    assert_eq!(game.phase_kind(), PhaseKind::CommandStep);
    assert_eq!(game.phase().snapshot().root(), game.snapshot().root());
}

#[test]
fn predict_applies_without_logging() {
    let mut game = build_test();
    let action = act("P1", ActionKind::EndPhase).with_seed(1234);
    let run = game.predict(&action).expect("predict");

    assert!(!run.diffs.is_empty());
    assert_eq!(game.phase_kind(), PhaseKind::CommandStep);
    assert_eq!(game.action_log().len(), 2);
}

#[test]
fn predict_without_a_seed_is_refused() {
    let mut game = build_test();
    assert!(game.predict(&act("P1", ActionKind::EndPhase)).is_err());
    assert_eq!(game.phase_kind(), PhaseKind::Setup);
}

#[test]
fn restore_rolls_tree_and_phase_back() {
    let mut game = build_test();
    let saved = game.snapshot();
    game.execute(act("P1", ActionKind::EndPhase)).expect("end setup");
    assert_eq!(game.phase_kind(), PhaseKind::CommandStep);

    game.restore(saved.clone());
    assert_eq!(game.phase_kind(), PhaseKind::Setup);
    assert_eq!(game.checksum(), saved.checksum());
}

#[test]
fn replica_follows_phase_from_applied_diffs() {
    let mut host = build_test();
    let mut replica = Orchestrator::from_tree(host.snapshot().to_tree()).expect("replica");

    let executed = host.execute(act("P1", ActionKind::EndPhase)).expect("end setup");
    let report = replica.apply_diffs(&executed.diffs);

    assert!(report.is_clean());
    assert_eq!(replica.phase_kind(), PhaseKind::CommandStep);
    assert_eq!(replica.checksum(), executed.checksum);
}

#[test]
fn running_checksum_matches_a_full_walk_after_every_batch() {
    let mut game = build_test();
    assert_eq!(game.checksum(), checksum(game.tree()));
    for kind in [
        ActionKind::EndPhase,
        ActionKind::SpendCommandPoint { entity_id: "a1".into(), buff: model::Buff::Swift },
        ActionKind::EndPhase,
        ActionKind::MoveEntity { entity_id: "a1".into(), to: Position::new(4, 14) },
        ActionKind::EndPhase,
    ] {
        let executed = game.execute(act("P1", kind)).expect("accepted");
        assert_eq!(executed.checksum, checksum(game.tree()));
    }

    let report = game.apply_diffs(&[
        StateChange::set("entities.a1.wounds", 1),
        StateChange::set("bad..path", 1),
    ]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(game.checksum(), checksum(game.tree()));
    assert_eq!(game.checksum(), game.snapshot().checksum());
}
