//! Phase state machine: legality per phase, explicit transitions only,
//! fresh snapshots after every apply.

use chrono::{TimeZone, Utc};
use tabletop_sync_core::{
    action::{Action, ActionKind},
    effect::GameEffect,
    error::SyncError,
    model::{self, paths, Buff, Position, UnitProfile},
    orchestrator::Orchestrator,
    phase::PhaseKind,
};

const SEED: u64 = 0x5EED_0001;

fn act(actor: &str, kind: ActionKind) -> Action {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    Action::new(actor, 0, kind, at)
}

fn profile() -> UnitProfile {
    UnitProfile { movement: 6, attacks: 2, hit_on: 4, wounds: 3, range: 12 }
}

fn deploy(actor: &str, id: &str, x: i64, y: i64) -> Action {
    act(actor, ActionKind::DeployEntity {
        entity_id: id.into(),
        profile:   profile(),
        pos:       Position::new(x, y),
    })
}

fn run(game: &mut Orchestrator, action: Action) {
    let name = action.kind.name();
    game.execute(action)
        .unwrap_or_else(|e| panic!("{name} should be accepted: {e}"));
}

/// Both players deployed, P1 in their command step.
fn build_test() -> Orchestrator {
    let mut game = Orchestrator::build_test(SEED).expect("build game");
    run(&mut game, deploy("P1", "a1", 4, 10));
    run(&mut game, deploy("P2", "b1", 10, 16));
    run(&mut game, act("P1", ActionKind::EndPhase));
    game
}

#[test]
fn new_game_starts_in_setup_without_an_active_player() {
    let game = Orchestrator::build_test(SEED).expect("build game");
    let turn = model::turn(&game.snapshot());
    assert_eq!(game.phase_kind(), PhaseKind::Setup);
    assert_eq!(turn.active_player, None);
    assert_eq!(turn.round, 0);
    assert_eq!(model::master_seed(&game.snapshot()), Some(SEED));
}

#[test]
fn setup_cannot_end_until_every_player_has_deployed() {
    let mut game = Orchestrator::build_test(SEED).expect("build game");
    run(&mut game, deploy("P1", "a1", 4, 10));

    let err = game.execute(act("P1", ActionKind::EndPhase)).unwrap_err();
    assert!(matches!(err, SyncError::Validation { .. }), "got {err}");
    assert_eq!(game.phase_kind(), PhaseKind::Setup);
}

#[test]
fn deploy_rejects_duplicates_occupied_squares_and_off_board() {
    let mut game = Orchestrator::build_test(SEED).expect("build game");
    run(&mut game, deploy("P1", "a1", 4, 10));

    for bad in [
        deploy("P2", "a1", 1, 1),
        deploy("P2", "b1", 4, 10),
        deploy("P2", "b2", 24, 0),
        deploy("P3", "c1", 2, 2),
        deploy("P2", "bad.id", 2, 2),
    ] {
        assert!(!game.validate(&bad).is_ok(), "{:?} should be illegal", bad.kind);
        assert!(game.execute(bad).is_err());
    }
    assert_eq!(model::entities(&game.snapshot()).len(), 1);
    assert_eq!(game.action_log().len(), 1, "rejections are never logged");
}

#[test]
fn phase_never_advances_without_end_phase() {
    let mut game = build_test();
    assert_eq!(game.phase_kind(), PhaseKind::CommandStep);

    // Spending the only command point completes the step...
    run(&mut game, act("P1", ActionKind::SpendCommandPoint {
        entity_id: "a1".into(),
        buff:      Buff::Swift,
    }));
    assert!(game.phase().is_complete());
    // ...but nothing moves on by itself.
    assert!(!game.phase().should_auto_advance());
    assert_eq!(game.phase_kind(), PhaseKind::CommandStep);

    run(&mut game, act("P1", ActionKind::EndPhase));
    assert_eq!(game.phase_kind(), PhaseKind::MovementStep);
}

#[test]
fn command_step_grants_one_point_on_entry() {
    let game = build_test();
    let state = model::player_state(&game.snapshot(), "P1");
    assert_eq!(state.cp, 1);
    assert_eq!(model::player_state(&game.snapshot(), "P2").cp, 0);
}

#[test]
fn only_the_active_player_may_act() {
    let mut game = build_test();
    let err = game.execute(act("P2", ActionKind::EndPhase)).unwrap_err();
    assert!(err.reasons().iter().any(|r| r.contains("not the active player")), "got {err}");
}

#[test]
fn action_kinds_are_scoped_to_their_phase() {
    let mut game = build_test();
    let early = act("P1", ActionKind::ResolveAttacks);
    let v = game.validate(&early);
    assert!(!v.is_ok());
    assert!(v.errors[0].contains("not legal during command_step"), "got {:?}", v.errors);
    assert!(game.execute(early).is_err());
}

#[test]
fn validation_reads_the_snapshot_left_by_the_previous_action() {
    let mut game = build_test();
    run(&mut game, act("P1", ActionKind::EndPhase));

    let step = act("P1", ActionKind::MoveEntity { entity_id: "a1".into(), to: Position::new(4, 12) });
    run(&mut game, step.clone());

    // The moved flag written by the first move must be visible at once.
    let again = game.validate(&step);
    assert!(!again.is_ok());
    assert!(again.errors.iter().any(|e| e.contains("already moved")), "got {:?}", again.errors);
    assert_eq!(
        game.phase().snapshot().read::<Position>(&paths::entity_field("a1", "pos")),
        Some(Position::new(4, 12))
    );
}

#[test]
fn swift_extends_movement() {
    let mut game = build_test();
    run(&mut game, act("P1", ActionKind::SpendCommandPoint {
        entity_id: "a1".into(),
        buff:      Buff::Swift,
    }));
    run(&mut game, act("P1", ActionKind::EndPhase));

    // 8 squares: beyond base movement 6, within 6 + swift bonus.
    run(&mut game, act("P1", ActionKind::MoveEntity { entity_id: "a1".into(), to: Position::new(4, 2) }));
    assert_eq!(model::entity(&game.snapshot(), "a1").map(|e| e.pos), Some(Position::new(4, 2)));
}

#[test]
fn full_turn_cycles_to_the_next_player() {
    let mut game = build_test();
    for kind in [
        ActionKind::EndPhase,
        ActionKind::MoveEntity { entity_id: "a1".into(), to: Position::new(4, 12) },
        ActionKind::EndPhase,
        ActionKind::DeclareAttack { attacker: "a1".into(), target: "b1".into() },
        ActionKind::EndPhase,
        ActionKind::ResolveAttacks,
        ActionKind::EndPhase,
        ActionKind::ScoreObjectives,
    ] {
        run(&mut game, act("P1", kind));
        assert!(!game.phase().should_auto_advance(), "{} auto-advances", game.phase_kind());
    }

    let snap = game.snapshot();
    assert_eq!(model::player_state(&snap, "P1").vp, 1, "a1 holds the (4, 12) objective alone");
    assert!(model::pending_attacks(&snap).is_empty());
    let b1 = model::entity(&snap, "b1").expect("b1 survives two attacks with three wounds");
    assert!((1..=3).contains(&b1.wounds));

    let executed = game.execute(act("P1", ActionKind::EndPhase)).expect("end turn");
    assert!(executed.effects.contains(&GameEffect::PhaseChanged {
        from:          PhaseKind::ScoringStep,
        to:            PhaseKind::CommandStep,
        active_player: "P2".into(),
        round:         1,
    }));

    let snap = game.snapshot();
    let a1 = model::entity(&snap, "a1").expect("a1");
    assert!(!a1.flags.moved && !a1.flags.attacked, "per-turn flags cleared on exit");
    assert_eq!(snap.get(paths::SCORED), None);
    assert_eq!(model::player_state(&snap, "P2").cp, 1);
}

#[test]
fn scoring_twice_in_one_step_is_rejected() {
    let mut game = build_test();
    for kind in [
        ActionKind::EndPhase,
        ActionKind::EndPhase,
        ActionKind::EndPhase,
        ActionKind::EndPhase,
        ActionKind::ScoreObjectives,
    ] {
        run(&mut game, act("P1", kind));
    }
    assert!(game.execute(act("P1", ActionKind::ScoreObjectives)).is_err());
}

#[test]
fn resolving_without_declarations_is_rejected() {
    let mut game = build_test();
    for _ in 0..3 {
        run(&mut game, act("P1", ActionKind::EndPhase));
    }
    assert_eq!(game.phase_kind(), PhaseKind::ResolutionStep);
    assert!(game.phase().is_complete());
    assert!(game.execute(act("P1", ActionKind::ResolveAttacks)).is_err());
}

#[test]
fn round_advances_after_the_last_player() {
    let mut game = build_test();
    // P1: command, movement, attack, resolution, scoring.
    for _ in 0..5 {
        run(&mut game, act("P1", ActionKind::EndPhase));
    }
    for _ in 0..5 {
        run(&mut game, act("P2", ActionKind::EndPhase));
    }
    let turn = model::turn(&game.snapshot());
    assert_eq!(turn.current, PhaseKind::CommandStep);
    assert_eq!(turn.active_player.as_deref(), Some("P1"));
    assert_eq!(turn.round, 2);
}

#[test]
fn hardened_lasts_into_the_opponents_turn_and_absorbs_one_hit() {
    let heavy = UnitProfile { movement: 6, attacks: 6, hit_on: 2, wounds: 3, range: 12 };
    let tough = UnitProfile { movement: 6, attacks: 1, hit_on: 4, wounds: 6, range: 12 };
    let mut game = Orchestrator::build_test(SEED).expect("build game");
    run(&mut game, act("P1", ActionKind::DeployEntity {
        entity_id: "a1".into(),
        profile:   heavy,
        pos:       Position::new(4, 10),
    }));
    run(&mut game, act("P2", ActionKind::DeployEntity {
        entity_id: "b1".into(),
        profile:   tough,
        pos:       Position::new(10, 16),
    }));
    // Setup, then all of P1's first turn.
    for _ in 0..6 {
        run(&mut game, act("P1", ActionKind::EndPhase));
    }
    assert_eq!(model::turn(&game.snapshot()).active_player.as_deref(), Some("P2"));
    run(&mut game, act("P2", ActionKind::SpendCommandPoint {
        entity_id: "b1".into(),
        buff:      Buff::Hardened,
    }));
    for _ in 0..5 {
        run(&mut game, act("P2", ActionKind::EndPhase));
    }

    // P1's round-2 command step leaves P2's buffs alone.
    assert_eq!(game.phase_kind(), PhaseKind::CommandStep);
    let b1 = model::entity(&game.snapshot(), "b1").expect("b1");
    assert!(b1.buffs.hardened, "hardened must survive until P1 can attack");

    run(&mut game, act("P1", ActionKind::EndPhase));
    run(&mut game, act("P1", ActionKind::EndPhase));
    run(&mut game, act("P1", ActionKind::DeclareAttack { attacker: "a1".into(), target: "b1".into() }));
    run(&mut game, act("P1", ActionKind::EndPhase));
    let executed = game.execute(act("P1", ActionKind::ResolveAttacks)).expect("resolve");

    let hits = executed
        .effects
        .iter()
        .find_map(|e| match e {
            GameEffect::DiceRolled { values, .. } => Some(values.iter().filter(|v| **v >= 2).count() as i64),
            _ => None,
        })
        .expect("a1 rolled");
    let b1 = model::entity(&game.snapshot(), "b1").expect("six wounds survive five hits");
    assert_eq!(b1.wounds, 6 - (hits - 1).max(0), "{hits} hits, one absorbed");

    // Finish P1's turn; b1's buff lapses when P2's next command step begins.
    for _ in 0..2 {
        run(&mut game, act("P1", ActionKind::EndPhase));
    }
    assert_eq!(model::turn(&game.snapshot()).active_player.as_deref(), Some("P2"));
    let b1 = model::entity(&game.snapshot(), "b1").expect("b1");
    assert!(!b1.buffs.hardened);
}
