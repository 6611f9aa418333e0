//! Action log persistence and the versioned export.

use chrono::{TimeZone, Utc};
use tabletop_sync_core::{
    action::{Action, ActionKind},
    action_log::{ActionLogExport, LOG_FORMAT_VERSION},
    config::{GameSetup, SyncSettings},
    error::SyncError,
    model::{Position, UnitProfile},
    net::{ClientReconciler, HostReconciler, WireMessage},
    orchestrator::{initial_tree, Orchestrator},
    replay::replay_diffs,
    store::ActionLogStore,
};

const SEED: u64 = 4242;

fn build_store() -> ActionLogStore {
    let store = ActionLogStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn build_game() -> Orchestrator {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let profile = UnitProfile { movement: 6, attacks: 2, hit_on: 4, wounds: 3, range: 12 };
    let mut game = Orchestrator::build_test(SEED).expect("build game");
    for (actor, kind) in [
        ("P1", ActionKind::DeployEntity { entity_id: "a1".into(), profile, pos: Position::new(4, 10) }),
        ("P2", ActionKind::DeployEntity { entity_id: "b1".into(), profile, pos: Position::new(10, 16) }),
        ("P1", ActionKind::EndPhase),
        ("P1", ActionKind::EndPhase),
    ] {
        game.execute(Action::new(actor, 0, kind, at)).expect("accepted");
    }
    game
}

#[test]
fn file_backed_store_opens_in_wal_mode_and_persists() {
    let path = std::env::temp_dir().join(format!("sync-log-{}.db", uuid::Uuid::new_v4()));
    let path = path.to_str().expect("utf-8 temp path").to_string();
    let game = build_game();
    {
        let store = ActionLogStore::open(&path).expect("open file store");
        store.migrate().expect("migration");
        store
            .insert_session("s-1", &GameSetup::default_test(SEED), "0.1.0-test")
            .expect("insert session");
        store.sync_entries("s-1", game.action_log().entries()).expect("sync");
    }
    let reopened = ActionLogStore::open(&path).expect("reopen");
    assert_eq!(reopened.entries_for_session("s-1").expect("read back"), game.action_log().entries());
    drop(reopened);
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path}{suffix}"));
    }

    ActionLogStore::open(":memory:").expect("in-memory path accepts the pragma too");
}

#[test]
fn stored_entries_read_back_identically() {
    let store = build_store();
    let game = build_game();
    store
        .insert_session("s-1", &GameSetup::default_test(SEED), "0.1.0-test")
        .expect("insert session");

    let written = store
        .sync_entries("s-1", game.action_log().entries())
        .expect("sync");
    assert_eq!(written, 4);

    let read = store.entries_for_session("s-1").expect("read back");
    assert_eq!(read, game.action_log().entries());
    assert_eq!(store.last_sequence("s-1").expect("last"), 4);
}

#[test]
fn sync_writes_only_new_entries() {
    let store = build_store();
    let game = build_game();
    store
        .insert_session("s-1", &GameSetup::default_test(SEED), "0.1.0-test")
        .expect("insert session");

    let entries = game.action_log().entries();
    assert_eq!(store.sync_entries("s-1", &entries[..2]).expect("first sync"), 2);
    assert_eq!(store.sync_entries("s-1", entries).expect("second sync"), 2);
    assert_eq!(store.sync_entries("s-1", entries).expect("third sync"), 0);
}

#[test]
fn duplicate_sequence_is_refused_by_the_schema() {
    let store = build_store();
    let game = build_game();
    store
        .insert_session("s-1", &GameSetup::default_test(SEED), "0.1.0-test")
        .expect("insert session");
    let first = &game.action_log().entries()[0];

    store.append_entry("s-1", first).expect("first append");
    assert!(matches!(store.append_entry("s-1", first), Err(SyncError::Database(_))));
}

#[test]
fn session_setup_round_trips_and_requires_a_seed() {
    let store = build_store();
    let setup = GameSetup::default_test(SEED);
    store.insert_session("s-1", &setup, "0.1.0-test").expect("insert");

    assert_eq!(store.session_setup("s-1").expect("query"), Some(setup.clone()));
    assert_eq!(store.session_setup("missing").expect("query"), None);
    assert_eq!(store.session_ids().expect("ids"), vec!["s-1".to_string()]);

    let unseeded = GameSetup { seed: None, ..setup };
    assert!(store.insert_session("s-2", &unseeded, "0.1.0-test").is_err());
}

#[test]
fn export_survives_json_and_replays() {
    let game = build_game();
    let json = game.action_log().export().to_json().expect("to json");
    let export = ActionLogExport::from_json(&json).expect("from json");

    assert_eq!(export.version, LOG_FORMAT_VERSION);
    let initial = initial_tree(&GameSetup::default_test(SEED), SEED).expect("initial tree");
    let report = replay_diffs(&initial, &export.entries).expect("replay");
    assert_eq!(report.tree, *game.tree());
}

#[test]
fn export_with_unknown_version_is_refused() {
    let game = build_game();
    let mut export = game.action_log().export();
    export.version = LOG_FORMAT_VERSION + 1;
    let json = export.to_json().expect("to json");
    assert!(ActionLogExport::from_json(&json).is_err());
}

#[test]
fn tampered_export_reports_the_first_divergent_sequence() {
    let game = build_game();
    let mut export = game.action_log().export();
    export.entries[2].checksum ^= 0xFF;

    let initial = initial_tree(&GameSetup::default_test(SEED), SEED).expect("initial tree");
    match replay_diffs(&initial, &export.entries) {
        Err(SyncError::Divergence { sequence, .. }) => assert_eq!(sequence, 3),
        other => panic!("expected divergence, got {other:?}"),
    }
}

#[test]
fn since_returns_entries_after_a_sequence() {
    let game = build_game();
    let log = game.action_log();
    let tail: Vec<u64> = log.since(2).iter().map(|e| e.sequence).collect();
    assert_eq!(tail, vec![3, 4]);
    assert!(log.since(10).is_empty());
}

#[test]
fn logged_actions_carry_their_peer_sequence() {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let profile = UnitProfile { movement: 6, attacks: 2, hit_on: 4, wounds: 3, range: 12 };
    let game = Orchestrator::build_test(SEED).expect("build game");
    let mut host = HostReconciler::new("host", Some("P2".into()), game, SyncSettings::default());
    host.connect("c1", Some("P1".into())).expect("connect");
    let welcome = host
        .drain_outbound()
        .into_iter()
        .find_map(|out| match out.message {
            WireMessage::Welcome(w) => Some(w),
            _ => None,
        })
        .expect("welcome");
    let mut client = ClientReconciler::from_welcome(welcome, SyncSettings::default()).expect("join");

    // Callers leave the number at zero; submission fills it in.
    let deploy_b1 = ActionKind::DeployEntity { entity_id: "b1".into(), profile, pos: Position::new(10, 16) };
    host.submit_local(Action::new("P2", 0, deploy_b1, at)).expect("host submit");
    assert_eq!(host.pump(), 1);
    for out in host.drain_outbound() {
        client.receive(out.message).expect("client intake");
    }
    let deploy_a1 = ActionKind::DeployEntity { entity_id: "a1".into(), profile, pos: Position::new(4, 10) };
    client.submit(Action::new("P1", 0, deploy_a1, at), at);
    client.submit(Action::new("P1", 0, ActionKind::EndPhase, at), at);
    assert_eq!(
        client.pending_predictions().iter().map(|p| p.action.sequence).collect::<Vec<_>>(),
        vec![1, 2]
    );
    for message in client.drain_outbound() {
        host.handle("c1", message).expect("host intake");
    }
    assert_eq!(host.pump(), 2);

    let numbered: Vec<(String, u64)> = host
        .action_log()
        .entries()
        .iter()
        .map(|e| (e.action.actor.clone(), e.action.sequence))
        .collect();
    assert_eq!(numbered, vec![("P2".into(), 1), ("P1".into(), 1), ("P1".into(), 2)]);

    let export = host.action_log().export();
    let exported: Vec<u64> = export.entries.iter().map(|r| r.action.sequence).collect();
    assert_eq!(exported, vec![1, 1, 2]);
}
