//! sync-runner: headless host + client session for tabletop-sync.
//!
//! Usage:
//!   sync-runner --config data/session.json --rounds 2 --db run.db --export log.json
//!   sync-runner --replay --db run.db [--session <id>]
//!
//! The host plays the second seat, the client the first. Both sides talk
//! only through encoded wire lines over in-process links.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::collections::BTreeSet;
use std::env;
use tabletop_sync_core::{
    action::{Action, ActionKind},
    action_log::ExportRecord,
    config::SessionConfig,
    model::{self, Buff, Position, UnitProfile},
    net::{duplex, ClientEvent, ClientReconciler, Endpoint, HostLinks, HostReconciler, WireMessage},
    orchestrator::{initial_tree, Orchestrator},
    phase::PhaseKind,
    replay::{reexecute, replay_diffs},
    snapshot::Snapshot,
    store::ActionLogStore,
    types::{new_session_id, PlayerId},
};

const CLIENT_PEER: &str = "c1";
const HOST_PEER: &str = "host";
const UNITS_PER_PLAYER: usize = 2;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = arg_str(&args, "--db").unwrap_or(":memory:");

    if args.iter().any(|a| a == "--replay") {
        return replay(db, arg_str(&args, "--session"));
    }

    let config_path = arg_str(&args, "--config").unwrap_or("./data/session.json");
    let mut config = SessionConfig::load(config_path)?;
    let seed = parse_arg(&args, "--seed", config.setup.seed.unwrap_or(42));
    let rounds = parse_arg(&args, "--rounds", 2u32);
    config.setup.seed = Some(seed);

    println!("tabletop-sync: sync-runner");
    println!("  config:    {config_path}");
    println!("  seed:      {seed}");
    println!("  rounds:    {rounds}");
    println!("  db:        {db}");
    println!();

    let mut session = Session::start(&config)?;
    session.deploy()?;
    session.play(rounds)?;
    session.verify()?;

    let store = ActionLogStore::open(db)?;
    store.migrate()?;
    let session_id = new_session_id();
    store.insert_session(&session_id, &config.setup, env!("CARGO_PKG_VERSION"))?;
    let written = store.sync_entries(&session_id, session.host.action_log().entries())?;

    if let Some(path) = arg_str(&args, "--export") {
        let json = session.host.action_log().export().to_json()?;
        std::fs::write(path, json).with_context(|| format!("Cannot write {path}"))?;
        println!("  exported action log to {path}");
    }

    session.print_summary(&session_id, written);
    Ok(())
}

// ── Session driver ─────────────────────────────────────────────────

struct Session {
    host:        HostReconciler,
    client:      ClientReconciler,
    links:       HostLinks,
    client_end:  Endpoint,
    host_player: PlayerId,
    rollbacks:   usize,
    rejections:  usize,
}

impl Session {
    fn start(config: &SessionConfig) -> Result<Self> {
        let players = &config.setup.players;
        let (Some(client_player), Some(host_player)) = (players.first(), players.get(1)) else {
            bail!("sync-runner needs two seated players");
        };

        let orchestrator = Orchestrator::new(&config.setup)?;
        let mut host = HostReconciler::new(
            HOST_PEER,
            Some(host_player.clone()),
            orchestrator,
            config.sync.clone(),
        );
        let (host_end, client_end) = duplex();
        let mut links = HostLinks::new();
        links.add(CLIENT_PEER, host_end);

        host.connect(CLIENT_PEER, Some(client_player.clone()))?;
        links.deliver(host.drain_outbound())?;
        let welcome = match client_end.try_recv()? {
            Some(WireMessage::Welcome(welcome)) => welcome,
            other => bail!("expected a welcome, got {other:?}"),
        };
        let client = ClientReconciler::from_welcome(welcome, config.sync.clone())?;

        Ok(Self {
            host,
            client,
            links,
            client_end,
            host_player: host_player.clone(),
            rollbacks: 0,
            rejections: 0,
        })
    }

    /// Submit `kinds` as `actor`, then run one full exchange.
    fn act(&mut self, actor: &str, kinds: Vec<ActionKind>) -> Result<()> {
        let now = Utc::now();
        for kind in kinds {
            let action = Action::new(actor, 0, kind, now);
            if actor == self.host_player {
                self.host.submit_local(action)?;
            } else {
                self.client.submit(action, now);
            }
        }
        self.exchange()
    }

    fn exchange(&mut self) -> Result<()> {
        for message in self.client.drain_outbound() {
            self.client_end.send(&message)?;
        }
        for (peer, message) in self.links.collect_inbound()? {
            self.host.handle(&peer, message)?;
        }
        self.host.pump();
        for message in self.host.drain_local() {
            if let WireMessage::Rejected(r) = message {
                log::warn!("host player action #{} rejected: {}", r.peer_seq, r.errors.join("; "));
                self.rejections += 1;
            }
        }
        self.links.deliver(self.host.drain_outbound())?;

        for message in self.client_end.drain()? {
            for event in self.client.receive(message)? {
                log::debug!("client: {event:?}");
                match event {
                    ClientEvent::RolledBack { .. } => self.rollbacks += 1,
                    ClientEvent::Rejected { .. } => self.rejections += 1,
                    ClientEvent::Diverged { sequence, .. } => {
                        log::error!("client diverged at {sequence}, requesting resync");
                    }
                    _ => {}
                }
            }
        }
        if self.client.needs_resync() {
            // The resync request is already in the client's outbox.
            return self.exchange();
        }
        Ok(())
    }

    /// Each player deploys along their own edge, in front of the
    /// objective with the same index.
    fn deploy(&mut self) -> Result<()> {
        let snapshot = self.host.snapshot();
        let board = model::board(&snapshot).context("board not initialised")?;
        let players = model::players(&snapshot);
        let profile = UnitProfile { movement: 6, attacks: 3, hit_on: 4, wounds: 3, range: 8 };

        for (seat, player) in players.iter().enumerate() {
            let y = if seat == 0 { 1 } else { board.height - 2 };
            let kinds = (0..UNITS_PER_PLAYER)
                .map(|i| {
                    let x = board
                        .objectives
                        .get(i)
                        .map(|o| o.x)
                        .unwrap_or(i as i64 * 2);
                    ActionKind::DeployEntity {
                        entity_id: format!("{}u{i}", player.to_lowercase()),
                        profile,
                        pos: Position::new(x, y),
                    }
                })
                .collect();
            self.act(player, kinds)?;
        }
        let first = players.first().cloned().context("no players")?;
        self.act(&first, vec![ActionKind::EndPhase])
    }

    /// Play until `rounds` full rounds have been completed.
    fn play(&mut self, rounds: u32) -> Result<()> {
        loop {
            let snapshot = self.host.snapshot();
            let turn = model::turn(&snapshot);
            if turn.round > rounds {
                return Ok(());
            }
            let actor = turn.active_player.context("no active player after setup")?;
            let kinds = plan(&snapshot, turn.current, &actor);
            let before = self.host.action_log().len();
            self.act(&actor, kinds)?;
            if self.host.action_log().len() == before {
                bail!("no progress in {} for {actor}", turn.current);
            }
        }
    }

    fn verify(&self) -> Result<()> {
        let host = self.host.checksum();
        let client = self.client.confirmed_checksum();
        if host != client {
            bail!("client confirmed state {client:016x} differs from host {host:016x}");
        }
        Ok(())
    }

    fn print_summary(&self, session_id: &str, written: usize) {
        let snapshot = self.host.snapshot();
        let turn = model::turn(&snapshot);

        println!("=== SESSION SUMMARY ===");
        println!("  session_id:   {session_id}");
        println!("  actions:      {}", self.host.action_log().len());
        println!("  stored:       {written}");
        println!("  final phase:  {} (round {})", turn.current, turn.round);
        println!("  checksum:     {:016x}", self.host.checksum());
        println!("  rollbacks:    {}", self.rollbacks);
        println!("  rejections:   {}", self.rejections);
        println!();
        println!("=== SCORE ===");
        for player in model::players(&snapshot) {
            let state = model::player_state(&snapshot, &player);
            let units = model::entities(&snapshot)
                .values()
                .filter(|e| e.owner == player)
                .count();
            println!("  {player:<6} vp: {:<3} cp: {:<3} units: {units}", state.vp, state.cp);
        }
    }
}

// ── Scripted play ──────────────────────────────────────────────────

/// The actions `actor` takes in `phase`, ending with EndPhase.
fn plan(snapshot: &Snapshot, phase: PhaseKind, actor: &str) -> Vec<ActionKind> {
    let entities = model::entities(snapshot);
    let own: Vec<_> = entities.iter().filter(|(_, e)| e.owner == actor).collect();
    let mut kinds = Vec::new();

    match phase {
        PhaseKind::Setup => {}
        PhaseKind::CommandStep => {
            let cp = model::player_state(snapshot, actor).cp;
            if let Some((id, _)) = own.iter().find(|(_, e)| !e.buffs.hardened) {
                if cp > 0 {
                    kinds.push(ActionKind::SpendCommandPoint {
                        entity_id: (*id).clone(),
                        buff:      Buff::Hardened,
                    });
                }
            }
        }
        PhaseKind::MovementStep => {
            let objectives = model::board(snapshot).map(|b| b.objectives).unwrap_or_default();
            let mut taken: BTreeSet<(i64, i64)> = entities.values().map(|e| (e.pos.x, e.pos.y)).collect();
            for (id, entity) in &own {
                let Some(goal) = objectives.iter().min_by_key(|o| entity.pos.distance_sq(o)) else {
                    break;
                };
                // Half the allowance per axis keeps the diagonal in range.
                let reach = entity.movement_allowance() / 2;
                let to = Position::new(
                    entity.pos.x + (goal.x - entity.pos.x).clamp(-reach, reach),
                    entity.pos.y + (goal.y - entity.pos.y).clamp(-reach, reach),
                );
                if to == entity.pos || taken.contains(&(to.x, to.y)) {
                    continue;
                }
                taken.remove(&(entity.pos.x, entity.pos.y));
                taken.insert((to.x, to.y));
                kinds.push(ActionKind::MoveEntity { entity_id: (*id).clone(), to });
            }
        }
        PhaseKind::AttackStep => {
            for (id, entity) in &own {
                let target = entities
                    .iter()
                    .find(|(_, e)| e.owner != actor && entity.pos.within(&e.pos, entity.profile.range));
                if let Some((target, _)) = target {
                    kinds.push(ActionKind::DeclareAttack {
                        attacker: (*id).clone(),
                        target:   target.clone(),
                    });
                }
            }
        }
        PhaseKind::ResolutionStep => {
            if !model::pending_attacks(snapshot).is_empty() {
                kinds.push(ActionKind::ResolveAttacks);
            }
        }
        PhaseKind::ScoringStep => kinds.push(ActionKind::ScoreObjectives),
    }
    kinds.push(ActionKind::EndPhase);
    kinds
}

// ── Replay ─────────────────────────────────────────────────────────

fn replay(db: &str, session: Option<&str>) -> Result<()> {
    let store = ActionLogStore::open(db)?;
    store.migrate()?;
    let session_id = match session {
        Some(id) => id.to_string(),
        None => store
            .session_ids()?
            .pop()
            .with_context(|| format!("no sessions stored in {db}"))?,
    };
    let setup = store
        .session_setup(&session_id)?
        .with_context(|| format!("unknown session {session_id}"))?;
    let seed = setup.seed.context("stored session has no seed")?;
    let entries = store.entries_for_session(&session_id)?;

    let export: Vec<_> = entries
        .iter()
        .map(|e| ExportRecord {
            sequence: e.sequence,
            action:   e.action.clone(),
            diffs:    e.diffs.clone(),
            checksum: e.resulting_checksum,
        })
        .collect();
    let initial = initial_tree(&setup, seed)?;
    let diffs = replay_diffs(&initial, &export)?;
    let rerun = reexecute(&setup, &entries)?;

    println!("=== REPLAY ===");
    println!("  session_id:   {session_id}");
    println!("  entries:      {}", entries.len());
    println!("  diff replay:  ok ({} checksums verified)", diffs.checksums.len());
    println!("  re-execution: ok, checksum {:016x}", rerun.checksum());
    Ok(())
}

// ── Args ───────────────────────────────────────────────────────────

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn arg_str<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
