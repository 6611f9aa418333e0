//! Typed views over the State Tree and the paths that address them.
//!
//! Phases read through these structs and write through `paths::*`;
//! the tree itself stays plain JSON.

use crate::{
    phase::PhaseKind,
    snapshot::Snapshot,
    types::{EntityId, PlayerId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STATE_FORMAT_VERSION: u32 = 1;

/// Squares within which an entity contests an objective.
pub const OBJECTIVE_RANGE: i64 = 3;

/// Extra movement granted by the Swift buff.
pub const SWIFT_BONUS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

impl Position {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn distance_sq(&self, other: &Position) -> i64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn within(&self, other: &Position, range: i64) -> bool {
        self.distance_sq(other) <= range * range
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitProfile {
    pub movement: i64,
    pub attacks:  u32,
    /// Minimum D6 roll that hits.
    pub hit_on:   u32,
    pub wounds:   i64,
    pub range:    i64,
}

impl UnitProfile {
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.movement <= 0 { out.push("movement must be positive".into()); }
        if self.attacks == 0 { out.push("attacks must be positive".into()); }
        if !(2..=6).contains(&self.hit_on) { out.push("hit_on must be in 2..=6".into()); }
        if self.wounds <= 0 { out.push("wounds must be positive".into()); }
        if self.range <= 0 { out.push("range must be positive".into()); }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFlags {
    #[serde(default)]
    pub moved:    bool,
    #[serde(default)]
    pub attacked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buffs {
    #[serde(default)]
    pub swift:    bool,
    #[serde(default)]
    pub hardened: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Buff {
    Swift,
    Hardened,
}

impl Buff {
    pub fn key(&self) -> &'static str {
        match self {
            Buff::Swift => "swift",
            Buff::Hardened => "hardened",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub owner:   PlayerId,
    pub pos:     Position,
    pub profile: UnitProfile,
    pub wounds:  i64,
    #[serde(default)]
    pub flags:   EntityFlags,
    #[serde(default)]
    pub buffs:   Buffs,
}

impl Entity {
    pub fn movement_allowance(&self) -> i64 {
        self.profile.movement + if self.buffs.swift { SWIFT_BONUS } else { 0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    #[serde(default)]
    pub cp:       i64,
    #[serde(default)]
    pub vp:       i64,
    #[serde(default)]
    pub deployed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub width:      i64,
    pub height:     i64,
    pub objectives: Vec<Position>,
    pub max_units:  i64,
}

impl Board {
    pub fn contains(&self, pos: &Position) -> bool {
        (0..self.width).contains(&pos.x) && (0..self.height).contains(&pos.y)
    }
}

/// Who is acting, in which phase, in which round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    pub current:       PhaseKind,
    pub active_player: Option<PlayerId>,
    pub round:         u32,
}

/// Path builders. Every write in the crate goes through one of these.
pub mod paths {
    pub const META_SEED: &str = "meta.seed";
    pub const META_FORMAT: &str = "meta.format_version";
    pub const META_PLAYERS: &str = "meta.players";
    pub const BOARD: &str = "board";
    pub const PHASE_CURRENT: &str = "phase.current";
    pub const PHASE_ACTIVE: &str = "phase.active_player";
    pub const PHASE_ROUND: &str = "phase.round";
    pub const PENDING_ATTACKS: &str = "phase.pending_attacks";
    pub const RESOLVED: &str = "phase.resolved";
    pub const SCORED: &str = "phase.scored";
    pub const ENTITIES: &str = "entities";

    pub fn entity(id: &str) -> String {
        format!("entities.{id}")
    }

    pub fn entity_field(id: &str, field: &str) -> String {
        format!("entities.{id}.{field}")
    }

    pub fn player(id: &str) -> String {
        format!("players.{id}")
    }

    pub fn player_field(id: &str, field: &str) -> String {
        format!("players.{id}.{field}")
    }

    pub fn pending_attack(attacker: &str) -> String {
        format!("phase.pending_attacks.{attacker}")
    }
}

// ── Readers ────────────────────────────────────────────────────────

pub fn players(snapshot: &Snapshot) -> Vec<PlayerId> {
    snapshot.read(paths::META_PLAYERS).unwrap_or_default()
}

pub fn master_seed(snapshot: &Snapshot) -> Option<u64> {
    snapshot.read(paths::META_SEED)
}

pub fn board(snapshot: &Snapshot) -> Option<Board> {
    snapshot.read(paths::BOARD)
}

pub fn player_state(snapshot: &Snapshot, id: &str) -> PlayerState {
    snapshot.read(&paths::player(id)).unwrap_or_default()
}

pub fn entity(snapshot: &Snapshot, id: &str) -> Option<Entity> {
    snapshot.read(&paths::entity(id))
}

/// All entities, key-ordered.
pub fn entities(snapshot: &Snapshot) -> BTreeMap<EntityId, Entity> {
    snapshot.read(paths::ENTITIES).unwrap_or_default()
}

pub fn turn(snapshot: &Snapshot) -> TurnState {
    TurnState {
        current:       snapshot.read(paths::PHASE_CURRENT).unwrap_or(PhaseKind::Setup),
        active_player: snapshot.read(paths::PHASE_ACTIVE),
        round:         snapshot.read(paths::PHASE_ROUND).unwrap_or(0),
    }
}

/// Declared attacks awaiting resolution: attacker → target.
pub fn pending_attacks(snapshot: &Snapshot) -> BTreeMap<EntityId, EntityId> {
    snapshot.read(paths::PENDING_ATTACKS).unwrap_or_default()
}

pub fn flag(snapshot: &Snapshot, path: &str) -> bool {
    snapshot.read(path).unwrap_or(false)
}
