//! Shared primitive types used across the entire sync core.

/// Identifier of a player seat in the game (turn order member).
pub type PlayerId = String;

/// A stable, unique identifier for any entity on the board.
pub type EntityId = String;

/// Identifier of a network participant. A peer may or may not be seated.
pub type PeerId = String;

/// Position of an action in a stream. Global on the host, per-peer on envelopes.
pub type Sequence = u64;

/// Structural hash of a State Tree.
pub type Checksum = u64;

/// The canonical session identifier used by the action log store.
pub type SessionId = String;

/// Fresh random session id. Only used for naming persisted logs,
/// never as input to game state.
pub fn new_session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string()
}
