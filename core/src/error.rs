use crate::types::{Checksum, PeerId, PlayerId, Sequence};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Action rejected: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("Phase '{phase}' failed to process action: {reason}")]
    Process { phase: String, reason: String },

    #[error("Malformed path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("Divergence at sequence {sequence}: host checksum {expected:016x}, local {actual:016x}")]
    Divergence {
        sequence: Sequence,
        expected: Checksum,
        actual:   Checksum,
    },

    #[error("Prediction {peer_seq} stalled: no confirmation after {waited_secs}s")]
    StalledPrediction { peer_seq: Sequence, waited_secs: i64 },

    #[error("Sequence gap from peer '{peer}': expected {expected}, got {actual}")]
    SequenceGap {
        peer:     PeerId,
        expected: Sequence,
        actual:   Sequence,
    },

    #[error("Unsupported wire version: expected {expected}, got {actual}")]
    WireVersion { expected: u16, actual: u16 },

    #[error("Peer '{peer}' is not connected")]
    UnknownPeer { peer: PeerId },

    #[error("Peer limit of {max} reached")]
    PeerLimit { max: usize },

    #[error("Peer '{peer}' may not act for player '{actor}'")]
    ActorMismatch { peer: PeerId, actor: PlayerId },

    #[error("Action {sequence} carries no RNG seed")]
    MissingSeed { sequence: Sequence },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Rejections that never mutated state and are reported to the
    /// submitting peer only.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SyncError::Validation { .. }
                | SyncError::Process { .. }
                | SyncError::ActorMismatch { .. }
        )
    }

    /// Human-readable reasons suitable for a rejection envelope.
    pub fn reasons(&self) -> Vec<String> {
        match self {
            SyncError::Validation { errors } => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
