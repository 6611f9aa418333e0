//! Wire contract between reconcilers.
//!
//! Every envelope is versioned. Messages travel as one JSON object per
//! line, tagged by `msg`.
//! Variants are appended, never removed or reordered.

use crate::{
    action::Action,
    diff::StateChange,
    error::{SyncError, SyncResult},
    rng::RngDraw,
    state::StateTree,
    types::{Checksum, PeerId, PlayerId, Sequence},
};
use serde::{Deserialize, Serialize};

pub const WIRE_VERSION: u16 = 1;

/// Peer → host: one action, numbered per peer so the host sees gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub version:  u16,
    pub peer_id:  PeerId,
    pub peer_seq: Sequence,
    pub action:   Action,
}

impl ActionEnvelope {
    pub fn new(peer_id: PeerId, peer_seq: Sequence, action: Action) -> Self {
        Self { version: WIRE_VERSION, peer_id, peer_seq, action }
    }
}

/// Host → all peers: an accepted action and everything needed to apply
/// it without running phase logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedResultEnvelope {
    pub version:    u16,
    /// Global position in the host's total order.
    pub sequence:   Sequence,
    pub origin:     PeerId,
    pub origin_seq: Sequence,
    /// Stamped with the seed the host used.
    pub action:     Action,
    pub diffs:      Vec<StateChange>,
    pub draws:      Vec<RngDraw>,
    pub checksum:   Checksum,
}

/// Host → submitting peer only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionEnvelope {
    pub version:        u16,
    pub peer_seq:       Sequence,
    /// Last global sequence applied when the action was rejected.
    pub after_sequence: Sequence,
    pub errors:         Vec<String>,
}

/// Host → newly connected (or resyncing) peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeEnvelope {
    pub version:       u16,
    pub peer_id:       PeerId,
    pub player:        Option<PlayerId>,
    pub next_sequence: Sequence,
    pub tree:          StateTree,
    pub checksum:      Checksum,
}

/// Peer → host: this peer diverged and wants a fresh Welcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncRequestEnvelope {
    pub version:      u16,
    pub peer_id:      PeerId,
    /// Last global sequence the peer applied before diverging.
    pub last_applied: Sequence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum WireMessage {
    Submit(ActionEnvelope),
    Confirmed(ConfirmedResultEnvelope),
    Rejected(RejectionEnvelope),
    Welcome(WelcomeEnvelope),
    ResyncRequest(ResyncRequestEnvelope),
}

impl WireMessage {
    pub fn version(&self) -> u16 {
        match self {
            Self::Submit(e) => e.version,
            Self::Confirmed(e) => e.version,
            Self::Rejected(e) => e.version,
            Self::Welcome(e) => e.version,
            Self::ResyncRequest(e) => e.version,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Submit(_) => "submit",
            Self::Confirmed(_) => "confirmed",
            Self::Rejected(_) => "rejected",
            Self::Welcome(_) => "welcome",
            Self::ResyncRequest(_) => "resync_request",
        }
    }

    /// One line of JSON, no trailing newline.
    pub fn encode(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one line. The version is checked before the body so a
    /// newer peer gets a version error, not a shape error.
    pub fn decode(line: &str) -> SyncResult<Self> {
        let value: serde_json::Value = serde_json::from_str(line.trim())?;
        let version = value
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow::anyhow!("wire message without a version"))?;
        if version != u64::from(WIRE_VERSION) {
            return Err(SyncError::WireVersion {
                expected: WIRE_VERSION,
                actual:   u16::try_from(version).unwrap_or(u16::MAX),
            });
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Reject envelopes from an incompatible peer.
pub(crate) fn check_version(version: u16) -> SyncResult<()> {
    if version == WIRE_VERSION {
        Ok(())
    } else {
        Err(SyncError::WireVersion { expected: WIRE_VERSION, actual: version })
    }
}
