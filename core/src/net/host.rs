//! Host reconciler — the single authority.
//!
//! RULES:
//!   - Arrival order is the order of truth. Envelopes are queued as they
//!     arrive and executed one at a time by pump(); nothing runs
//!     concurrently with an execute.
//!   - Accepted actions are broadcast to every peer. Rejections go to the
//!     submitting peer only and are never broadcast.
//!   - The host's own player submits through the same queue as remote
//!     peers, and receives its confirmations and rejections through its
//!     own inbox (drain_local) in the same shape remote peers do.

use super::{
    wire::{
        check_version, ActionEnvelope, ConfirmedResultEnvelope, RejectionEnvelope,
        WelcomeEnvelope, WireMessage, WIRE_VERSION,
    },
    Submission,
};
use crate::{
    action::Action,
    action_log::ActionLog,
    config::SyncSettings,
    error::{SyncError, SyncResult},
    model,
    orchestrator::Orchestrator,
    snapshot::Snapshot,
    types::{Checksum, PeerId, PlayerId, Sequence},
};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// Every connected remote peer.
    All,
    Peer(PeerId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to:      Recipient,
    pub message: WireMessage,
}

#[derive(Debug, Clone)]
struct PeerLink {
    player:       Option<PlayerId>,
    next_inbound: Sequence,
}

pub struct HostReconciler {
    peer_id:      PeerId,
    orchestrator: Orchestrator,
    settings:     SyncSettings,
    peers:        BTreeMap<PeerId, PeerLink>,
    queue:        VecDeque<ActionEnvelope>,
    outbox:       Vec<Outbound>,
    local:        Vec<WireMessage>,
}

impl HostReconciler {
    /// `player` is the seat the host itself plays, if any.
    pub fn new(
        peer_id: impl Into<PeerId>,
        player: Option<PlayerId>,
        orchestrator: Orchestrator,
        settings: SyncSettings,
    ) -> Self {
        let peer_id = peer_id.into();
        let mut peers = BTreeMap::new();
        peers.insert(peer_id.clone(), PeerLink { player, next_inbound: 1 });
        Self {
            peer_id,
            orchestrator,
            settings,
            peers,
            queue: VecDeque::new(),
            outbox: Vec::new(),
            local: Vec::new(),
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    // ── Membership ─────────────────────────────────────────────

    /// Register a remote peer and queue its Welcome.
    pub fn connect(&mut self, peer: impl Into<PeerId>, player: Option<PlayerId>) -> SyncResult<()> {
        let peer = peer.into();
        if self.peers.contains_key(&peer) {
            return Err(SyncError::Other(anyhow::anyhow!("peer '{peer}' is already connected")));
        }
        let remote = self.peers.len() - 1;
        if remote >= self.settings.max_peers {
            return Err(SyncError::PeerLimit { max: self.settings.max_peers });
        }
        if let Some(player) = &player {
            let seated = model::players(&self.orchestrator.snapshot());
            if !seated.contains(player) {
                return Err(SyncError::Other(anyhow::anyhow!("'{player}' is not a seated player")));
            }
            if self.peers.values().any(|p| p.player.as_ref() == Some(player)) {
                return Err(SyncError::Other(anyhow::anyhow!("'{player}' is already taken")));
            }
        }

        log::info!("peer '{peer}' connected as {}", player.as_deref().unwrap_or("spectator"));
        self.peers.insert(peer.clone(), PeerLink { player, next_inbound: 1 });
        self.welcome(&peer)
    }

    pub fn disconnect(&mut self, peer: &str) {
        if peer != self.peer_id && self.peers.remove(peer).is_some() {
            log::info!("peer '{peer}' disconnected");
        }
    }

    /// Queue a fresh Welcome for `peer`, e.g. after it reported divergence.
    pub fn welcome(&mut self, peer: &str) -> SyncResult<()> {
        let link = self
            .peers
            .get(peer)
            .ok_or_else(|| SyncError::UnknownPeer { peer: peer.to_string() })?;
        let tree = self.orchestrator.tree().clone();
        let message = WireMessage::Welcome(WelcomeEnvelope {
            version:       WIRE_VERSION,
            peer_id:       peer.to_string(),
            player:        link.player.clone(),
            next_sequence: self.orchestrator.next_sequence(),
            checksum:      self.orchestrator.checksum(),
            tree,
        });
        self.outbox.push(Outbound { to: Recipient::Peer(peer.to_string()), message });
        Ok(())
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().filter(|p| **p != self.peer_id).cloned().collect()
    }

    // ── Intake ─────────────────────────────────────────────────

    /// The host player's own intent. Same queue as remote peers.
    pub fn submit_local(&mut self, action: Action) -> SyncResult<Submission> {
        let next = self
            .peers
            .get(&self.peer_id)
            .map(|p| p.next_inbound)
            .unwrap_or(1);
        let envelope = ActionEnvelope::new(self.peer_id.clone(), next, action);
        self.receive(envelope)
    }

    /// A decoded message that arrived on `from`'s link.
    pub fn handle(&mut self, from: &str, message: WireMessage) -> SyncResult<Submission> {
        match message {
            WireMessage::Submit(envelope) => {
                if envelope.peer_id != from {
                    return Err(SyncError::Other(anyhow::anyhow!(
                        "link '{from}' sent an envelope for '{}'",
                        envelope.peer_id
                    )));
                }
                self.receive(envelope)
            }
            WireMessage::ResyncRequest(request) => {
                check_version(request.version)?;
                if request.peer_id != from {
                    return Err(SyncError::Other(anyhow::anyhow!(
                        "link '{from}' asked to resync '{}'",
                        request.peer_id
                    )));
                }
                log::warn!(
                    "'{from}' diverged after sequence {}, sending a fresh Welcome",
                    request.last_applied
                );
                self.welcome(from)?;
                Ok(Submission { accepted: false, peer_seq: 0 })
            }
            other => Err(SyncError::Other(anyhow::anyhow!(
                "host does not accept '{}' messages",
                other.kind()
            ))),
        }
    }

    /// Queue an envelope. Duplicates are dropped; gaps are errors. The
    /// action is numbered with the envelope's peer sequence.
    pub fn receive(&mut self, mut envelope: ActionEnvelope) -> SyncResult<Submission> {
        check_version(envelope.version)?;
        let link = self
            .peers
            .get_mut(&envelope.peer_id)
            .ok_or_else(|| SyncError::UnknownPeer { peer: envelope.peer_id.clone() })?;

        let peer_seq = envelope.peer_seq;
        envelope.action.sequence = peer_seq;
        if peer_seq < link.next_inbound {
            log::warn!("duplicate envelope {peer_seq} from '{}' dropped", envelope.peer_id);
            return Ok(Submission { accepted: false, peer_seq });
        }
        if peer_seq > link.next_inbound {
            return Err(SyncError::SequenceGap {
                peer:     envelope.peer_id.clone(),
                expected: link.next_inbound,
                actual:   peer_seq,
            });
        }
        link.next_inbound += 1;
        self.queue.push_back(envelope);
        Ok(Submission { accepted: true, peer_seq })
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    // ── Arbitration ────────────────────────────────────────────

    /// Execute every queued envelope in arrival order. Returns how many
    /// were confirmed.
    pub fn pump(&mut self) -> usize {
        let mut confirmed = 0;
        while let Some(envelope) = self.queue.pop_front() {
            if self.arbitrate(envelope) {
                confirmed += 1;
            }
        }
        confirmed
    }

    fn arbitrate(&mut self, envelope: ActionEnvelope) -> bool {
        let ActionEnvelope { peer_id, peer_seq, action, .. } = envelope;

        let bound = self.peers.get(&peer_id).and_then(|p| p.player.clone());
        let result = if bound.as_ref() == Some(&action.actor) {
            self.orchestrator.execute(action)
        } else {
            Err(SyncError::ActorMismatch { peer: peer_id.clone(), actor: action.actor.clone() })
        };

        match result {
            Ok(executed) => {
                let message = WireMessage::Confirmed(ConfirmedResultEnvelope {
                    version:    WIRE_VERSION,
                    sequence:   executed.sequence,
                    origin:     peer_id,
                    origin_seq: peer_seq,
                    action:     executed.action,
                    diffs:      executed.diffs,
                    draws:      executed.draws,
                    checksum:   executed.checksum,
                });
                self.local.push(message.clone());
                self.outbox.push(Outbound { to: Recipient::All, message });
                true
            }
            Err(e) => {
                if e.is_rejection() {
                    log::warn!("'{peer_id}' #{peer_seq} rejected: {e}");
                } else {
                    log::error!("'{peer_id}' #{peer_seq} failed: {e}");
                }
                let message = WireMessage::Rejected(RejectionEnvelope {
                    version:        WIRE_VERSION,
                    peer_seq,
                    after_sequence: self.orchestrator.next_sequence() - 1,
                    errors:         e.reasons(),
                });
                if peer_id == self.peer_id {
                    self.local.push(message);
                } else {
                    self.outbox.push(Outbound { to: Recipient::Peer(peer_id), message });
                }
                false
            }
        }
    }

    /// Everything produced for remote peers since the last drain, in
    /// production order.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Confirmations and the host player's own rejections.
    pub fn drain_local(&mut self) -> Vec<WireMessage> {
        std::mem::take(&mut self.local)
    }

    // ── Reads ──────────────────────────────────────────────────

    /// The authoritative state.
    pub fn snapshot(&self) -> Snapshot {
        self.orchestrator.snapshot()
    }

    pub fn checksum(&self) -> Checksum {
        self.orchestrator.checksum()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn action_log(&self) -> &ActionLog {
        self.orchestrator.action_log()
    }
}
