//! Client reconciler — optimistic prediction with rollback.
//!
//! STATE:
//!   view            confirmed state plus this peer's pending predictions
//!   rollback_point  last confirmed snapshot taken with nothing pending
//!   tail            authoritative results received since rollback_point
//!
//! INVARIANT: rollback_point + tail == the host's state at
//! `next_expected - 1`. With no predictions pending, view equals it too
//! and tail is empty.
//!
//! RULES:
//!   - Confirmations apply strictly in host sequence order. Early ones
//!     are buffered until the gap before them closes.
//!   - A confirmed own action whose diffs equal the prediction costs
//!     nothing: the diffs are already in view.
//!   - Anything else (mismatch, remote action while predicting, no
//!     prediction, rejection, stall, cancel) restores rollback_point,
//!     replays tail and re-predicts whatever is still pending.
//!   - Prediction never reorders confirmed actions; it only previews.

use super::{
    wire::{
        check_version, ActionEnvelope, ConfirmedResultEnvelope, RejectionEnvelope,
        ResyncRequestEnvelope, WelcomeEnvelope, WireMessage, WIRE_VERSION,
    },
    Submission,
};
use crate::{
    action::Action,
    action_log::{ActionLog, ActionLogEntry},
    checksum::checksum,
    config::SyncSettings,
    diff::{DiffEngine, StateChange},
    error::{SyncError, SyncResult},
    orchestrator::Orchestrator,
    phase::{PhaseKind, Validation},
    snapshot::Snapshot,
    types::{Checksum, PeerId, PlayerId, Sequence},
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, VecDeque};

/// An unconfirmed local action and what it was predicted to do.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub peer_seq:        Sequence,
    /// Stamped with the seed of the slot it was predicted for.
    pub action:          Action,
    pub predicted_diffs: Vec<StateChange>,
    pub submitted_at:    DateTime<Utc>,
    /// Diffs supplied by the caller rather than computed by a phase.
    pub preview:         bool,
}

/// What a receive/poll/cancel did, for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Confirmed { sequence: Sequence, origin: PeerId },
    PredictionConfirmed { peer_seq: Sequence },
    RolledBack { replayed: usize, repredicted: usize },
    Diverged { sequence: Sequence, expected: Checksum, actual: Checksum },
    Rejected { peer_seq: Sequence, errors: Vec<String> },
    Stalled { peer_seq: Sequence, waited_secs: i64 },
    Cancelled { peer_seq: Sequence },
    Resynced { next_sequence: Sequence },
}

pub struct ClientReconciler {
    peer_id:             PeerId,
    player:              Option<PlayerId>,
    settings:            SyncSettings,
    view:                Orchestrator,
    rollback_point:      Snapshot,
    tail:                Vec<ConfirmedResultEnvelope>,
    predictions:         VecDeque<PredictionRecord>,
    next_expected:       Sequence,
    buffered:            BTreeMap<Sequence, ConfirmedResultEnvelope>,
    deferred_rejections: Vec<RejectionEnvelope>,
    next_peer_seq:       Sequence,
    outbox:              Vec<WireMessage>,
    confirmed:           ActionLog,
    needs_resync:        bool,
}

impl ClientReconciler {
    /// Join a session from the host's Welcome.
    pub fn from_welcome(welcome: WelcomeEnvelope, settings: SyncSettings) -> SyncResult<Self> {
        check_version(welcome.version)?;
        let view = adopt(&welcome)?;
        log::info!(
            "joined as '{}' at sequence {}",
            welcome.peer_id,
            welcome.next_sequence
        );
        Ok(Self {
            rollback_point:      view.snapshot(),
            view,
            peer_id:             welcome.peer_id,
            player:              welcome.player,
            settings,
            tail:                Vec::new(),
            predictions:         VecDeque::new(),
            next_expected:       welcome.next_sequence,
            buffered:            BTreeMap::new(),
            deferred_rejections: Vec::new(),
            next_peer_seq:       1,
            outbox:              Vec::new(),
            confirmed:           ActionLog::new(),
            needs_resync:        false,
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn player(&self) -> Option<&PlayerId> {
        self.player.as_ref()
    }

    // ── Submission ─────────────────────────────────────────────

    /// Send `action` to the host and, if enabled, predict it locally.
    pub fn submit(&mut self, action: Action, now: DateTime<Utc>) -> Submission {
        let Some((peer_seq, action)) = self.enqueue(action) else {
            return Submission { accepted: false, peer_seq: 0 };
        };
        if self.settings.predict {
            let slot = self.next_expected + self.predictions.len() as Sequence;
            let stamped = action.with_seed(self.view.rng_bank().seed_for(slot));
            match self.view.predict(&stamped) {
                Ok(run) => self.predictions.push_back(PredictionRecord {
                    peer_seq,
                    action: stamped,
                    predicted_diffs: run.diffs,
                    submitted_at: now,
                    preview: false,
                }),
                Err(e) => log::debug!("#{peer_seq} not predicted: {e}"),
            }
        }
        Submission { accepted: true, peer_seq }
    }

    /// Send `action` and show `preview` until the host answers, instead
    /// of running the phase locally.
    pub fn submit_with_preview(
        &mut self,
        action: Action,
        preview: Vec<StateChange>,
        now: DateTime<Utc>,
    ) -> Submission {
        let Some((peer_seq, action)) = self.enqueue(action) else {
            return Submission { accepted: false, peer_seq: 0 };
        };
        self.view.apply_diffs(&preview);
        self.predictions.push_back(PredictionRecord {
            peer_seq,
            action,
            predicted_diffs: preview,
            submitted_at: now,
            preview: true,
        });
        Submission { accepted: true, peer_seq }
    }

    /// Number `action` with the next peer sequence and queue it.
    fn enqueue(&mut self, action: Action) -> Option<(Sequence, Action)> {
        if self.player.as_ref() != Some(&action.actor) {
            log::warn!(
                "'{}' may not submit for '{}'",
                self.peer_id,
                action.actor
            );
            return None;
        }
        let peer_seq = self.next_peer_seq;
        self.next_peer_seq += 1;
        let action = action.with_sequence(peer_seq);
        self.outbox.push(WireMessage::Submit(ActionEnvelope::new(
            self.peer_id.clone(),
            peer_seq,
            action.clone(),
        )));
        Some((peer_seq, action))
    }

    /// Messages to send to the host, in the order they were produced.
    pub fn drain_outbound(&mut self) -> Vec<WireMessage> {
        std::mem::take(&mut self.outbox)
    }

    // ── Intake ─────────────────────────────────────────────────

    pub fn receive(&mut self, message: WireMessage) -> SyncResult<Vec<ClientEvent>> {
        check_version(message.version())?;
        let mut events = Vec::new();
        match message {
            WireMessage::Confirmed(envelope) => {
                if envelope.sequence < self.next_expected {
                    log::debug!("duplicate confirmation {} ignored", envelope.sequence);
                    return Ok(events);
                }
                if envelope.sequence > self.next_expected {
                    log::debug!(
                        "confirmation {} buffered, waiting for {}",
                        envelope.sequence,
                        self.next_expected
                    );
                }
                self.buffered.insert(envelope.sequence, envelope);
            }
            WireMessage::Rejected(envelope) => self.deferred_rejections.push(envelope),
            WireMessage::Welcome(welcome) => {
                self.resync(welcome, &mut events)?;
                return Ok(events);
            }
            other @ (WireMessage::Submit(_) | WireMessage::ResyncRequest(_)) => {
                return Err(SyncError::Other(anyhow::anyhow!(
                    "clients do not accept '{}' messages",
                    other.kind()
                )));
            }
        }
        self.drain_ready(&mut events);
        Ok(events)
    }

    /// Apply everything that is next in order.
    fn drain_ready(&mut self, events: &mut Vec<ClientEvent>) {
        loop {
            let last_applied = self.next_expected - 1;
            if let Some(i) = self
                .deferred_rejections
                .iter()
                .position(|r| r.after_sequence <= last_applied)
            {
                let rejection = self.deferred_rejections.remove(i);
                self.on_rejected(rejection, events);
                continue;
            }
            if let Some(envelope) = self.buffered.remove(&self.next_expected) {
                self.next_expected += 1;
                self.on_confirmed(envelope, events);
                continue;
            }
            break;
        }
    }

    fn on_confirmed(&mut self, envelope: ConfirmedResultEnvelope, events: &mut Vec<ClientEvent>) {
        self.confirmed.append(ActionLogEntry {
            sequence:           envelope.sequence,
            action:             envelope.action.clone(),
            diffs:              envelope.diffs.clone(),
            rng_draws:          envelope.draws.clone(),
            resulting_checksum: envelope.checksum,
        });
        events.push(ClientEvent::Confirmed {
            sequence: envelope.sequence,
            origin:   envelope.origin.clone(),
        });

        let own = envelope.origin == self.peer_id;
        let position = own
            .then(|| self.predictions.iter().position(|p| p.peer_seq == envelope.origin_seq))
            .flatten();
        let expected = envelope.checksum;
        let matched = position == Some(0)
            && self.predictions.front().map(|p| &p.predicted_diffs) == Some(&envelope.diffs);
        self.tail.push(envelope);

        let discarded = match (position, matched) {
            (Some(_), true) => {
                if let Some(record) = self.predictions.pop_front() {
                    events.push(ClientEvent::PredictionConfirmed { peer_seq: record.peer_seq });
                }
                if !self.predictions.is_empty() {
                    // Later predictions still sit on top of this one.
                    return;
                }
                if self.view.checksum() == expected {
                    self.rollback_point = self.view.snapshot();
                    self.tail.clear();
                    return;
                }
                // Replay from the rollback point reports the divergence.
                0
            }
            (Some(i), false) => {
                self.predictions.remove(i);
                1
            }
            (None, _) => 0,
        };
        self.rollback_and_replay(discarded, events);
    }

    fn on_rejected(&mut self, rejection: RejectionEnvelope, events: &mut Vec<ClientEvent>) {
        log::warn!("#{} rejected by host: {}", rejection.peer_seq, rejection.errors.join("; "));
        let removed = self
            .predictions
            .iter()
            .position(|p| p.peer_seq == rejection.peer_seq)
            .and_then(|i| self.predictions.remove(i));
        events.push(ClientEvent::Rejected {
            peer_seq: rejection.peer_seq,
            errors:   rejection.errors,
        });
        if removed.is_some() {
            self.rollback_and_replay(1, events);
        }
    }

    /// Restore the last confirmed snapshot, replay the authoritative tail,
    /// then re-predict what is still pending on top.
    fn rollback_and_replay(&mut self, discarded: usize, events: &mut Vec<ClientEvent>) {
        let pending: Vec<PredictionRecord> = self.predictions.drain(..).collect();
        let replayed = self.tail.len();

        self.view.restore(self.rollback_point.clone());
        for envelope in &self.tail {
            self.view.apply_diffs(&envelope.diffs);
        }
        if let Some(last) = self.tail.last() {
            let actual = self.view.checksum();
            if actual != last.checksum {
                let (sequence, expected) = (last.sequence, last.checksum);
                self.report_divergence(sequence, expected, actual, events);
            }
        }
        self.tail.clear();
        self.rollback_point = self.view.snapshot();

        let mut repredicted = 0;
        let mut dropped = 0;
        for record in pending {
            if record.preview {
                self.view.apply_diffs(&record.predicted_diffs);
                self.predictions.push_back(record);
                repredicted += 1;
                continue;
            }
            let slot = self.next_expected + self.predictions.len() as Sequence;
            let stamped = record.action.with_seed(self.view.rng_bank().seed_for(slot));
            match self.view.predict(&stamped) {
                Ok(run) => {
                    self.predictions.push_back(PredictionRecord {
                        action: stamped,
                        predicted_diffs: run.diffs,
                        ..record
                    });
                    repredicted += 1;
                }
                Err(e) => {
                    log::debug!("#{} no longer predictable: {e}", record.peer_seq);
                    dropped += 1;
                }
            }
        }

        if discarded + dropped > 0 || repredicted > 0 {
            log::debug!("rolled back: replayed {replayed}, re-predicted {repredicted}");
            events.push(ClientEvent::RolledBack { replayed, repredicted });
        }
    }

    fn report_divergence(
        &mut self,
        sequence: Sequence,
        expected: Checksum,
        actual: Checksum,
        events: &mut Vec<ClientEvent>,
    ) {
        log::error!("{}", SyncError::Divergence { sequence, expected, actual });
        events.push(ClientEvent::Diverged { sequence, expected, actual });
        if self.needs_resync {
            return;
        }
        self.needs_resync = true;
        self.outbox.push(WireMessage::ResyncRequest(ResyncRequestEnvelope {
            version:      WIRE_VERSION,
            peer_id:      self.peer_id.clone(),
            last_applied: self.next_expected - 1,
        }));
    }

    /// Adopt a fresh tree from the host, dropping all local prediction.
    fn resync(&mut self, welcome: WelcomeEnvelope, events: &mut Vec<ClientEvent>) -> SyncResult<()> {
        let view = adopt(&welcome)?;
        let dropped = self.predictions.len();
        self.view = view;
        self.rollback_point = self.view.snapshot();
        self.tail.clear();
        self.predictions.clear();
        self.next_expected = welcome.next_sequence;
        self.buffered.retain(|seq, _| *seq >= welcome.next_sequence);
        self.deferred_rejections.clear();
        self.needs_resync = false;
        log::info!("resynced at sequence {}, dropped {dropped} predictions", welcome.next_sequence);
        events.push(ClientEvent::Resynced { next_sequence: welcome.next_sequence });
        self.drain_ready(events);
        Ok(())
    }

    // ── Abandonment ────────────────────────────────────────────

    /// Abandon predictions older than the configured timeout.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Vec<ClientEvent> {
        let timeout = Duration::seconds(self.settings.prediction_timeout_secs);
        let mut events = Vec::new();
        let mut stalled = 0;
        self.predictions.retain(|record| {
            let waited = now - record.submitted_at;
            if waited < timeout {
                return true;
            }
            let waited_secs = waited.num_seconds();
            log::warn!(
                "{}",
                SyncError::StalledPrediction { peer_seq: record.peer_seq, waited_secs }
            );
            events.push(ClientEvent::Stalled { peer_seq: record.peer_seq, waited_secs });
            stalled += 1;
            false
        });
        if stalled > 0 {
            self.rollback_and_replay(stalled, &mut events);
        }
        events
    }

    /// Drop one pending prediction. The host still decides the action.
    pub fn cancel(&mut self, peer_seq: Sequence) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        if let Some(i) = self.predictions.iter().position(|p| p.peer_seq == peer_seq) {
            self.predictions.remove(i);
            events.push(ClientEvent::Cancelled { peer_seq });
            self.rollback_and_replay(1, &mut events);
        }
        events
    }

    // ── Reads ──────────────────────────────────────────────────

    /// Latest confirmed-or-predicted state.
    pub fn snapshot(&self) -> Snapshot {
        self.view.snapshot()
    }

    /// Latest confirmed state, without predictions.
    pub fn confirmed_snapshot(&self) -> Snapshot {
        if self.tail.is_empty() {
            return self.rollback_point.clone();
        }
        let mut tree = self.rollback_point.to_tree();
        for envelope in &self.tail {
            DiffEngine::apply(&mut tree, &envelope.diffs);
        }
        tree.snapshot()
    }

    pub fn confirmed_checksum(&self) -> Checksum {
        self.confirmed_snapshot().checksum()
    }

    pub fn view_checksum(&self) -> Checksum {
        self.view.checksum()
    }

    pub fn pending_predictions(&self) -> &VecDeque<PredictionRecord> {
        &self.predictions
    }

    /// Next host sequence this client will apply.
    pub fn next_expected(&self) -> Sequence {
        self.next_expected
    }

    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    pub fn confirmed_log(&self) -> &ActionLog {
        &self.confirmed
    }

    pub fn phase_kind(&self) -> PhaseKind {
        self.view.phase_kind()
    }

    /// Would the current view accept `action`? For UI hints only.
    pub fn validate(&self, action: &Action) -> Validation {
        self.view.validate(action)
    }
}

fn adopt(welcome: &WelcomeEnvelope) -> SyncResult<Orchestrator> {
    let actual = checksum(&welcome.tree);
    if actual != welcome.checksum {
        return Err(SyncError::Divergence {
            sequence: welcome.next_sequence.saturating_sub(1),
            expected: welcome.checksum,
            actual,
        });
    }
    Orchestrator::from_tree(welcome.tree.clone())
}
