//! Host-authoritative replication.
//!
//! Host and client reconcilers are sans-IO: they take decoded messages in
//! and hand outbound messages back. `link` moves encoded lines between
//! them in-process; any ordered, reliable byte stream can do the same.

pub mod client;
pub mod host;
pub mod link;
pub mod wire;

pub use client::{ClientEvent, ClientReconciler, PredictionRecord};
pub use host::{HostReconciler, Outbound, Recipient};
pub use link::{duplex, Endpoint, HostLinks};
pub use wire::{
    ActionEnvelope, ConfirmedResultEnvelope, RejectionEnvelope, ResyncRequestEnvelope,
    WelcomeEnvelope, WireMessage, WIRE_VERSION,
};

use crate::types::Sequence;

/// Immediate answer to a submit. The outcome arrives later as a
/// confirmation or a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// Queued for the host. False for duplicates, for actions the
    /// submitting peer may not make, and for messages that carry no action.
    pub accepted: bool,
    pub peer_seq: Sequence,
}
