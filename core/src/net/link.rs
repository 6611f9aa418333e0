//! In-process links between reconcilers.
//!
//! Each direction is an unbounded crossbeam channel of encoded lines, so
//! everything crossing a link goes through the wire codec exactly as it
//! would over a socket. Channels preserve order and never drop.

use super::{
    host::{Outbound, Recipient},
    wire::WireMessage,
};
use crate::{
    error::{SyncError, SyncResult},
    types::PeerId,
};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::collections::BTreeMap;

/// One end of a bidirectional link.
#[derive(Debug, Clone)]
pub struct Endpoint {
    tx: Sender<String>,
    rx: Receiver<String>,
}

/// A connected pair of endpoints.
pub fn duplex() -> (Endpoint, Endpoint) {
    let (a_tx, b_rx) = unbounded();
    let (b_tx, a_rx) = unbounded();
    (Endpoint { tx: a_tx, rx: a_rx }, Endpoint { tx: b_tx, rx: b_rx })
}

impl Endpoint {
    pub fn send(&self, message: &WireMessage) -> SyncResult<()> {
        let line = message.encode()?;
        self.tx
            .send(line)
            .map_err(|_| SyncError::Other(anyhow::anyhow!("link closed")))
    }

    /// Next message if one is waiting.
    pub fn try_recv(&self) -> SyncResult<Option<WireMessage>> {
        match self.rx.try_recv() {
            Ok(line) => WireMessage::decode(&line).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(SyncError::Other(anyhow::anyhow!("link closed")))
            }
        }
    }

    /// Everything waiting, in arrival order.
    pub fn drain(&self) -> SyncResult<Vec<WireMessage>> {
        let mut messages = Vec::new();
        while let Some(message) = self.try_recv()? {
            messages.push(message);
        }
        Ok(messages)
    }
}

/// The host's side of every remote link, keyed by peer.
#[derive(Debug, Default)]
pub struct HostLinks {
    links: BTreeMap<PeerId, Endpoint>,
}

impl HostLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, peer: impl Into<PeerId>, endpoint: Endpoint) {
        self.links.insert(peer.into(), endpoint);
    }

    pub fn remove(&mut self, peer: &str) -> Option<Endpoint> {
        self.links.remove(peer)
    }

    /// Route the host's outbox. A closed link is logged and skipped so
    /// one dead peer does not stall the rest.
    pub fn deliver(&self, outbound: Vec<Outbound>) -> SyncResult<()> {
        for Outbound { to, message } in outbound {
            match to {
                Recipient::All => {
                    for (peer, link) in &self.links {
                        if let Err(e) = link.send(&message) {
                            log::warn!("drop {} to '{peer}': {e}", message.kind());
                        }
                    }
                }
                Recipient::Peer(peer) => match self.links.get(&peer) {
                    Some(link) => {
                        if let Err(e) = link.send(&message) {
                            log::warn!("drop {} to '{peer}': {e}", message.kind());
                        }
                    }
                    None => return Err(SyncError::UnknownPeer { peer }),
                },
            }
        }
        Ok(())
    }

    /// Every message waiting from every peer, tagged with its link.
    pub fn collect_inbound(&self) -> SyncResult<Vec<(PeerId, WireMessage)>> {
        let mut inbound = Vec::new();
        for (peer, link) in &self.links {
            for message in link.drain()? {
                inbound.push((peer.clone(), message));
            }
        }
        Ok(inbound)
    }
}
