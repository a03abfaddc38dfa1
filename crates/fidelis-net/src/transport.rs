//! Transport seam and the in-process hub.
//!
//! The outer wire format is not part of this crate: a [`Transport`] only
//! needs to deliver opaque frames to a peer over a reliable authenticated
//! link. [`LocalHub`] is the in-memory implementation used by simulations
//! and tests, with one bounded tokio channel per peer.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use fidelis_identity::EntityId;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{NetError, Result};

/// Default per-peer inbox capacity for [`LocalHub`].
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

/// Sends frames to peers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `frame` to `peer`.
    async fn send(&self, peer: &EntityId, frame: Vec<u8>) -> Result<()>;
}

/// In-memory transport connecting every node in one process.
#[derive(Debug, Clone, Default)]
pub struct LocalHub {
    inboxes: Arc<DashMap<EntityId, mpsc::Sender<Vec<u8>>>>,
}

impl LocalHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return its inbox.
    ///
    /// Re-connecting replaces the previous inbox.
    pub fn connect(&self, id: EntityId, capacity: usize) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.inboxes.insert(id, tx);
        debug!(peer = %id, "Peer connected to local hub");
        rx
    }

    /// Remove `id` from the hub.
    pub fn disconnect(&self, id: &EntityId) -> bool {
        self.inboxes.remove(id).is_some()
    }

    /// Whether `id` is connected.
    #[must_use]
    pub fn is_connected(&self, id: &EntityId) -> bool {
        self.inboxes.contains_key(id)
    }

    /// Number of connected peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.inboxes.len()
    }
}

#[async_trait]
impl Transport for LocalHub {
    async fn send(&self, peer: &EntityId, frame: Vec<u8>) -> Result<()> {
        let tx = self
            .inboxes
            .get(peer)
            .map(|entry| entry.value().clone())
            .ok_or(NetError::PeerNotFound(*peer))?;
        tx.send(frame).await.map_err(|_| NetError::PeerUnreachable(*peer))
    }
}
