//! Epidemic gossip dissemination.
//!
//! A [`Disseminator`] seals payloads into [`SignedEnvelope`]s and pushes
//! them to a random subset of peers. Each send runs in its own task under a
//! timeout, so a slow peer never blocks the caller.
//!
//! ## Receive Pipeline
//!
//! 1. Frame size is checked before decoding
//! 2. Unknown or revoked senders and bad signatures are dropped
//! 3. Payload hash and payload decoding are checked
//! 4. A per-sender counter compare-and-set suppresses replays: a counter
//!    not greater than the last accepted one is a duplicate

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use fidelis_identity::{EntityId, EntityKeyPair, KeyDirectory};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::envelope::{SignedEnvelope, MAX_ENVELOPE_SIZE};
use crate::transport::Transport;
use crate::{NetError, Result};

/// Maximum number of peers a disseminator tracks.
pub const MAX_PEERS: usize = 4096;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for gossip dissemination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Peers each envelope is pushed to.
    /// Default: 3.
    pub fanout: usize,

    /// Per-send timeout in milliseconds.
    /// Default: 2000.
    pub send_timeout_ms: u64,

    /// Largest accepted frame in bytes.
    /// Default: 65536.
    pub max_envelope_size: usize,

    /// Whether accepted envelopes are re-pushed to other peers.
    /// Default: true.
    pub relay: bool,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            fanout: 3,
            send_timeout_ms: 2000,
            max_envelope_size: MAX_ENVELOPE_SIZE,
            relay: true,
        }
    }
}

impl GossipConfig {
    /// Set the fanout.
    #[must_use]
    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    /// Set the per-send timeout.
    #[must_use]
    pub fn with_send_timeout_ms(mut self, ms: u64) -> Self {
        self.send_timeout_ms = ms;
        self
    }

    /// Enable or disable relaying.
    #[must_use]
    pub fn with_relay(mut self, relay: bool) -> Self {
        self.relay = relay;
        self
    }

    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.fanout == 0 {
            return Err(NetError::InvalidValue {
                field: "gossip.fanout",
                reason: "must be at least 1".into(),
            });
        }
        if self.send_timeout_ms == 0 {
            return Err(NetError::InvalidValue {
                field: "gossip.send_timeout_ms",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_envelope_size == 0 || self.max_envelope_size > MAX_ENVELOPE_SIZE {
            return Err(NetError::InvalidValue {
                field: "gossip.max_envelope_size",
                reason: format!("must be in 1..={}", MAX_ENVELOPE_SIZE),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// Why an envelope was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Frame or payload above the size limit.
    Oversized {
        /// Actual size.
        size: usize,
        /// Limit.
        max: usize,
    },
    /// Frame, hash or payload did not decode.
    Malformed(String),
    /// Sender is not registered.
    UnknownSender(EntityId),
    /// Sender is revoked.
    RevokedSender(EntityId),
    /// Signature did not verify.
    BadSignature(EntityId),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oversized { size, max } => write!(f, "oversized ({} > {})", size, max),
            Self::Malformed(reason) => write!(f, "malformed: {}", reason),
            Self::UnknownSender(id) => write!(f, "unknown sender {}", id),
            Self::RevokedSender(id) => write!(f, "revoked sender {}", id),
            Self::BadSignature(id) => write!(f, "bad signature from {}", id),
        }
    }
}

/// Result of receiving an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<P> {
    /// Fresh and authentic.
    Accepted(P),
    /// Counter already seen for this sender.
    Duplicate,
    /// Rejected before delivery.
    Dropped(DropReason),
}

impl<P> Delivery<P> {
    /// Whether the payload was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Counters for monitoring.
#[derive(Debug, Default)]
struct GossipStats {
    sent: AtomicU64,
    send_failures: AtomicU64,
    accepted: AtomicU64,
    duplicates: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of gossip counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipStatsSnapshot {
    /// Sends that completed.
    pub sent: u64,
    /// Sends that failed or timed out.
    pub send_failures: u64,
    /// Envelopes accepted.
    pub accepted: u64,
    /// Replays suppressed.
    pub duplicates: u64,
    /// Envelopes dropped.
    pub dropped: u64,
}

// ============================================================================
// Disseminator
// ============================================================================

/// Signs, pushes and receives gossip payloads of type `P`.
pub struct Disseminator<P> {
    keys: Arc<EntityKeyPair>,
    directory: Arc<dyn KeyDirectory>,
    transport: Arc<dyn Transport>,
    config: GossipConfig,
    peers: RwLock<Vec<EntityId>>,
    counter: AtomicU64,
    last_seen: DashMap<EntityId, AtomicU64>,
    stats: Arc<GossipStats>,
    _payload: PhantomData<fn() -> P>,
}

impl<P> std::fmt::Debug for Disseminator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disseminator")
            .field("id", &self.keys.id())
            .field("peers", &self.peers.read().len())
            .field("counter", &self.counter.load(Ordering::Relaxed))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P> Disseminator<P>
where
    P: Serialize + DeserializeOwned,
{
    /// Create a disseminator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` for a bad configuration.
    pub fn new(
        keys: Arc<EntityKeyPair>,
        directory: Arc<dyn KeyDirectory>,
        transport: Arc<dyn Transport>,
        config: GossipConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            keys,
            directory,
            transport,
            config,
            peers: RwLock::new(Vec::new()),
            counter: AtomicU64::new(0),
            last_seen: DashMap::new(),
            stats: Arc::new(GossipStats::default()),
            _payload: PhantomData,
        })
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Add a peer. Self and duplicates are ignored.
    pub fn add_peer(&self, peer: EntityId) -> bool {
        if peer == self.keys.id() {
            return false;
        }
        let mut peers = self.peers.write();
        if peers.contains(&peer) || peers.len() >= MAX_PEERS {
            return false;
        }
        peers.push(peer);
        true
    }

    /// Remove a peer.
    pub fn remove_peer(&self, peer: &EntityId) -> bool {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|p| p != peer);
        peers.len() != before
    }

    /// Current peers.
    #[must_use]
    pub fn peers(&self) -> Vec<EntityId> {
        self.peers.read().clone()
    }

    /// Last counter this node used.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Last counter accepted from `sender`.
    #[must_use]
    pub fn last_seen(&self, sender: &EntityId) -> Option<u64> {
        self.last_seen.get(sender).map(|c| c.load(Ordering::Acquire))
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> GossipStatsSnapshot {
        GossipStatsSnapshot {
            sent: self.stats.sent.load(Ordering::Relaxed),
            send_failures: self.stats.send_failures.load(Ordering::Relaxed),
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            duplicates: self.stats.duplicates.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }

    /// Seal `payload` and push it to `fanout` random peers.
    ///
    /// Returns the sealed envelope; delivery happens in background tasks.
    ///
    /// # Errors
    ///
    /// Returns `TooLarge` or `Crypto` if sealing fails, or `NoRuntime`
    /// outside a tokio runtime.
    pub fn broadcast(&self, payload: &P) -> Result<SignedEnvelope> {
        let counter = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        let envelope = SignedEnvelope::seal(&self.keys, counter, payload)?;
        self.push(&envelope, None)?;
        Ok(envelope)
    }

    /// Re-push an accepted envelope to random peers other than its sender,
    /// preserving the original signature.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if encoding fails or `NoRuntime` outside a tokio
    /// runtime.
    pub fn relay(&self, envelope: &SignedEnvelope) -> Result<()> {
        if !self.config.relay {
            return Ok(());
        }
        self.push(envelope, Some(envelope.sender))
    }

    /// Decode a frame and run the receive pipeline.
    ///
    /// Returns the decoded envelope alongside the delivery so accepted
    /// envelopes can be relayed.
    pub fn on_frame(&self, frame: &[u8]) -> (Delivery<P>, Option<SignedEnvelope>) {
        if frame.len() > self.config.max_envelope_size {
            return (
                self.drop_with(DropReason::Oversized {
                    size: frame.len(),
                    max: self.config.max_envelope_size,
                }),
                None,
            );
        }
        match SignedEnvelope::from_bytes(frame, self.config.max_envelope_size) {
            Ok(envelope) => {
                let delivery = self.on_receive(&envelope);
                (delivery, Some(envelope))
            }
            Err(e) => (self.drop_with(DropReason::Malformed(e.to_string())), None),
        }
    }

    /// Authenticate an envelope and suppress replays.
    pub fn on_receive(&self, envelope: &SignedEnvelope) -> Delivery<P> {
        let sender = envelope.sender;
        if envelope.payload.len() > self.config.max_envelope_size {
            return self.drop_with(DropReason::Oversized {
                size: envelope.payload.len(),
                max: self.config.max_envelope_size,
            });
        }
        if !self.directory.contains(&sender) {
            return self.drop_with(DropReason::UnknownSender(sender));
        }
        if self.directory.is_revoked(&sender) {
            return self.drop_with(DropReason::RevokedSender(sender));
        }
        if envelope.verify(self.directory.as_ref()).is_err() {
            return self.drop_with(DropReason::BadSignature(sender));
        }
        if !envelope.hash_matches() {
            return self.drop_with(DropReason::Malformed("payload hash mismatch".into()));
        }
        let payload: P = match envelope.open() {
            Ok(p) => p,
            Err(e) => return self.drop_with(DropReason::Malformed(e.to_string())),
        };

        if !self.advance_counter(&sender, envelope.counter) {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(sender = %sender, counter = envelope.counter, "Duplicate envelope suppressed");
            return Delivery::Duplicate;
        }
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        Delivery::Accepted(payload)
    }

    /// Raise the sender's last-seen counter to `counter` if it is higher.
    fn advance_counter(&self, sender: &EntityId, counter: u64) -> bool {
        if !self.last_seen.contains_key(sender) {
            self.last_seen.entry(*sender).or_insert_with(|| AtomicU64::new(0));
        }
        let Some(last) = self.last_seen.get(sender) else {
            return false;
        };
        let mut current = last.load(Ordering::Acquire);
        loop {
            if counter <= current {
                return false;
            }
            match last.compare_exchange(current, counter, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn drop_with(&self, reason: DropReason) -> Delivery<P> {
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        match &reason {
            DropReason::BadSignature(_) | DropReason::RevokedSender(_) => {
                warn!(reason = %reason, "Dropping gossip envelope");
            }
            _ => debug!(reason = %reason, "Dropping gossip envelope"),
        }
        Delivery::Dropped(reason)
    }

    /// Send `envelope` to a random subset of peers, each in its own task.
    fn push(&self, envelope: &SignedEnvelope, exclude: Option<EntityId>) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| NetError::NoRuntime)?;
        let frame = envelope.to_bytes()?;
        let targets: Vec<EntityId> = {
            let peers = self.peers.read();
            let candidates: Vec<EntityId> = peers.iter().copied().filter(|p| Some(*p) != exclude).collect();
            candidates
                .choose_multiple(&mut rand::thread_rng(), self.config.fanout)
                .copied()
                .collect()
        };
        let timeout = Duration::from_millis(self.config.send_timeout_ms);

        for peer in targets {
            let transport = Arc::clone(&self.transport);
            let stats = Arc::clone(&self.stats);
            let frame = frame.clone();
            let counter = envelope.counter;
            handle.spawn(async move {
                match tokio::time::timeout(timeout, transport.send(&peer, frame)).await {
                    Ok(Ok(())) => {
                        stats.sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Err(e)) => {
                        stats.send_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(peer = %peer, counter, error = %e, "Gossip send failed");
                    }
                    Err(_) => {
                        stats.send_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(peer = %peer, counter, "Gossip send timed out");
                    }
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalHub;
    use chrono::Utc;
    use fidelis_identity::{Entity, EntityKind, EntityRegistry, SocietyId};
    use tokio::sync::mpsc;

    struct Pair {
        alice: Disseminator<String>,
        bob: Disseminator<String>,
        bob_rx: mpsc::Receiver<Vec<u8>>,
        registry: Arc<parking_lot::RwLock<EntityRegistry>>,
        alice_key: Arc<EntityKeyPair>,
        bob_key: Arc<EntityKeyPair>,
    }

    fn pair() -> Pair {
        let alice_key = Arc::new(EntityKeyPair::from_seed(&[1; 32]));
        let bob_key = Arc::new(EntityKeyPair::from_seed(&[2; 32]));
        let registry = EntityRegistry::shared();
        for (i, key) in [&alice_key, &bob_key].iter().enumerate() {
            registry
                .write()
                .register(Entity::new(
                    *key.public_key(),
                    EntityKind::Organization,
                    SocietyId::new(format!("s{i}")).unwrap(),
                    Utc::now(),
                ))
                .unwrap();
        }
        let hub = LocalHub::new();
        let _alice_rx = hub.connect(alice_key.id(), 16);
        let bob_rx = hub.connect(bob_key.id(), 16);
        let transport: Arc<dyn Transport> = Arc::new(hub);
        let alice = Disseminator::new(alice_key.clone(), registry.clone(), transport.clone(), GossipConfig::default()).unwrap();
        let bob = Disseminator::new(bob_key.clone(), registry.clone(), transport, GossipConfig::default()).unwrap();
        alice.add_peer(bob_key.id());
        bob.add_peer(alice_key.id());
        Pair {
            alice,
            bob,
            bob_rx,
            registry,
            alice_key,
            bob_key,
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_peer_and_is_accepted_once() {
        let mut p = pair();
        p.alice.broadcast(&"trust update".to_string()).unwrap();
        let frame = p.bob_rx.recv().await.unwrap();

        let (delivery, envelope) = p.bob.on_frame(&frame);
        assert_eq!(delivery, Delivery::Accepted("trust update".to_string()));
        assert_eq!(envelope.unwrap().sender, p.alice_key.id());
        assert_eq!(p.bob.last_seen(&p.alice_key.id()), Some(1));

        let (replay, _) = p.bob.on_frame(&frame);
        assert_eq!(replay, Delivery::Duplicate);
        assert_eq!(p.bob.stats().duplicates, 1);
    }

    #[tokio::test]
    async fn test_older_counter_is_duplicate() {
        let p = pair();
        let first = SignedEnvelope::seal(&p.alice_key, 1, &"a".to_string()).unwrap();
        let second = SignedEnvelope::seal(&p.alice_key, 2, &"b".to_string()).unwrap();
        assert!(p.bob.on_receive(&second).is_accepted());
        assert_eq!(p.bob.on_receive(&first), Delivery::Duplicate);
    }

    #[tokio::test]
    async fn test_tampered_envelope_dropped() {
        let p = pair();
        let mut envelope = SignedEnvelope::seal(&p.alice_key, 1, &"a".to_string()).unwrap();
        envelope.counter = 99;
        assert_eq!(
            p.bob.on_receive(&envelope),
            Delivery::Dropped(DropReason::BadSignature(p.alice_key.id()))
        );
        // A forged counter must not advance the replay window.
        assert_eq!(p.bob.last_seen(&p.alice_key.id()), None);
    }

    #[tokio::test]
    async fn test_unknown_and_revoked_senders_dropped() {
        let p = pair();
        let stranger = EntityKeyPair::from_seed(&[9; 32]);
        let envelope = SignedEnvelope::seal(&stranger, 1, &"x".to_string()).unwrap();
        assert_eq!(
            p.bob.on_receive(&envelope),
            Delivery::Dropped(DropReason::UnknownSender(stranger.id()))
        );

        p.registry.write().revoke(&p.alice_key.id(), Utc::now()).unwrap();
        let envelope = SignedEnvelope::seal(&p.alice_key, 1, &"x".to_string()).unwrap();
        assert_eq!(
            p.bob.on_receive(&envelope),
            Delivery::Dropped(DropReason::RevokedSender(p.alice_key.id()))
        );
    }

    #[tokio::test]
    async fn test_oversized_and_garbage_frames_dropped() {
        let p = pair();
        let big = vec![0u8; MAX_ENVELOPE_SIZE + 1];
        assert!(matches!(p.bob.on_frame(&big).0, Delivery::Dropped(DropReason::Oversized { .. })));
        assert!(matches!(p.bob.on_frame(&[0xff; 10]).0, Delivery::Dropped(DropReason::Malformed(_))));
        assert_eq!(p.bob.stats().dropped, 2);
    }

    #[tokio::test]
    async fn test_wrong_payload_type_dropped() {
        let p = pair();
        let envelope = SignedEnvelope::seal(&p.alice_key, 1, &7u8).unwrap();
        assert!(matches!(p.bob.on_receive(&envelope), Delivery::Dropped(DropReason::Malformed(_))));
    }

    #[tokio::test]
    async fn test_relay_skips_original_sender() {
        let p = pair();
        let envelope = SignedEnvelope::seal(&p.alice_key, 1, &"a".to_string()).unwrap();
        // Bob's only peer is the sender, so relaying sends nothing.
        p.bob.relay(&envelope).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(p.bob.stats().sent, 0);
        assert_eq!(p.bob.stats().send_failures, 0);
        assert!(!p.bob.add_peer(p.bob_key.id()));
    }

    #[test]
    fn test_broadcast_outside_runtime_fails() {
        let p = pair();
        assert!(matches!(p.alice.broadcast(&"a".to_string()), Err(NetError::NoRuntime)));
    }

    #[test]
    fn test_config_validation() {
        assert!(GossipConfig::default().validate().is_ok());
        assert!(GossipConfig::default().with_fanout(0).validate().is_err());
        assert!(GossipConfig::default().with_send_timeout_ms(0).validate().is_err());
    }
}
