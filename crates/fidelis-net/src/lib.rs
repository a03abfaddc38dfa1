//! # fidelis-net
//!
//! Signed gossip dissemination between society nodes.
//!
//! Provides:
//! - [`SignedEnvelope`]: self-authenticating frames with per-sender counters
//! - [`Disseminator`]: epidemic fanout, replay suppression and relaying
//! - [`Transport`]: the seam to an outer transport, with the in-process
//!   [`LocalHub`] used for simulations
//!
//! ## Security Model
//!
//! Transports are untrusted. Every frame is size-checked before decoding
//! and dropped unless its sender is registered, unrevoked and its signature
//! verifies.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod error;
pub mod gossip;
pub mod transport;

pub use envelope::{SignedEnvelope, MAX_ENVELOPE_SIZE, MAX_PAYLOAD_SIZE};
pub use error::{NetError, Result};
pub use gossip::{Delivery, Disseminator, DropReason, GossipConfig, GossipStatsSnapshot};
pub use transport::{LocalHub, Transport, DEFAULT_INBOX_CAPACITY};
