//! # fidelis-core
//!
//! A federation node tying the Fidelis components together.
//!
//! A [`FederationNode`] accepts witnessed events into its reputation engine
//! and gossips them to peers, runs membership and stake changes through
//! Byzantine fault tolerant consensus, audits challenges, and watches the
//! resource economy for herding. Significant changes are published as
//! [`FederationEvent`]s.
//!
//! Configuration lives in [`FederationConfig`], one section per component,
//! loadable from JSON.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod node;

pub use config::{ConfigError, FederationConfig, FederationConfigBuilder, NodeConfig};
pub use error::{CoreError, ErrorClass, Result};
pub use events::{EventSubmission, FederationEvent, FederationMessage, LedgerRequest, TickReport};
pub use node::FederationNode;
