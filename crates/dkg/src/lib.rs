//! DKG session handling for quorumnet masternode quorums
//!
//! This crate drives a masternode set through the rounds of a threshold-BLS
//! distributed key generation, in lock-step with chain height progression.
//!
//! # Architecture
//!
//! - [`membership`]: deterministic quorum member selection from chain state
//! - [`connections`]: the quorum communication graph (ring relays,
//!   all-connected mode, watch mode, PoSe probes)
//! - [`pending`]: bounded per-message-type FIFO buffers decoupling network
//!   ingress from cryptographic decoding
//! - [`session`]: the one-shot six-phase DKG protocol engine
//! - [`handler`]: the per-quorum-type phase scheduler worker
//! - [`manager`]: the lifecycle coordinator fanning chain and network events
//!   out to the handlers
//!
//! External collaborators (chainstate, masternode registry, connection
//! manager, peer scoring) are consumed through the traits in [`registry`]
//! and [`connections`]; the crate never opens sockets or touches disk.

#[cfg(test)]
pub(crate) mod testutil;

pub mod config;
pub mod connections;
pub mod error;
pub mod handler;
pub mod manager;
pub mod membership;
pub mod messages;
pub mod pending;
pub mod registry;
pub mod session;
pub mod spork;

pub use config::DkgConfig;
pub use connections::{ConnectionManager, ConnectionPlan};
pub use error::DkgError;
pub use handler::{
    DkgNetwork, DkgServices, DkgSessionHandler, LocalIdentity, QuorumPhase, LOCAL_PEER,
};
pub use manager::{DkgManager, VerifiedContributionsCache};
pub use membership::MembershipCalculator;
pub use messages::{
    Complaint, Contribution, FinalCommitment, Justification, MessageKind, PrematureCommitment,
};
pub use pending::PendingMessages;
pub use registry::{
    CommitmentSink, MasternodeEntry, MasternodeMetaStore, MasternodeRegistry, PeerScoring,
};
pub use session::{DkgSession, MisbehaviorReport};
pub use spork::{SporkFlags, SporkPolicy};
