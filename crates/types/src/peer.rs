//! Network peer identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a connected network peer.
///
/// Assigned by the connection manager; the DKG core only uses it for
/// admission accounting and misbehavior reports, never for protocol
/// semantics (those key off [`crate::ProTxHash`]).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer({})", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(value: u64) -> Self {
        PeerId(value)
    }
}
