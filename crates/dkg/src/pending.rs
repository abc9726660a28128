//! Pending DKG message buffers
//!
//! Deserializing DKG messages involves BLS point checks and is far too slow
//! for the network message handler. Incoming messages are therefore pushed
//! as opaque bytes into a per-message-type FIFO and popped in batches by
//! the phase handler worker, which does the decoding.
//!
//! Admission is bounded per peer, and a digest set suppresses duplicates
//! for the lifetime of the round. Many network tasks push concurrently;
//! exactly one scheduler worker pops.

use parking_lot::Mutex;
use quorumnet_metrics::dkg::{DKG_MESSAGES_ADMITTED, DKG_MESSAGES_DROPPED};
use quorumnet_types::{Hash, PeerId, QuorumType};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::trace;

use crate::error::DkgError;
use crate::messages::MessageKind;

/// One received, not yet decoded message.
pub type BinaryMessage = (PeerId, Vec<u8>);

struct Inner {
    pending: VecDeque<BinaryMessage>,
    per_peer_count: HashMap<PeerId, usize>,
    seen: HashSet<Hash>,
}

/// Bounded FIFO of raw messages for one `(quorum_type, message_kind)`.
pub struct PendingMessages {
    quorum_type: QuorumType,
    kind: MessageKind,
    max_messages_per_peer: usize,
    inner: Mutex<Inner>,
}

impl PendingMessages {
    /// Create an empty buffer.
    pub fn new(quorum_type: QuorumType, kind: MessageKind, max_messages_per_peer: usize) -> Self {
        Self {
            quorum_type,
            kind,
            max_messages_per_peer,
            inner: Mutex::new(Inner {
                pending: VecDeque::new(),
                per_peer_count: HashMap::new(),
                seen: HashSet::new(),
            }),
        }
    }

    /// The message kind this buffer holds.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Admit a raw message.
    ///
    /// Over-quota and duplicate messages are discarded and reported as
    /// [`DkgError::InputReject`]; callers treat that as routine flood
    /// control, not as misbehavior.
    pub fn push(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), DkgError> {
        let digest = Hash::compute(&bytes);
        let mut inner = self.inner.lock();

        let count = inner.per_peer_count.get(&peer).copied().unwrap_or(0);
        if count >= self.max_messages_per_peer {
            trace!(%peer, kind = %self.kind, "too many pending messages, dropping");
            DKG_MESSAGES_DROPPED
                .with_label_values(&[
                    &self.quorum_type.to_string(),
                    self.kind.command_tag(),
                    "quota",
                ])
                .inc();
            return Err(DkgError::InputReject {
                peer,
                reason: "per-peer message quota exceeded",
            });
        }

        if !inner.seen.insert(digest) {
            trace!(%peer, kind = %self.kind, %digest, "already seen, dropping");
            DKG_MESSAGES_DROPPED
                .with_label_values(&[
                    &self.quorum_type.to_string(),
                    self.kind.command_tag(),
                    "duplicate",
                ])
                .inc();
            return Err(DkgError::InputReject {
                peer,
                reason: "duplicate message",
            });
        }

        *inner.per_peer_count.entry(peer).or_insert(0) += 1;
        inner.pending.push_back((peer, bytes));
        DKG_MESSAGES_ADMITTED
            .with_label_values(&[&self.quorum_type.to_string(), self.kind.command_tag()])
            .inc();
        Ok(())
    }

    /// Pop up to `max_count` messages in arrival order.
    ///
    /// Frees the senders' admission quota but keeps their digests in the
    /// seen set, so re-sends stay suppressed until [`Self::clear`].
    pub fn pop(&self, max_count: usize) -> Vec<BinaryMessage> {
        let mut inner = self.inner.lock();
        let take = max_count.min(inner.pending.len());
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            let (peer, bytes) = match inner.pending.pop_front() {
                Some(msg) => msg,
                None => break,
            };
            if let Some(count) = inner.per_peer_count.get_mut(&peer) {
                *count = count.saturating_sub(1);
            }
            out.push((peer, bytes));
        }
        out
    }

    /// Whether a message with this digest was ever admitted since the last
    /// clear. Used for INV bookkeeping.
    pub fn has_seen(&self, digest: &Hash) -> bool {
        self.inner.lock().seen.contains(digest)
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    /// Drop everything: queue, per-peer counters and the seen set.
    /// Called at the start of every new DKG round.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.per_peer_count.clear();
        inner.seen.clear();
    }
}
