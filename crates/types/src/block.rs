//! Block index handle.

use crate::hash::Hash;
use crate::height::Height;
use std::fmt;
use std::sync::Arc;

/// Immutable handle to a block in the header chain.
///
/// The chainstate collaborator hands these to the DKG core; the core only
/// ever walks backwards through `ancestor` to find the quorum base block.
/// Sharing is by `Arc`, so a reorg simply results in new handles whose
/// parent chain diverges.
#[derive(Clone)]
pub struct BlockIndex {
    hash: Hash,
    height: Height,
    parent: Option<Arc<BlockIndex>>,
}

impl BlockIndex {
    /// Construct a genesis block index.
    pub fn genesis(hash: Hash) -> Arc<Self> {
        Arc::new(Self {
            hash,
            height: Height::new(0),
            parent: None,
        })
    }

    /// Construct a child of `parent` with the given hash.
    pub fn new_child(parent: &Arc<BlockIndex>, hash: Hash) -> Arc<Self> {
        Arc::new(Self {
            hash,
            height: parent.height.next(),
            parent: Some(Arc::clone(parent)),
        })
    }

    /// Block hash.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Block height.
    pub fn height(&self) -> Height {
        self.height
    }

    /// Parent block, if any.
    pub fn parent(&self) -> Option<&Arc<BlockIndex>> {
        self.parent.as_ref()
    }

    /// Walk back to the ancestor at `height`.
    ///
    /// Returns `None` if `height` is above this block.
    pub fn ancestor(self: &Arc<Self>, height: Height) -> Option<Arc<BlockIndex>> {
        if height > self.height {
            return None;
        }
        let mut cur = Arc::clone(self);
        while cur.height > height {
            match &cur.parent {
                Some(parent) => cur = Arc::clone(parent),
                None => return None,
            }
        }
        Some(cur)
    }
}

impl fmt::Debug for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockIndex")
            .field("hash", &self.hash)
            .field("height", &self.height)
            .finish()
    }
}
