//! Append-only store of notarized blocks, seeded with genesis.
//!
//! Every change to the chain length is published on a watch channel so the
//! round loop can wait for an iteration's height to be notarized.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::consensus::types::{Block, Height, NotarizedBlock, NotarizedBlockchain, Transaction, VoteSigned};
use crate::crypto::SignatureService;
use crate::utils::{Result, SimplexError};

pub struct BlockchainStore<T> {
    signer: Arc<dyn SignatureService>,
    chain: RwLock<Vec<NotarizedBlock<T>>>,
    length: watch::Sender<usize>,
}

impl<T: Transaction> BlockchainStore<T> {
    pub fn new(signer: Arc<dyn SignatureService>) -> Self {
        let genesis = NotarizedBlock::new(Block::genesis(), Vec::new());
        let (length, _) = watch::channel(1);
        Self { signer, chain: RwLock::new(vec![genesis]), length }
    }

    pub fn create_dummy_block(&self, height: Height) -> Block<T> {
        Block::dummy(height)
    }

    pub fn create_genesis_block(&self) -> Block<T> {
        Block::genesis()
    }

    pub fn create_finalize_block(&self, height: Height) -> Block<T> {
        Block::finalize_marker(height)
    }

    pub fn create_notarized_block(&self, block: Block<T>, votes: Vec<VoteSigned>) -> NotarizedBlock<T> {
        NotarizedBlock::new(block, votes)
    }

    /// Snapshot of the current chain.
    pub fn blockchain(&self) -> NotarizedBlockchain<T> {
        NotarizedBlockchain::new(self.chain.read().clone())
    }

    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    /// Never true: genesis is always present.
    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }

    pub fn tail(&self) -> NotarizedBlock<T> {
        let chain = self.chain.read();
        // seeded with genesis and never shrinks
        chain[chain.len() - 1].clone()
    }

    /// Chain length updates, starting from the current length.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.length.subscribe()
    }

    /// Append a newly notarized block. It must extend the current tail.
    pub fn append(&self, notarized: NotarizedBlock<T>) -> Result<()> {
        let mut chain = self.chain.write();
        let parent = &chain[chain.len() - 1].block;
        if !self.is_link_valid(parent, &notarized.block)? {
            return Err(SimplexError::InvalidArgument(format!(
                "block at height {} does not extend the chain tail at height {}",
                notarized.block.height, parent.height
            )));
        }
        info!(height = notarized.block.height, votes = notarized.votes.len(), "appended notarized block");
        chain.push(notarized);
        self.length.send_replace(chain.len());
        Ok(())
    }

    /// Take the missing suffix of a longer chain that extends ours.
    ///
    /// Every adopted block must link to its parent and pass `is_notarized`;
    /// otherwise nothing is taken and an error is returned. A chain that is
    /// not longer, or that diverges from the local one, is ignored.
    pub fn adopt<F>(&self, other: &NotarizedBlockchain<T>, is_notarized: F) -> Result<usize>
    where
        F: Fn(&NotarizedBlock<T>) -> Result<bool>,
    {
        let mut chain = self.chain.write();
        let local_len = chain.len();
        if other.len() <= local_len {
            return Ok(0);
        }
        if !other.starts_with_blocks(&chain[..]) {
            debug!(local_len, other_len = other.len(), "peer chain diverges from local chain; not adopting");
            return Ok(0);
        }
        for i in local_len..other.len() {
            let parent = &other.blocks[i - 1].block;
            let child = &other.blocks[i];
            if !self.is_link_valid(parent, &child.block)? {
                return Err(SimplexError::InvalidArgument(format!(
                    "malformed block chain at height {}",
                    child.block.height
                )));
            }
            if !is_notarized(child)? {
                return Err(SimplexError::InvalidArgument(format!(
                    "block at height {} is not notarized by a quorum",
                    child.block.height
                )));
            }
        }
        chain.extend_from_slice(&other.blocks[local_len..]);
        self.length.send_replace(chain.len());
        let adopted = other.len() - local_len;
        info!(adopted, height = chain.len() - 1, "adopted notarized blocks from peer chain");
        Ok(adopted)
    }

    /// Height goes up by one. A dummy block stands in for a timed-out
    /// iteration and has no parent hash; any other block names its parent.
    fn is_link_valid(&self, parent: &Block<T>, child: &Block<T>) -> Result<bool> {
        if child.height != parent.height + 1 {
            return Ok(false);
        }
        if child.is_dummy() {
            return Ok(true);
        }
        Ok(child.parent_hash == self.signer.compute_block_hash(parent)?)
    }
}
