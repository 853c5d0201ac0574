use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::{Result, SimplexError};

pub type Iteration = u32;
pub type Height = u64;
pub type PlayerId = String;

/// Parent hash of the genesis block and of "no proposal" placeholder blocks.
pub const EMPTY_PARENT_HASH: &str = "";

/// Parent hash sentinel marking the end of a protocol run.
pub const FINALIZE_PARENT_HASH: &str = "FINALIZE";

/// Block hash carried by timeout votes, which vote for the dummy block.
pub const DUMMY_BLOCK_HASH: &str = "";

/// Anything that can ride in a block.
pub trait Transaction: Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T> Transaction for T where T: Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

/// Block of transactions at a given height
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block<T> {
    pub height: Height,
    pub parent_hash: String,
    pub transactions: Vec<T>,
}

impl<T> Block<T> {
    pub fn new(height: Height, parent_hash: String, transactions: Vec<T>) -> Self {
        Self { height, parent_hash, transactions }
    }

    /// Placeholder for an iteration without a proposal.
    pub fn dummy(height: Height) -> Self {
        Self::new(height, EMPTY_PARENT_HASH.to_string(), Vec::new())
    }

    pub fn genesis() -> Self {
        Self::dummy(0)
    }

    pub fn finalize_marker(height: Height) -> Self {
        Self::new(height, FINALIZE_PARENT_HASH.to_string(), Vec::new())
    }

    pub fn is_finalize_marker(&self) -> bool {
        self.parent_hash == FINALIZE_PARENT_HASH
    }

    /// No parent link and no transactions: genesis or a timed-out iteration.
    pub fn is_dummy(&self) -> bool {
        self.parent_hash == EMPTY_PARENT_HASH && self.transactions.is_empty()
    }
}

/// Block that collected a quorum of votes. The votes stay signed so any
/// player can check the notarization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotarizedBlock<T> {
    pub block: Block<T>,
    pub votes: Vec<VoteSigned>,
}

impl<T> NotarizedBlock<T> {
    pub fn new(block: Block<T>, votes: Vec<VoteSigned>) -> Self {
        Self { block, votes }
    }
}

/// Notarized chain; index 0 is genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotarizedBlockchain<T> {
    pub blocks: Vec<NotarizedBlock<T>>,
}

impl<T> NotarizedBlockchain<T> {
    pub fn new(blocks: Vec<NotarizedBlock<T>>) -> Self {
        Self { blocks }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn tail(&self) -> Option<&NotarizedBlock<T>> {
        self.blocks.last()
    }

    pub fn blocks(&self) -> &[NotarizedBlock<T>] {
        &self.blocks
    }

    /// Block content of `prefix` matches the start of this chain. Votes are
    /// not compared: every player collects its own quorum.
    pub fn starts_with_blocks(&self, prefix: &[NotarizedBlock<T>]) -> bool
    where
        T: PartialEq,
    {
        self.blocks.len() >= prefix.len() && self.blocks.iter().zip(prefix).all(|(a, b)| a.block == b.block)
    }
}

/// Block proposal made by the iteration leader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal<T> {
    pub iteration: Iteration,
    pub player_id: PlayerId,
    pub new_block: Block<T>,
    pub parent_chain: NotarizedBlockchain<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalSigned<T> {
    proposal: Proposal<T>,
    #[serde(serialize_with = "crate::utils::serde_helpers::as_hex", deserialize_with = "crate::utils::serde_helpers::from_hex")]
    signature: Vec<u8>,
}

impl<T> ProposalSigned<T> {
    pub fn new(proposal: Proposal<T>, signature: &[u8]) -> Self {
        Self { proposal, signature: signature.to_vec() }
    }

    pub fn proposal(&self) -> &Proposal<T> {
        &self.proposal
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn into_proposal(self) -> Proposal<T> {
        self.proposal
    }
}

/// Vote cast by a player for the block with `block_hash`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vote {
    pub player_id: PlayerId,
    pub iteration: Iteration,
    pub block_hash: String,
}

impl Vote {
    pub fn new(player_id: impl Into<PlayerId>, iteration: Iteration, block_hash: impl Into<String>) -> Self {
        Self { player_id: player_id.into(), iteration, block_hash: block_hash.into() }
    }

    /// Timeout vote: for the iteration's dummy block rather than a proposal.
    pub fn is_for_dummy_block(&self) -> bool {
        self.block_hash == DUMMY_BLOCK_HASH
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoteSigned {
    vote: Vote,
    #[serde(serialize_with = "crate::utils::serde_helpers::as_hex", deserialize_with = "crate::utils::serde_helpers::from_hex")]
    signature: Vec<u8>,
}

impl VoteSigned {
    pub fn new(vote: Vote, signature: &[u8]) -> Self {
        Self { vote, signature: signature.to_vec() }
    }

    pub fn vote(&self) -> &Vote {
        &self.vote
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}

/// A player's acknowledgement that the protocol run has concluded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finalize {
    pub player_id: PlayerId,
    pub iteration: Iteration,
}

impl Finalize {
    pub fn new(player_id: impl Into<PlayerId>, iteration: Iteration) -> Self {
        Self { player_id: player_id.into(), iteration }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FinalizeSigned {
    finalize: Finalize,
    #[serde(serialize_with = "crate::utils::serde_helpers::as_hex", deserialize_with = "crate::utils::serde_helpers::from_hex")]
    signature: Vec<u8>,
}

impl FinalizeSigned {
    pub fn new(finalize: Finalize, signature: &[u8]) -> Self {
        Self { finalize, signature: signature.to_vec() }
    }

    pub fn finalize(&self) -> &Finalize {
        &self.finalize
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}

/// Identity announced by the network layer when a peer connects or leaves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    peer_id: String,
    #[serde(serialize_with = "crate::utils::serde_helpers::as_hex", deserialize_with = "crate::utils::serde_helpers::from_hex")]
    public_key_bytes: Vec<u8>,
}

impl PeerInfo {
    pub fn new(peer_id: impl Into<String>, public_key_bytes: &[u8]) -> Result<Self> {
        let info = Self { peer_id: peer_id.into(), public_key_bytes: public_key_bytes.to_vec() };
        info.validate()?;
        Ok(info)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.peer_id.is_empty() {
            return Err(SimplexError::InvalidArgument("peer id must not be empty".into()));
        }
        if self.public_key_bytes.is_empty() {
            return Err(SimplexError::InvalidArgument("peer public key bytes must not be empty".into()));
        }
        Ok(())
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key_bytes
    }
}
