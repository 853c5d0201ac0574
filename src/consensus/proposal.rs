//! Proposal engine: builds the leader's block proposal and validates proposals
//! received from other players against the local notarized chain.
//!
//! Validation checks run in order and stop at the first failure:
//! 1. the proposal is for the iteration the chain is at,
//! 2. its parent chain has the same blocks as the local chain,
//! 3. its block extends the chain tail (height + 1, parent hash).

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use crate::consensus::types::{
    Block, Iteration, NotarizedBlock, NotarizedBlockchain, PlayerId, Proposal, ProposalSigned, Transaction,
};
use crate::crypto::SignatureService;
use crate::network::{codec, NetworkClient, ProtocolMessage};
use crate::utils::metrics::{PROPOSALS_ACCEPTED, PROPOSALS_REJECTED};
use crate::utils::{Result, SimplexError, METRICS};

pub struct ProposalEngine<T, N: NetworkClient> {
    local_player_id: PlayerId,
    signer: Arc<dyn SignatureService>,
    network: Arc<N>,
    /// transactions waiting for this node's next turn as leader (FIFO)
    pending: Mutex<VecDeque<T>>,
    /// block hashes of proposals already accepted
    processed: Mutex<HashSet<String>>,
}

impl<T: Transaction, N: NetworkClient> ProposalEngine<T, N> {
    pub fn new(local_player_id: impl Into<PlayerId>, signer: Arc<dyn SignatureService>, network: Arc<N>) -> Self {
        Self {
            local_player_id: local_player_id.into(),
            signer,
            network,
            pending: Mutex::new(VecDeque::new()),
            processed: Mutex::new(HashSet::new()),
        }
    }

    pub fn add_transactions<I: IntoIterator<Item = T>>(&self, transactions: I) {
        self.pending.lock().extend(transactions);
    }

    /// Copy of the queued transactions, oldest first.
    pub fn pending_transactions(&self) -> Vec<T> {
        self.pending.lock().iter().cloned().collect()
    }

    pub fn is_for_current_iteration(proposal: &Proposal<T>, chain: &NotarizedBlockchain<T>) -> bool {
        proposal.iteration as usize == chain.len()
    }

    /// Compared by block content. Each player notarizes with the quorum it
    /// happened to collect, so vote lists differ between players.
    pub fn is_parent_chain_current_chain(proposal: &Proposal<T>, chain: &NotarizedBlockchain<T>) -> bool {
        proposal.parent_chain.len() == chain.len() && proposal.parent_chain.starts_with_blocks(&chain.blocks)
    }

    pub fn is_height_valid(parent: &NotarizedBlock<T>, new_block: &Block<T>) -> bool {
        new_block.height == parent.block.height + 1
    }

    pub fn is_parent_hash_valid(&self, parent: &NotarizedBlock<T>, new_block: &Block<T>) -> Result<bool> {
        let expected = self.signer.compute_block_hash(&parent.block)?;
        Ok(new_block.parent_hash == expected)
    }

    /// Height and parent hash checked against the last block of `chain`.
    pub fn is_proper_blockchain_extension(&self, proposal: &Proposal<T>, chain: &NotarizedBlockchain<T>) -> Result<bool> {
        let Some(parent) = chain.tail() else {
            return Ok(false);
        };
        let new_block = &proposal.new_block;
        Ok(Self::is_height_valid(parent, new_block) && self.is_parent_hash_valid(parent, new_block)?)
    }

    pub fn is_valid_proposal(&self, signed: &ProposalSigned<T>, chain: &NotarizedBlockchain<T>) -> Result<bool> {
        let proposal = signed.proposal();
        if !Self::is_for_current_iteration(proposal, chain) {
            debug!(iteration = proposal.iteration, chain_len = chain.len(), "proposal is not for the current iteration");
            return Ok(false);
        }
        if !Self::is_parent_chain_current_chain(proposal, chain) {
            debug!(iteration = proposal.iteration, "proposal parent chain differs from local chain");
            return Ok(false);
        }
        if !self.is_proper_blockchain_extension(proposal, chain)? {
            debug!(iteration = proposal.iteration, height = proposal.new_block.height, "proposal does not extend the chain");
            return Ok(false);
        }
        Ok(true)
    }

    /// Accept a proposal at most once (keyed by its block hash).
    pub fn process_proposal(&self, signed: &ProposalSigned<T>, chain: &NotarizedBlockchain<T>) -> Result<bool> {
        let proposal_id = self.signer.compute_block_hash(&signed.proposal().new_block)?;
        let mut processed = self.processed.lock();
        if processed.contains(&proposal_id) {
            debug!(proposal_id = %proposal_id, "proposal already processed");
            return Ok(false);
        }
        if !self.is_valid_proposal(signed, chain)? {
            METRICS.inc_counter(PROPOSALS_REJECTED);
            return Ok(false);
        }
        processed.insert(proposal_id);
        METRICS.inc_counter(PROPOSALS_ACCEPTED);
        Ok(true)
    }

    /// Drain the queue into a block on top of `chain`, sign and broadcast it.
    pub fn propose_new_block(&self, chain: &NotarizedBlockchain<T>, iteration: Iteration) -> Result<ProposalSigned<T>> {
        let parent = chain.tail().ok_or_else(|| {
            SimplexError::InvalidArgument("Could not get parent block hash for proposal".into())
        })?;
        let parent_hash = self.signer.compute_block_hash(&parent.block).map_err(|e| {
            SimplexError::InvalidArgument(format!("Could not get parent block hash for proposal: {e}"))
        })?;
        let transactions: Vec<T> = self.pending.lock().drain(..).collect();

        let proposal = Proposal {
            iteration,
            player_id: self.local_player_id.clone(),
            new_block: Block::new(parent.block.height + 1, parent_hash, transactions),
            parent_chain: chain.clone(),
        };
        let signature = self.signer.generate_signature(&codec::to_bytes(&proposal)?)?;
        let signed = ProposalSigned::new(proposal, &signature);

        info!(
            iteration,
            height = signed.proposal().new_block.height,
            transactions = signed.proposal().new_block.transactions.len(),
            "proposing new block"
        );
        self.network.broadcast_proposal(ProtocolMessage::proposal(codec::to_bytes(&signed)?));
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::types::{NotarizedBlock, ProposalSigned, Vote, VoteSigned};
    use crate::network::ProtocolMessageType;
    use crate::tests::support::{signer, RecordingNetwork};

    type Engine = ProposalEngine<String, RecordingNetwork>;

    fn genesis_chain() -> NotarizedBlockchain<String> {
        NotarizedBlockchain::new(vec![NotarizedBlock::new(Block::genesis(), vec![])])
    }

    fn engine() -> (Engine, Arc<RecordingNetwork>) {
        let net = RecordingNetwork::new(1);
        (ProposalEngine::new("leader", signer(), net.clone()), net)
    }

    fn proposal_for(engine: &Engine, chain: &NotarizedBlockchain<String>, iteration: u32, txs: &[&str]) -> ProposalSigned<String> {
        let parent = chain.tail().unwrap();
        let hash = engine.signer.compute_block_hash(&parent.block).unwrap();
        let proposal = Proposal {
            iteration,
            player_id: "leader".into(),
            new_block: Block::new(parent.block.height + 1, hash, txs.iter().map(|t| t.to_string()).collect()),
            parent_chain: chain.clone(),
        };
        ProposalSigned::new(proposal, &[0u8; 64])
    }

    #[test]
    fn test_propose_drains_queue_and_broadcasts() {
        let (engine, net) = engine();
        engine.add_transactions(vec!["t1".to_string(), "t2".to_string()]);
        engine.add_transactions(vec!["t3".to_string()]);
        assert_eq!(engine.pending_transactions(), vec!["t1", "t2", "t3"]);

        let chain = genesis_chain();
        let signed = engine.propose_new_block(&chain, 1).unwrap();
        let p = signed.proposal();
        assert_eq!(p.iteration, 1);
        assert_eq!(p.player_id, "leader");
        assert_eq!(p.new_block.height, 1);
        assert_eq!(p.new_block.transactions, vec!["t1", "t2", "t3"]);
        assert_eq!(p.parent_chain, chain);
        assert!(engine.pending_transactions().is_empty());

        let sent = net.sent_of(ProtocolMessageType::Proposal);
        assert_eq!(sent.len(), 1);
        let decoded: ProposalSigned<String> = codec::from_bytes(&sent[0].content).unwrap();
        assert_eq!(decoded, signed);

        // signature covers the serialized proposal
        let bytes = codec::to_bytes(decoded.proposal()).unwrap();
        assert!(engine.signer.verify_signature(&bytes, decoded.signature(), &engine.signer.public_key()).unwrap());

        // and the leader's own proposal validates
        assert!(engine.is_valid_proposal(&signed, &chain).unwrap());
    }

    #[test]
    fn test_propose_on_empty_chain_is_invalid_argument() {
        let (engine, _) = engine();
        let res = engine.propose_new_block(&NotarizedBlockchain::new(vec![]), 1);
        assert!(matches!(res, Err(SimplexError::InvalidArgument(_))));
    }

    #[test]
    fn test_iteration_must_match_chain_length() {
        let (engine, _) = engine();
        let chain = genesis_chain();
        let ok = proposal_for(&engine, &chain, 1, &[]);
        let stale = proposal_for(&engine, &chain, 2, &[]);
        assert!(Engine::is_for_current_iteration(ok.proposal(), &chain));
        assert!(!Engine::is_for_current_iteration(stale.proposal(), &chain));
        assert!(!engine.is_valid_proposal(&stale, &chain).unwrap());
    }

    #[test]
    fn test_parent_chain_must_match_local_chain() {
        let (engine, _) = engine();
        let chain = genesis_chain();
        let mut other = chain.clone();
        other.blocks[0].block.transactions.push("injected".to_string());
        let p = proposal_for(&engine, &other, 1, &[]);
        assert!(!Engine::is_parent_chain_current_chain(p.proposal(), &chain));
        assert!(!engine.is_valid_proposal(&p, &chain).unwrap());

        // a longer parent chain with a matching prefix is still another chain
        let mut longer = chain.clone();
        longer.blocks.push(NotarizedBlock::new(Block::dummy(1), vec![]));
        let p = proposal_for(&engine, &chain, 1, &[]);
        assert!(!Engine::is_parent_chain_current_chain(p.proposal(), &longer));
    }

    #[test]
    fn test_parent_chain_votes_are_not_compared() {
        let (engine, _) = engine();
        let chain = genesis_chain();
        let mut theirs = chain.clone();
        theirs.blocks[0].votes.push(VoteSigned::new(Vote::new("x", 0, ""), &[1]));
        let p = proposal_for(&engine, &theirs, 1, &["a"]);
        assert!(Engine::is_parent_chain_current_chain(p.proposal(), &chain));
        assert!(engine.is_valid_proposal(&p, &chain).unwrap());
    }

    #[test]
    fn test_extension_checks_are_independent() {
        let (engine, _) = engine();
        let chain = genesis_chain();
        let parent = chain.tail().unwrap();
        let good = proposal_for(&engine, &chain, 1, &[]);
        assert!(engine.is_proper_blockchain_extension(good.proposal(), &chain).unwrap());

        let mut wrong_height = good.proposal().clone();
        wrong_height.new_block.height = 2;
        assert!(!Engine::is_height_valid(parent, &wrong_height.new_block));
        assert!(engine.is_parent_hash_valid(parent, &wrong_height.new_block).unwrap());
        assert!(!engine.is_proper_blockchain_extension(&wrong_height, &chain).unwrap());

        let mut wrong_hash = good.proposal().clone();
        wrong_hash.new_block.parent_hash = "deadbeef".into();
        assert!(Engine::is_height_valid(parent, &wrong_hash.new_block));
        assert!(!engine.is_parent_hash_valid(parent, &wrong_hash.new_block).unwrap());
        assert!(!engine.is_proper_blockchain_extension(&wrong_hash, &chain).unwrap());
    }

    #[test]
    fn test_process_proposal_only_once() {
        let (engine, _) = engine();
        let chain = genesis_chain();
        let p = proposal_for(&engine, &chain, 1, &["a"]);
        assert!(engine.process_proposal(&p, &chain).unwrap());
        assert!(!engine.process_proposal(&p, &chain).unwrap());
    }

    #[test]
    fn test_invalid_proposal_is_not_recorded() {
        let (engine, _) = engine();
        let chain = genesis_chain();
        let p = proposal_for(&engine, &chain, 7, &["a"]);
        assert!(!engine.process_proposal(&p, &chain).unwrap());
        // same block, now for the right iteration
        let mut fixed = p.proposal().clone();
        fixed.iteration = 1;
        assert!(engine.process_proposal(&ProposalSigned::new(fixed, &[]), &chain).unwrap());
    }
}
