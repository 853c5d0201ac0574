//! Protocol state machine: the round loop and the inbound message dispatcher.
//!
//! Round loop, until `stop()`:
//! 1. advance the iteration and elect its leader,
//! 2. if local player leads, propose a block on top of the notarized chain,
//! 3. arm the iteration timer and wait for completion.
//!
//! A round completes when a block is notarized (quorum of votes), when the
//! node learns it is behind a peer's chain, or when the timer fires. After a
//! timeout the loop counts its own vote for the dummy block and waits until
//! the iteration's height is notarized, either by a quorum of timeout votes
//! or by catching up from a peer's chain.
//!
//! The local player is never in the registry; it is counted alongside it.
//!
//! Handlers for votes, proposals and finalize messages run concurrently with
//! the loop from the network tasks. They only take short-lived locks inside
//! the engines.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::consensus::blockchain::BlockchainStore;
use crate::consensus::iteration::{IterationCoordinator, IterationState};
use crate::consensus::latch::CompletionLatch;
use crate::consensus::players::PlayerRegistry;
use crate::consensus::proposal::ProposalEngine;
use crate::consensus::types::{
    Finalize, FinalizeSigned, Iteration, NotarizedBlock, NotarizedBlockchain, PlayerId, ProposalSigned, Transaction, VoteSigned,
};
use crate::consensus::voting::VotingEngine;
use crate::crypto::SignatureService;
use crate::network::{
    codec, InboundMessage, NetworkClient, NetworkEvent, NetworkEventMessage, NetworkGate, ProtocolMessage,
    ProtocolMessageType,
};
use crate::node::config::ProtocolConfig;
use crate::utils::metrics::{BLOCKS_NOTARIZED, FINALIZE_RECEIVED, ITERATION, MESSAGES_FAILED};
use crate::utils::{Result, SimplexError, METRICS};

pub const INVALID_FINALIZE_MESSAGE: &str = "Received an invalid finalize message";

pub struct ProtocolService<T: Transaction, N: NetworkClient> {
    local_player_id: PlayerId,
    iteration: Mutex<Iteration>,
    shutdown: AtomicBool,
    stopped: CompletionLatch,
    signer: Arc<dyn SignatureService>,
    network: Arc<NetworkGate<N>>,
    players: Arc<PlayerRegistry>,
    blockchain: BlockchainStore<T>,
    proposals: ProposalEngine<T, NetworkGate<N>>,
    voting: VotingEngine<T>,
    iterations: IterationCoordinator<NetworkGate<N>>,
}

impl<T: Transaction, N: NetworkClient> ProtocolService<T, N> {
    /// Build a protocol instance with an empty player registry. Peers join
    /// through `PEER_CONNECTED` events.
    pub fn new(config: &ProtocolConfig, signer: Arc<dyn SignatureService>, network: Arc<N>) -> Self {
        let local_player_id = config.player_id();
        let network = Arc::new(NetworkGate::new(network));
        let players = Arc::new(PlayerRegistry::new());

        Self {
            proposals: ProposalEngine::new(local_player_id.clone(), signer.clone(), network.clone()),
            voting: VotingEngine::new(local_player_id.clone(), signer.clone(), players.clone()),
            iterations: IterationCoordinator::new(
                local_player_id.clone(),
                signer.clone(),
                network.clone(),
                players.clone(),
                config.timeout_factor,
            ),
            blockchain: BlockchainStore::new(signer.clone()),
            local_player_id,
            iteration: Mutex::new(0),
            shutdown: AtomicBool::new(false),
            stopped: CompletionLatch::new(),
            signer,
            network,
            players,
        }
    }

    /// Run rounds until `stop()` is called.
    pub async fn start(&self) -> Result<()> {
        info!(player_id = %self.local_player_id, "consensus protocol starting");
        while !self.is_shutdown() {
            let iteration = self.advance_iteration();
            METRICS.set_gauge(ITERATION, f64::from(iteration));

            if let Err(e) = self.iterations.initialize_for_iteration(iteration, CompletionLatch::new()) {
                if self.is_shutdown() {
                    break;
                }
                return Err(e);
            }
            if self.iterations.leader_id().as_deref() == Some(self.local_player_id()) {
                if let Err(e) = self.lead(iteration) {
                    error!(iteration, error = %e, "failed to propose block");
                }
            }
            if let Err(e) = self.iterations.start_iteration() {
                if self.is_shutdown() {
                    break;
                }
                return Err(e);
            }
            // notarized by a handler before this round was armed
            if self.blockchain.len() > iteration as usize {
                self.iterations.stop_iteration();
            }
            if let Err(e) = self.iterations.await_completion().await {
                warn!(iteration, error = %e, "iteration failed");
            }
            if self.iterations.state() == IterationState::TimedOut {
                if let Some(own) = self.iterations.take_timeout_vote() {
                    if let Err(e) = self.process_timeout_vote(&own) {
                        warn!(iteration, error = %e, "failed to count own timeout vote");
                    }
                }
                self.await_notarization(iteration).await;
            }
            // let inbound handlers in before the next round
            tokio::task::yield_now().await;
        }
        info!(player_id = %self.local_player_id, "consensus protocol stopped");
        Ok(())
    }

    /// Next iteration number. Normally one more than the last; never behind
    /// the local chain, so blocks notarized by the handlers while the loop was
    /// between rounds are not waited for again.
    fn advance_iteration(&self) -> Iteration {
        let chain_len = Iteration::try_from(self.blockchain.len()).unwrap_or(Iteration::MAX);
        let mut current = self.iteration.lock();
        *current = current.saturating_add(1).max(chain_len);
        *current
    }

    /// Park the loop until height `iteration` is in the chain or `stop()`.
    async fn await_notarization(&self, iteration: Iteration) {
        let height = iteration as usize;
        let mut length = self.blockchain.subscribe();
        let notarized = async move { length.wait_for(|len| *len > height).await.map(|_| ()) };
        tokio::select! {
            result = notarized => {
                if result.is_ok() {
                    debug!(iteration, "timed-out iteration notarized");
                }
            }
            _ = self.stopped.wait() => {}
        }
    }

    /// Idempotent. Releases a round loop that is waiting on the current iteration.
    pub fn stop(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            info!(player_id = %self.local_player_id, "consensus protocol stop requested");
        }
        self.iterations.shutdown();
        self.stopped.count_down();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn local_player_id(&self) -> &str {
        &self.local_player_id
    }

    pub fn iteration_number(&self) -> Iteration {
        *self.iteration.lock()
    }

    pub fn blockchain(&self) -> NotarizedBlockchain<T> {
        self.blockchain.blockchain()
    }

    pub fn players(&self) -> &Arc<PlayerRegistry> {
        &self.players
    }

    pub fn iterations(&self) -> &IterationCoordinator<NetworkGate<N>> {
        &self.iterations
    }

    /// Queue transactions for this node's next block proposal.
    pub fn process_transactions<I: IntoIterator<Item = T>>(&self, transactions: I) {
        self.proposals.add_transactions(transactions);
    }

    pub fn handle_inbound(&self, message: &InboundMessage) {
        match message {
            InboundMessage::Protocol(m) => self.handle_protocol_message(m),
            InboundMessage::Network(m) => self.handle_network_message(m),
        }
    }

    /// Log-and-continue wrapper around `process_protocol_message`.
    pub fn handle_protocol_message(&self, message: &ProtocolMessage) {
        if let Err(e) = self.process_protocol_message(message) {
            METRICS.inc_counter(MESSAGES_FAILED);
            warn!(message_type = ?message.message_type, error = %e, "failed to process protocol message");
        }
    }

    /// Log-and-continue wrapper around `process_network_message`.
    pub fn handle_network_message(&self, message: &NetworkEventMessage) {
        if let Err(e) = self.process_network_message(message) {
            METRICS.inc_counter(MESSAGES_FAILED);
            warn!(event = ?message.event, error = %e, "failed to process network message");
        }
    }

    pub fn process_network_message(&self, message: &NetworkEventMessage) -> Result<()> {
        match message.event {
            NetworkEvent::PeerConnected => {
                let peer = codec::peer_info_from_json(&message.details)?;
                let public_key = self.signer.public_key_from_bytes(peer.public_key_bytes())?;
                self.players.add_player(peer.peer_id(), public_key);
                info!(peer_id = %peer.peer_id(), public_key = %public_key.to_hex(), "added peer");
            }
            NetworkEvent::PeerDisconnected => {
                let peer = codec::peer_info_from_json(&message.details)?;
                match self.players.remove_player(peer.peer_id()) {
                    Some(key) => info!(peer_id = %peer.peer_id(), public_key = %key.to_hex(), "removed peer"),
                    None => warn!(peer_id = %peer.peer_id(), "tried to remove unknown peer"),
                }
            }
            NetworkEvent::NetworkDown => {
                self.network.set_down(true);
                warn!(details = %message.details, "network down; outbound messages suspended");
            }
            NetworkEvent::NetworkRestored => {
                self.network.set_down(false);
                info!(details = %message.details, "network restored");
            }
            NetworkEvent::Other => debug!(details = %message.details, "ignoring unrecognized network event"),
        }
        Ok(())
    }

    pub fn process_protocol_message(&self, message: &ProtocolMessage) -> Result<()> {
        match message.message_type {
            ProtocolMessageType::Vote => {
                let signed: VoteSigned = codec::from_bytes(&message.content)?;
                if signed.vote().is_for_dummy_block() {
                    self.process_timeout_vote(&signed)
                } else {
                    self.process_signed_vote(&signed)
                }
            }
            ProtocolMessageType::Proposal => {
                let signed: ProposalSigned<T> = codec::from_bytes(&message.content)?;
                self.process_notarized_blockchain(&signed.proposal().parent_chain)?;
                self.accept_proposal(&signed).map(|_| ())
            }
            ProtocolMessageType::Finalize => {
                let signed: FinalizeSigned = codec::from_bytes(&message.content)?;
                self.process_finalize(&signed)
            }
            ProtocolMessageType::Other => {
                debug!("ignoring unrecognized protocol message");
                Ok(())
            }
        }
    }

    /// Iteration-number synchronization against a peer's notarized chain.
    ///
    /// A longer chain means this node fell behind: take the missing blocks
    /// and abandon the current round. Every taken block must carry a quorum
    /// of valid signed votes; a chain that fails that check is an error and
    /// changes nothing. A chain of exactly the current length that ends in
    /// the finalize marker ends the run.
    pub fn process_notarized_blockchain(&self, chain: &NotarizedBlockchain<T>) -> Result<()> {
        let chain_len = chain.len();
        let local_iteration = *self.iteration.lock();

        if chain_len > local_iteration as usize {
            let adopted = self.blockchain.adopt(chain, |notarized| self.voting.is_notarized(notarized))?;
            if self.blockchain.len() < chain_len {
                debug!(local_iteration, chain_len, "peer chain not adopted; staying on the local chain");
                return Ok(());
            }
            info!(local_iteration, chain_len, adopted, "behind peer chain; abandoning current iteration");
            {
                let mut current = self.iteration.lock();
                // the loop's next increment lands on chain_len
                *current = (*current).max(Iteration::try_from(chain_len - 1).unwrap_or(Iteration::MAX));
            }
            self.iterations.stop_iteration();
            METRICS.set_gauge(ITERATION, f64::from(self.iteration_number()));
        } else if chain_len == local_iteration as usize && chain.tail().is_some_and(|t| t.block.is_finalize_marker()) {
            info!(iteration = local_iteration, "finalize marker reached");
            self.iterations.stop_iteration();
            self.broadcast_finalize(local_iteration)?;
        }
        Ok(())
    }

    /// Propose for this iteration and take part in voting on it like any
    /// other player.
    fn lead(&self, iteration: Iteration) -> Result<()> {
        let chain = self.blockchain.blockchain();
        let signed = self.proposals.propose_new_block(&chain, iteration)?;
        self.accept_proposal(&signed)?;
        Ok(())
    }

    /// Validate a proposal and, if it is good, vote for it.
    fn accept_proposal(&self, signed: &ProposalSigned<T>) -> Result<bool> {
        let proposal = signed.proposal();
        if !self.is_from_leader(signed)? {
            warn!(iteration = proposal.iteration, proposer = %proposal.player_id, "proposal not signed by the iteration leader");
            return Ok(false);
        }
        let chain = self.blockchain.blockchain();
        if !self.proposals.process_proposal(signed, &chain)? {
            warn!(iteration = proposal.iteration, proposer = %proposal.player_id, "received invalid proposal");
            return Ok(false);
        }

        self.voting.initialize_for_iteration(proposal.iteration, proposal)?;
        let vote = self.voting.create_proposal_vote(&self.local_player_id)?;
        self.process_signed_vote(&vote)?;
        self.network.broadcast_vote(ProtocolMessage::vote(codec::to_bytes(&vote)?));
        debug!(iteration = proposal.iteration, proposer = %proposal.player_id, "voted for proposal");
        Ok(true)
    }

    /// The proposer leads the proposal's iteration and signed it with its
    /// known key.
    fn is_from_leader(&self, signed: &ProposalSigned<T>) -> Result<bool> {
        let proposal = signed.proposal();
        if self.iterations.elect_leader(proposal.iteration) != proposal.player_id {
            return Ok(false);
        }
        let Some(public_key) = self.voting.public_key_of(&proposal.player_id) else {
            return Ok(false);
        };
        self.signer.verify_signature(&codec::to_bytes(proposal)?, signed.signature(), &public_key)
    }

    /// Count a vote for an iteration's dummy block. A quorum notarizes the
    /// dummy block if its height is the next one in the local chain.
    fn process_timeout_vote(&self, signed: &VoteSigned) -> Result<()> {
        let next_height = Iteration::try_from(self.blockchain.len()).unwrap_or(Iteration::MAX);
        if !self.voting.process_timeout_vote(signed, next_height)? {
            return Ok(());
        }
        let Some(iteration) = self.notarize_dummy_blocks()? else {
            debug!(iteration = signed.vote().iteration, next_height, "timeout quorum ahead of the chain");
            return Ok(());
        };
        if self.iterations.iteration_number() <= iteration {
            self.iterations.stop_iteration();
        }
        Ok(())
    }

    /// Append dummy blocks at the chain tip while their timeout quorum is
    /// in. Returns the last height appended.
    fn notarize_dummy_blocks(&self) -> Result<Option<Iteration>> {
        let mut last = None;
        loop {
            let height = Iteration::try_from(self.blockchain.len()).unwrap_or(Iteration::MAX);
            let Some(dummy) = self.voting.take_dummy_block(height) else {
                return Ok(last);
            };
            info!(iteration = height, "timeout quorum; notarizing the dummy block");
            self.record_notarized(dummy)?;
            last = Some(height);
        }
    }

    fn process_signed_vote(&self, signed: &VoteSigned) -> Result<()> {
        if !self.voting.process_vote(signed)? {
            return Ok(());
        }
        let mut quorum_iteration = self.voting.iteration();
        if let Some(notarized) = self.voting.take_notarized_block() {
            self.record_notarized(notarized)?;
            if let Some(height) = self.notarize_dummy_blocks()? {
                quorum_iteration = quorum_iteration.max(height);
            }
        }
        // a late quorum for an older round must not end a newer one
        if self.iterations.iteration_number() <= quorum_iteration {
            self.iterations.stop_iteration();
        }
        Ok(())
    }

    fn record_notarized(&self, notarized: NotarizedBlock<T>) -> Result<()> {
        let height = notarized.block.height;
        if self.blockchain.len() as u64 > height {
            debug!(height, "notarized block already in the chain");
            return Ok(());
        }
        let transactions = notarized.block.transactions.clone();
        self.blockchain.append(notarized)?;
        METRICS.inc_counter(BLOCKS_NOTARIZED);
        info!(height, transactions = ?transactions, "block notarized");
        Ok(())
    }

    fn process_finalize(&self, signed: &FinalizeSigned) -> Result<()> {
        let finalize = signed.finalize();
        let Some(public_key) = self.voting.public_key_of(&finalize.player_id) else {
            debug!(player_id = %finalize.player_id, "finalize from unknown player");
            return Err(SimplexError::InvalidArgument(INVALID_FINALIZE_MESSAGE.into()));
        };
        let bytes = codec::to_bytes(finalize)?;
        let valid = self.signer.verify_signature(&bytes, signed.signature(), &public_key).map_err(|e| {
            debug!(player_id = %finalize.player_id, error = %e, "finalize signature could not be verified");
            SimplexError::InvalidArgument(INVALID_FINALIZE_MESSAGE.into())
        })?;
        if !valid {
            warn!(player_id = %finalize.player_id, iteration = finalize.iteration, "finalize signature mismatch");
            return Ok(());
        }

        METRICS.inc_counter(FINALIZE_RECEIVED);
        info!(player_id = %finalize.player_id, iteration = finalize.iteration, "received finalize message");
        self.iterations.log_finalize_receipt(finalize.player_id.clone());
        if self.iterations.has_finalize_quorum() {
            info!(iteration = finalize.iteration, "finalize quorum reached");
        }
        Ok(())
    }

    fn broadcast_finalize(&self, iteration: Iteration) -> Result<()> {
        let finalize = Finalize::new(self.local_player_id.clone(), iteration);
        let signature = self.signer.generate_signature(&codec::to_bytes(&finalize)?)?;
        let signed = FinalizeSigned::new(finalize, &signature);
        self.iterations.log_finalize_receipt(self.local_player_id.clone());
        self.network.broadcast_finalize(ProtocolMessage::finalize(codec::to_bytes(&signed)?));
        Ok(())
    }
}
