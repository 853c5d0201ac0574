//! Voting engine: per-iteration vote validation and quorum counting.
//!
//! Two tallies are kept. Proposal votes count towards the block proposed in
//! the current iteration. Timeout votes count towards an iteration's dummy
//! block and are kept per iteration, since they can arrive before the local
//! timer fires.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::consensus::players::PlayerRegistry;
use crate::consensus::types::{
    Block, Height, Iteration, NotarizedBlock, PlayerId, Proposal, Transaction, Vote, VoteSigned, DUMMY_BLOCK_HASH,
};
use crate::crypto::{PublicKey, SignatureService};
use crate::network::codec;
use crate::utils::metrics::{VOTES_ACCEPTED, VOTES_REJECTED};
use crate::utils::{Result, SimplexError, METRICS};

/// Timeout votes more than this many iterations ahead of the chain are dropped.
const TIMEOUT_LOOKAHEAD: Iteration = 16;

/// Smallest vote count strictly greater than two thirds of `players`.
///
/// Tolerates up to `(players - 1) / 3` Byzantine players.
pub fn quorum_threshold(players: usize) -> usize {
    2 * players / 3 + 1
}

#[derive(Debug, Default)]
struct Tally {
    voters: HashSet<PlayerId>,
    votes: Vec<VoteSigned>,
    notarized: bool,
}

impl Tally {
    fn add(&mut self, signed: &VoteSigned) {
        if self.voters.insert(signed.vote().player_id.clone()) {
            self.votes.push(signed.clone());
        }
    }

    /// Quorum votes sorted by player id, handed out once.
    fn take(&mut self, quorum: usize) -> Option<Vec<VoteSigned>> {
        if self.notarized || self.voters.len() < quorum {
            return None;
        }
        self.notarized = true;
        let mut votes = self.votes.clone();
        votes.sort_by(|a, b| a.vote().player_id.cmp(&b.vote().player_id));
        Some(votes)
    }
}

#[derive(Debug)]
struct VotingRound<T> {
    iteration: Iteration,
    proposal_id: Option<String>,
    block: Option<Block<T>>,
    tally: Tally,
}

impl<T> Default for VotingRound<T> {
    fn default() -> Self {
        Self { iteration: 0, proposal_id: None, block: None, tally: Tally::default() }
    }
}

pub struct VotingEngine<T> {
    local_player_id: PlayerId,
    signer: Arc<dyn SignatureService>,
    players: Arc<PlayerRegistry>,
    round: Mutex<VotingRound<T>>,
    timeouts: Mutex<BTreeMap<Iteration, Tally>>,
}

impl<T: Transaction> VotingEngine<T> {
    pub fn new(local_player_id: impl Into<PlayerId>, signer: Arc<dyn SignatureService>, players: Arc<PlayerRegistry>) -> Self {
        Self {
            local_player_id: local_player_id.into(),
            signer,
            players,
            round: Mutex::new(VotingRound::default()),
            timeouts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Reset the tally for a new iteration's proposal.
    pub fn initialize_for_iteration(&self, iteration: Iteration, proposal: &Proposal<T>) -> Result<()> {
        let proposal_id = self.signer.compute_block_hash(&proposal.new_block)?;
        let mut round = self.round.lock();
        *round = VotingRound {
            iteration,
            proposal_id: Some(proposal_id),
            block: Some(proposal.new_block.clone()),
            ..VotingRound::default()
        };
        Ok(())
    }

    pub fn iteration(&self) -> Iteration {
        self.round.lock().iteration
    }

    pub fn proposal_id(&self) -> Option<String> {
        self.round.lock().proposal_id.clone()
    }

    /// Accepted proposal votes, in arrival order.
    pub fn votes(&self) -> Vec<VoteSigned> {
        self.round.lock().tally.votes.clone()
    }

    /// Everyone in the registry plus the local player.
    pub fn player_count(&self) -> usize {
        self.players.count_including(&self.local_player_id)
    }

    /// The local player is always known, under the signer's key.
    pub fn public_key_of(&self, player_id: &str) -> Option<PublicKey> {
        if player_id == self.local_player_id {
            return Some(self.signer.public_key());
        }
        if !Self::is_vote_from_known_player(player_id, &self.players) {
            return None;
        }
        self.players.get_public_key(player_id)
    }

    pub fn is_vote_iteration_current(vote: &Vote, iteration: Iteration) -> bool {
        vote.iteration == iteration
    }

    pub fn is_vote_id_proposal_id(vote: &Vote, proposal_id: &str) -> bool {
        vote.block_hash == proposal_id
    }

    pub fn is_vote_from_known_player(player_id: &str, players: &PlayerRegistry) -> bool {
        players.contains(player_id)
    }

    /// The signature covers the serialized vote. Verification failures caused
    /// by malformed keys or signatures are returned as errors, not `false`.
    pub fn is_vote_signature_valid(public_key: &PublicKey, signed: &VoteSigned, signer: &dyn SignatureService) -> Result<bool> {
        let bytes = codec::to_bytes(signed.vote())?;
        signer.verify_signature(&bytes, signed.signature(), public_key)
    }

    /// `public_key` is the voter's registered key, `None` for an unknown voter.
    pub fn validate_vote(
        iteration: Iteration,
        proposal_id: &str,
        signed: &VoteSigned,
        public_key: Option<&PublicKey>,
        signer: &dyn SignatureService,
    ) -> Result<bool> {
        let vote = signed.vote();
        if !Self::is_vote_iteration_current(vote, iteration) {
            debug!(voter = %vote.player_id, vote_iteration = vote.iteration, iteration, "vote for another iteration");
            return Ok(false);
        }
        if !Self::is_vote_id_proposal_id(vote, proposal_id) {
            debug!(voter = %vote.player_id, "vote for an unknown proposal");
            return Ok(false);
        }
        let Some(public_key) = public_key else {
            debug!(voter = %vote.player_id, "vote from unknown player");
            return Ok(false);
        };
        Self::is_vote_signature_valid(public_key, signed, signer)
    }

    /// Count a vote. Returns true once distinct valid voters reach quorum.
    pub fn process_vote(&self, signed: &VoteSigned) -> Result<bool> {
        let quorum = quorum_threshold(self.player_count());
        let public_key = self.public_key_of(&signed.vote().player_id);
        let mut round = self.round.lock();
        let Some(proposal_id) = round.proposal_id.clone() else {
            debug!("vote received before any proposal this iteration");
            return Ok(false);
        };
        if !Self::validate_vote(round.iteration, &proposal_id, signed, public_key.as_ref(), self.signer.as_ref())? {
            METRICS.inc_counter(VOTES_REJECTED);
            return Ok(false);
        }
        METRICS.inc_counter(VOTES_ACCEPTED);
        round.tally.add(signed);
        let voters = round.tally.voters.len();
        debug!(voters, quorum, iteration = round.iteration, "vote counted");
        Ok(voters >= quorum)
    }

    /// Count a timeout vote towards the dummy block of its iteration.
    ///
    /// `next_height` is the local chain length: iterations below it are
    /// already decided and their votes are dropped. Returns true once that
    /// iteration's timeout voters reach quorum.
    pub fn process_timeout_vote(&self, signed: &VoteSigned, next_height: Iteration) -> Result<bool> {
        let vote = signed.vote();
        if vote.iteration < next_height || vote.iteration > next_height.saturating_add(TIMEOUT_LOOKAHEAD) {
            debug!(voter = %vote.player_id, vote_iteration = vote.iteration, next_height, "timeout vote out of range");
            return Ok(false);
        }
        let quorum = quorum_threshold(self.player_count());
        let public_key = self.public_key_of(&vote.player_id);
        if !Self::validate_vote(vote.iteration, DUMMY_BLOCK_HASH, signed, public_key.as_ref(), self.signer.as_ref())? {
            METRICS.inc_counter(VOTES_REJECTED);
            return Ok(false);
        }
        METRICS.inc_counter(VOTES_ACCEPTED);

        let mut timeouts = self.timeouts.lock();
        timeouts.retain(|iteration, _| *iteration >= next_height);
        let tally = timeouts.entry(vote.iteration).or_default();
        tally.add(signed);
        debug!(voters = tally.voters.len(), quorum, iteration = vote.iteration, "timeout vote counted");
        Ok(tally.voters.len() >= quorum)
    }

    /// Sign a vote for this iteration's proposal.
    pub fn create_proposal_vote(&self, player_id: &str) -> Result<VoteSigned> {
        let (iteration, proposal_id) = {
            let round = self.round.lock();
            let proposal_id = round.proposal_id.clone().ok_or_else(|| {
                SimplexError::IllegalState("voting engine has no proposal for this iteration".into())
            })?;
            (round.iteration, proposal_id)
        };
        let vote = Vote::new(player_id, iteration, proposal_id);
        let signature = self.signer.generate_signature(&codec::to_bytes(&vote)?)?;
        Ok(VoteSigned::new(vote, &signature))
    }

    /// The proposed block with its quorum votes, handed out once per iteration.
    pub fn take_notarized_block(&self) -> Option<NotarizedBlock<T>> {
        let quorum = quorum_threshold(self.player_count());
        let mut round = self.round.lock();
        let block = round.block.clone()?;
        let votes = round.tally.take(quorum)?;
        Some(NotarizedBlock::new(block, votes))
    }

    /// The dummy block of `iteration` with its timeout votes, handed out once
    /// a quorum of players timed out.
    pub fn take_dummy_block(&self, iteration: Iteration) -> Option<NotarizedBlock<T>> {
        let quorum = quorum_threshold(self.player_count());
        let votes = self.timeouts.lock().get_mut(&iteration)?.take(quorum)?;
        Some(NotarizedBlock::new(Block::dummy(Height::from(iteration)), votes))
    }

    /// Check a notarized block received from a peer: a quorum of known
    /// players signed votes for this block at its height.
    pub fn is_notarized(&self, notarized: &NotarizedBlock<T>) -> Result<bool> {
        let block = &notarized.block;
        let Ok(iteration) = Iteration::try_from(block.height) else {
            return Ok(false);
        };
        let block_hash = if block.is_dummy() {
            DUMMY_BLOCK_HASH.to_string()
        } else {
            self.signer.compute_block_hash(block)?
        };
        let mut voters = HashSet::new();
        for signed in &notarized.votes {
            let public_key = self.public_key_of(&signed.vote().player_id);
            if Self::validate_vote(iteration, &block_hash, signed, public_key.as_ref(), self.signer.as_ref())? {
                voters.insert(signed.vote().player_id.as_str());
            }
        }
        let quorum = quorum_threshold(self.player_count());
        if voters.len() < quorum {
            debug!(height = block.height, voters = voters.len(), quorum, "block lacks a quorum of valid votes");
            return Ok(false);
        }
        Ok(true)
    }
}
