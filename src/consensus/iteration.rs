//! Iteration coordinator: leader election, the iteration timer and
//! finalize bookkeeping for one round at a time.
//!
//! Lifecycle of a round:
//! `Uninitialized -> Initialized -> Running -> (Completed | TimedOut)`.
//! `shutdown` moves to `Stopped` for good.
//!
//! The timer runs as its own tokio task. Every cancellation bumps a generation
//! number, and the timer only acts if its generation is still current, so a
//! timer that fires after `stop_iteration` never touches a newer round.
//!
//! On expiry the timer broadcasts a signed vote for the iteration's dummy
//! block and keeps it for the round loop, which counts it locally.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::consensus::latch::CompletionLatch;
use crate::consensus::players::PlayerRegistry;
use crate::consensus::types::{Iteration, PlayerId, Vote, VoteSigned, DUMMY_BLOCK_HASH};
use crate::consensus::voting::quorum_threshold;
use crate::crypto::SignatureService;
use crate::network::{codec, NetworkClient, ProtocolMessage};
use crate::utils::metrics::ITERATIONS_TIMED_OUT;
use crate::utils::{Result, SimplexError, METRICS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationState {
    Uninitialized,
    Initialized,
    Running,
    Completed,
    TimedOut,
    Stopped,
}

#[derive(Debug)]
struct RoundState {
    /// `None` until the first round is initialized
    iteration: Option<Iteration>,
    leader_id: Option<PlayerId>,
    state: IterationState,
    latch: Option<CompletionLatch>,
    finalize_receipts: HashSet<PlayerId>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    /// own timeout vote, until the round loop takes it
    timeout_vote: Option<VoteSigned>,
}

impl RoundState {
    fn cancel_timer(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn release(&self) {
        if let Some(latch) = &self.latch {
            latch.count_down();
        }
    }
}

pub struct IterationCoordinator<N: NetworkClient> {
    local_player_id: PlayerId,
    signer: Arc<dyn SignatureService>,
    network: Arc<N>,
    players: Arc<PlayerRegistry>,
    timeout_factor: u32,
    round: Arc<Mutex<RoundState>>,
}

impl<N: NetworkClient> IterationCoordinator<N> {
    pub fn new(
        local_player_id: impl Into<PlayerId>,
        signer: Arc<dyn SignatureService>,
        network: Arc<N>,
        players: Arc<PlayerRegistry>,
        timeout_factor: u32,
    ) -> Self {
        Self {
            local_player_id: local_player_id.into(),
            signer,
            network,
            players,
            timeout_factor,
            round: Arc::new(Mutex::new(RoundState {
                iteration: None,
                leader_id: None,
                state: IterationState::Uninitialized,
                latch: None,
                finalize_receipts: HashSet::new(),
                generation: 0,
                timer: None,
                timeout_vote: None,
            })),
        }
    }

    /// Enter a new round. Iteration numbers must strictly increase.
    pub fn initialize_for_iteration(&self, iteration: Iteration, latch: CompletionLatch) -> Result<()> {
        let leader_id = self.elect_leader(iteration);
        let mut round = self.round.lock();
        if round.state == IterationState::Stopped {
            return Err(SimplexError::IllegalState("iteration coordinator has been shut down".into()));
        }
        if let Some(previous) = round.iteration {
            if iteration <= previous {
                return Err(SimplexError::InvalidArgument(format!(
                    "iteration number {iteration} must be greater than previous iteration number {previous}"
                )));
            }
        }
        round.cancel_timer();
        // a superseded round must not leave its waiter hanging
        round.release();

        round.iteration = Some(iteration);
        round.leader_id = Some(leader_id.clone());
        round.state = IterationState::Initialized;
        round.latch = Some(latch);
        round.finalize_receipts.clear();
        round.timeout_vote = None;
        info!(iteration, leader = %leader_id, "initialized iteration");
        Ok(())
    }

    /// Round-robin over the sorted player ids, local player included.
    pub fn elect_leader(&self, iteration: Iteration) -> PlayerId {
        let ids = self.players.sorted_ids_including(&self.local_player_id);
        // never empty: the local player is always in
        let index = iteration as usize % ids.len();
        ids[index].clone()
    }

    /// Arm the iteration timer. Must run inside a tokio runtime.
    pub fn start_iteration(&self) -> Result<()> {
        let mut round = self.round.lock();
        match round.state {
            IterationState::Initialized => {}
            // quorum arrived before the timer was armed
            IterationState::Completed => {
                debug!(iteration = ?round.iteration, "iteration already completed; timer not armed");
                return Ok(());
            }
            IterationState::Stopped => {
                return Err(SimplexError::IllegalState("cannot start an iteration after shutdown".into()));
            }
            other => {
                return Err(SimplexError::IllegalState(format!(
                    "cannot start iteration {} in state {:?}",
                    round.iteration.unwrap_or(0),
                    other
                )));
            }
        }
        round.state = IterationState::Running;

        let generation = round.generation;
        let timeout = self.timeout();
        let shared = self.round.clone();
        let network = self.network.clone();
        let signer = self.signer.clone();
        let local_player_id = self.local_player_id.clone();
        round.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            Self::on_timeout(&shared, network.as_ref(), signer.as_ref(), &local_player_id, generation);
        }));
        debug!(iteration = ?round.iteration, timeout_secs = timeout.as_secs(), "iteration timer armed");
        Ok(())
    }

    /// End the round now: cancel the timer and release the latch.
    pub fn stop_iteration(&self) {
        let mut round = self.round.lock();
        round.cancel_timer();
        if matches!(round.state, IterationState::Initialized | IterationState::Running) {
            round.state = IterationState::Completed;
            debug!(iteration = ?round.iteration, "iteration stopped");
        }
        round.release();
    }

    /// Stop permanently. Later rounds can neither be initialized nor started.
    pub fn shutdown(&self) {
        let mut round = self.round.lock();
        round.cancel_timer();
        round.state = IterationState::Stopped;
        round.release();
    }

    /// Wait until the current round completes, times out or is stopped.
    pub async fn await_completion(&self) -> Result<()> {
        let latch = self
            .round
            .lock()
            .latch
            .clone()
            .ok_or_else(|| SimplexError::IllegalState("no iteration has been initialized".into()))?;
        latch.wait().await
    }

    pub fn log_finalize_receipt(&self, player_id: impl Into<PlayerId>) {
        self.round.lock().finalize_receipts.insert(player_id.into());
    }

    /// Finalize receipts reached quorum for this round.
    pub fn has_finalize_quorum(&self) -> bool {
        let players = self.players.count_including(&self.local_player_id);
        self.round.lock().finalize_receipts.len() >= quorum_threshold(players)
    }

    /// The vote this player broadcast when the current round timed out.
    pub fn take_timeout_vote(&self) -> Option<VoteSigned> {
        self.round.lock().timeout_vote.take()
    }

    pub fn finalize_receipts(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.round.lock().finalize_receipts.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// 0 before the first round.
    pub fn iteration_number(&self) -> Iteration {
        self.round.lock().iteration.unwrap_or(0)
    }

    pub fn leader_id(&self) -> Option<PlayerId> {
        self.round.lock().leader_id.clone()
    }

    pub fn state(&self) -> IterationState {
        self.round.lock().state
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.network.network_delta_seconds().saturating_mul(u64::from(self.timeout_factor)))
    }

    fn on_timeout(
        round: &Mutex<RoundState>,
        network: &N,
        signer: &dyn SignatureService,
        local_player_id: &str,
        generation: u64,
    ) {
        let (iteration, latch) = {
            let mut round = round.lock();
            if round.generation != generation || round.state != IterationState::Running {
                debug!(generation, "stale iteration timer ignored");
                return;
            }
            round.state = IterationState::TimedOut;
            round.timer = None;
            (round.iteration.unwrap_or(0), round.latch.clone())
        };

        METRICS.inc_counter(ITERATIONS_TIMED_OUT);
        warn!(iteration, "iteration timed out; voting for the dummy block");
        match Self::dummy_vote(signer, local_player_id, iteration) {
            Ok((signed, message)) => {
                network.broadcast_vote(message);
                let mut round = round.lock();
                if round.generation == generation {
                    round.timeout_vote = Some(signed);
                }
            }
            Err(e) => error!(iteration, error = %e, "could not sign timeout vote"),
        }
        if let Some(latch) = latch {
            latch.count_down();
        }
    }

    fn dummy_vote(
        signer: &dyn SignatureService,
        local_player_id: &str,
        iteration: Iteration,
    ) -> Result<(VoteSigned, ProtocolMessage)> {
        let vote = Vote::new(local_player_id, iteration, DUMMY_BLOCK_HASH);
        let signature = signer.generate_signature(&codec::to_bytes(&vote)?)?;
        let signed = VoteSigned::new(vote, &signature);
        let message = ProtocolMessage::vote(codec::to_bytes(&signed)?);
        Ok((signed, message))
    }
}

impl<N: NetworkClient> Drop for IterationCoordinator<N> {
    fn drop(&mut self) {
        self.round.lock().cancel_timer();
    }
}
