//! Shared fixtures: recording and loopback networks, signed message builders.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::consensus::types::{Block, PeerInfo, Vote, VoteSigned, DUMMY_BLOCK_HASH};
use crate::crypto::{LocalSigner, SignatureService};
use crate::network::codec;
use crate::network::{
    InboundMessage, NetworkClient, NetworkEvent, NetworkEventMessage, ProtocolMessage, ProtocolMessageType,
};

/// Records every broadcast instead of sending it.
pub struct RecordingNetwork {
    sent: Mutex<Vec<ProtocolMessage>>,
    delta_seconds: u64,
}

impl RecordingNetwork {
    pub fn new(delta_seconds: u64) -> Arc<Self> {
        Arc::new(Self { sent: Mutex::new(Vec::new()), delta_seconds })
    }

    pub fn sent(&self) -> Vec<ProtocolMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_of(&self, kind: ProtocolMessageType) -> Vec<ProtocolMessage> {
        self.sent().into_iter().filter(|m| m.message_type == kind).collect()
    }

    pub fn sent_votes(&self) -> Vec<VoteSigned> {
        self.sent_of(ProtocolMessageType::Vote)
            .iter()
            .map(|m| codec::from_bytes(&m.content).unwrap())
            .collect()
    }

    fn record(&self, message: ProtocolMessage) {
        self.sent.lock().push(message);
    }
}

impl NetworkClient for RecordingNetwork {
    fn broadcast_proposal(&self, proposal: ProtocolMessage) {
        self.record(proposal);
    }
    fn broadcast_vote(&self, vote: ProtocolMessage) {
        self.record(vote);
    }
    fn broadcast_finalize(&self, finalize: ProtocolMessage) {
        self.record(finalize);
    }
    fn network_delta_seconds(&self) -> u64 {
        self.delta_seconds
    }
}

pub fn signer() -> Arc<dyn SignatureService> {
    Arc::new(LocalSigner::default())
}

/// A signed vote from `signer` for `block`.
pub fn signed_vote<T: crate::consensus::types::Transaction>(
    signer: &Arc<dyn SignatureService>,
    player_id: &str,
    iteration: u32,
    block: &Block<T>,
) -> VoteSigned {
    let vote = Vote::new(player_id, iteration, signer.compute_block_hash(block).unwrap());
    let sig = signer.generate_signature(&codec::to_bytes(&vote).unwrap()).unwrap();
    VoteSigned::new(vote, &sig)
}

/// A signed timeout vote: `player_id` votes for the dummy block of `iteration`.
pub fn timeout_vote(signer: &Arc<dyn SignatureService>, player_id: &str, iteration: u32) -> VoteSigned {
    let vote = Vote::new(player_id, iteration, DUMMY_BLOCK_HASH);
    let sig = signer.generate_signature(&codec::to_bytes(&vote).unwrap()).unwrap();
    VoteSigned::new(vote, &sig)
}

/// In-process network: every broadcast is delivered to all other players'
/// inbound channels.
#[derive(Default)]
pub struct LoopbackHub {
    peers: Mutex<Vec<(String, mpsc::UnboundedSender<InboundMessage>)>>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join the hub; returns the player's client and its inbound stream.
    pub fn join(
        self: &Arc<Self>,
        player_id: &str,
        delta_seconds: u64,
    ) -> (Arc<LoopbackClient>, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().push((player_id.to_string(), tx));
        let client = LoopbackClient { player_id: player_id.to_string(), hub: self.clone(), delta_seconds };
        (Arc::new(client), rx)
    }

    fn deliver(&self, from: &str, message: ProtocolMessage) {
        for (id, tx) in self.peers.lock().iter() {
            if id != from {
                // a stopped player has dropped its receiver
                let _ = tx.send(InboundMessage::Protocol(message.clone()));
            }
        }
    }
}

pub struct LoopbackClient {
    player_id: String,
    hub: Arc<LoopbackHub>,
    delta_seconds: u64,
}

impl NetworkClient for LoopbackClient {
    fn broadcast_proposal(&self, proposal: ProtocolMessage) {
        self.hub.deliver(&self.player_id, proposal);
    }
    fn broadcast_vote(&self, vote: ProtocolMessage) {
        self.hub.deliver(&self.player_id, vote);
    }
    fn broadcast_finalize(&self, finalize: ProtocolMessage) {
        self.hub.deliver(&self.player_id, finalize);
    }
    fn network_delta_seconds(&self) -> u64 {
        self.delta_seconds
    }
}

/// `PEER_CONNECTED` / `PEER_DISCONNECTED` event for a player's key.
pub fn peer_event(event: NetworkEvent, player_id: &str, signer: &Arc<dyn SignatureService>) -> NetworkEventMessage {
    let info = PeerInfo::new(player_id, &signer.public_key().to_bytes()).unwrap();
    NetworkEventMessage::new(event, serde_json::to_string(&info).unwrap())
}
