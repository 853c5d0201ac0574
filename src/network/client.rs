use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::network::message::ProtocolMessage;

/// Outbound side of the peer network. Implement this in the transport layer
/// and pass it into the protocol.
///
/// Broadcasts are fire-and-forget and must not block the caller.
pub trait NetworkClient: Send + Sync + 'static {
    fn broadcast_proposal(&self, proposal: ProtocolMessage);
    fn broadcast_vote(&self, vote: ProtocolMessage);
    fn broadcast_finalize(&self, finalize: ProtocolMessage);

    /// Expected message propagation delay under good network conditions.
    fn network_delta_seconds(&self) -> u64;
}

/// Wraps a client and drops broadcasts while the network is reported down.
pub struct NetworkGate<N: NetworkClient> {
    inner: Arc<N>,
    down: AtomicBool,
}

impl<N: NetworkClient> NetworkGate<N> {
    pub fn new(inner: Arc<N>) -> Self {
        Self { inner, down: AtomicBool::new(false) }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &Arc<N> {
        &self.inner
    }

    fn open(&self, kind: &str) -> bool {
        if self.is_down() {
            debug!("network down; dropping outbound {}", kind);
            return false;
        }
        true
    }
}

impl<N: NetworkClient> NetworkClient for NetworkGate<N> {
    fn broadcast_proposal(&self, proposal: ProtocolMessage) {
        if self.open("proposal") {
            self.inner.broadcast_proposal(proposal);
        }
    }

    fn broadcast_vote(&self, vote: ProtocolMessage) {
        if self.open("vote") {
            self.inner.broadcast_vote(vote);
        }
    }

    fn broadcast_finalize(&self, finalize: ProtocolMessage) {
        if self.open("finalize") {
            self.inner.broadcast_finalize(finalize);
        }
    }

    fn network_delta_seconds(&self) -> u64 {
        self.inner.network_delta_seconds()
    }
}
