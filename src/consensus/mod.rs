//! Consensus core: data model, engines, and the protocol state machine.
//!
//! Dependency order, leaves first: `players`, `blockchain`, `voting`,
//! `proposal`, `iteration`, `protocol`.

pub mod types;
pub mod players;
pub mod blockchain;
pub mod proposal;
pub mod voting;
pub mod latch;
pub mod iteration;
pub mod protocol;

pub use blockchain::BlockchainStore;
pub use iteration::{IterationCoordinator, IterationState};
pub use latch::CompletionLatch;
pub use players::PlayerRegistry;
pub use proposal::ProposalEngine;
pub use protocol::ProtocolService;
pub use voting::{quorum_threshold, VotingEngine};
