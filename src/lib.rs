//! Simplex-style Byzantine fault tolerant consensus core.
//!
//! Players take turns leading iterations. The leader proposes a block that
//! extends the notarized chain, every player votes for a valid proposal, and a
//! block with votes from more than two thirds of the players is notarized and
//! appended. A silent leader is bounded by the iteration timer.
//!
//! Transport, signature primitives and persistence are collaborators:
//! implement `network::NetworkClient`, feed inbound traffic to
//! `node::runner::spawn`, and pick a `crypto::SignatureService`.

pub mod utils;
pub mod crypto;
pub mod network;
pub mod consensus;
pub mod node;

#[cfg(test)]
mod tests;

pub use consensus::types::{Block, NotarizedBlock, NotarizedBlockchain, Proposal, Vote};
pub use consensus::ProtocolService;
pub use node::{ProtocolConfig, ServiceHandle};
pub use utils::{Result, SimplexError};
