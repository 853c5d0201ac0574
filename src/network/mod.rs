//! Network module - the consensus core's view of the peer network.
//! Exposes message envelopes, the outbound client trait, and the JSON codec.
//! Transport, framing and peer discovery live outside this crate.

pub mod codec;
pub mod client;
pub mod message;

pub use client::{NetworkClient, NetworkGate};
pub use message::{
    InboundMessage, NetworkEvent, NetworkEventMessage, ProtocolMessage, ProtocolMessageType,
};
