use serde::{Deserialize, Serialize};

/// Kind of consensus payload carried in a `ProtocolMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolMessageType {
    Proposal,
    Vote,
    Finalize,
    #[serde(other)]
    Other,
}

/// Wire-level consensus message: a type tag plus the serialized signed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub message_type: ProtocolMessageType,
    #[serde(serialize_with = "crate::utils::serde_helpers::as_hex", deserialize_with = "crate::utils::serde_helpers::from_hex")]
    pub content: Vec<u8>,
}

impl ProtocolMessage {
    pub fn new(message_type: ProtocolMessageType, content: Vec<u8>) -> Self {
        Self { message_type, content }
    }

    pub fn proposal(content: Vec<u8>) -> Self {
        Self::new(ProtocolMessageType::Proposal, content)
    }

    pub fn vote(content: Vec<u8>) -> Self {
        Self::new(ProtocolMessageType::Vote, content)
    }

    pub fn finalize(content: Vec<u8>) -> Self {
        Self::new(ProtocolMessageType::Finalize, content)
    }
}

/// Connectivity events reported by the network layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkEvent {
    PeerConnected,
    PeerDisconnected,
    NetworkDown,
    NetworkRestored,
    #[serde(other)]
    Other,
}

/// `details` holds a JSON `PeerInfo` for peer events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEventMessage {
    pub event: NetworkEvent,
    pub details: String,
}

impl NetworkEventMessage {
    pub fn new(event: NetworkEvent, details: impl Into<String>) -> Self {
        Self { event, details: details.into() }
    }
}

/// Anything the inbound dispatcher can hand to the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Protocol(ProtocolMessage),
    Network(NetworkEventMessage),
}
