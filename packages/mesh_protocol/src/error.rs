//! Error kinds of the mesh protocol and their stable codes.
//!
//! Every error is scoped to the Conversation or operation that produced it;
//! none of them stops a node.

use crate::conversation::ConversationState;
use crate::peer::PeerId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeshError {
    /// Unexpected or undecodable message. Closes the offending Conversation.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Routed message whose target is neither us nor a direct neighbour.
    #[error("undeliverable message to {to}")]
    Undeliverable { to: PeerId },

    #[error("negotiation failed: {0}")]
    NegotiationFailure(String),

    #[error("rendezvous failed: {0}")]
    RendezvousFailure(String),

    #[error("peer did not greet within {secs}s")]
    HandshakeTimeout { secs: u64 },

    #[error("illegal conversation transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConversationState,
        to: ConversationState,
    },

    /// The node actor is gone (its task ended).
    #[error("node stopped")]
    NodeStopped,
}

impl MeshError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Undeliverable { .. } => "undeliverable",
            Self::NegotiationFailure(_) => "negotiation_failure",
            Self::RendezvousFailure(_) => "rendezvous_failure",
            Self::HandshakeTimeout { .. } => "handshake_timeout",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NodeStopped => "node_stopped",
        }
    }
}

pub type MeshResult<T> = Result<T, MeshError>;
