//! Conversation lifecycle: identifiers, roles and the state machine.

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, MeshResult};
use crate::peer::PeerId;

/// Node-local handle for one Conversation, assigned before its peer is known.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ConversationId(pub u64);

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conv-{}", self.0)
    }
}

/// Which side of the invitation we were on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// We issued the invitation.
    Inviter,
    /// We accepted someone else's invitation.
    Invitee,
}

/// `Negotiating → AwaitingHello → Established → Closed`.
///
/// Any state may close; nothing leaves `Closed`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Negotiating,
    AwaitingHello,
    Established,
    Closed,
}

impl ConversationState {
    pub fn can_transition_to(self, next: ConversationState) -> bool {
        use ConversationState::*;
        matches!(
            (self, next),
            (Negotiating, AwaitingHello)
                | (AwaitingHello, Established)
                | (Negotiating | AwaitingHello | Established, Closed)
        )
    }

    pub fn transition(self, next: ConversationState) -> MeshResult<ConversationState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(MeshError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// Snapshot of one Conversation as reported by [`crate::Node::conversations`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub id: ConversationId,
    pub role: Role,
    pub remote: Option<PeerId>,
    pub state: ConversationState,
}

/// Identifier of whoever issued the invitation behind a Conversation.
/// Both ends compute the same value for the same Conversation.
pub fn inviter_of<'a>(role: Role, local: &'a PeerId, remote: &'a PeerId) -> &'a PeerId {
    match role {
        Role::Inviter => local,
        Role::Invitee => remote,
    }
}
