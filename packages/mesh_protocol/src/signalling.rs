//! Rendezvous contract: minting and redeeming one-time invitations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{MeshError, MeshResult};

/// One-time token handed out by a rendezvous service.
///
/// Opaque to the engine; the WebSocket beacon renders it as a join URL.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Invitation(String);

impl Invitation {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Invitation {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Invitation {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Invitation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structured message pipe used only while negotiating a transport.
#[derive(Debug)]
pub struct SignalChannel {
    tx: mpsc::UnboundedSender<serde_json::Value>,
    rx: mpsc::UnboundedReceiver<serde_json::Value>,
}

impl SignalChannel {
    pub fn new(
        tx: mpsc::UnboundedSender<serde_json::Value>,
        rx: mpsc::UnboundedReceiver<serde_json::Value>,
    ) -> Self {
        Self { tx, rx }
    }

    /// Two connected ends; whatever one sends the other receives.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    pub fn send(&self, message: serde_json::Value) -> MeshResult<()> {
        self.tx
            .send(message)
            .map_err(|_| MeshError::NegotiationFailure("signal channel closed".into()))
    }

    /// Whether the other end hung up.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Next message from the other end; `None` once it hung up.
    pub async fn recv(&mut self) -> Option<serde_json::Value> {
        self.rx.recv().await
    }

    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<serde_json::Value>,
        mpsc::UnboundedReceiver<serde_json::Value>,
    ) {
        (self.tx, self.rx)
    }
}

/// Out-of-band service that introduces two nodes that share no channel yet.
#[async_trait]
pub trait Rendezvous: Send + Sync + 'static {
    /// Mint a fresh invitation. The returned signal channel starts relaying
    /// once somebody accepts it.
    async fn issue_invitation(&self) -> MeshResult<(SignalChannel, Invitation)>;

    /// Redeem an invitation issued by another node.
    async fn accept_invitation(&self, invitation: &Invitation) -> MeshResult<SignalChannel>;
}
