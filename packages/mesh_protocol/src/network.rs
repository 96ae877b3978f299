//! A node's view of the mesh: its own identifier and the peers it knows.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::peer::PeerId;

/// `{ id, peers }` as advertised in every `hello`.
///
/// Invariant: `id` is never a member of `peers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    id: PeerId,
    #[serde(default)]
    peers: BTreeSet<PeerId>,
}

impl Network {
    /// A network that knows nobody yet.
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            peers: BTreeSet::new(),
        }
    }

    /// Build a network from an advertised peer list. Our own id is dropped
    /// from `peers` to keep the invariant.
    pub fn with_peers(id: PeerId, peers: impl IntoIterator<Item = PeerId>) -> Self {
        let peers = peers.into_iter().filter(|p| *p != id).collect();
        Self { id, peers }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn peers(&self) -> &BTreeSet<PeerId> {
        &self.peers
    }

    pub fn knows(&self, peer: &PeerId) -> bool {
        self.peers.contains(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Record a peer learned through a completed handshake.
    /// Returns `false` if it was already known or is ourselves.
    pub fn add_peer(&mut self, peer: PeerId) -> bool {
        if peer == self.id {
            return false;
        }
        self.peers.insert(peer)
    }

    /// Forget a peer after its Conversation went away.
    pub fn remove_peer(&mut self, peer: &PeerId) -> bool {
        self.peers.remove(peer)
    }

    /// Peers `remote` advertises that we have not heard of:
    /// `remote.peers \ self.peers \ {self.id, remote.id}`.
    pub fn unknown_in(&self, remote: &Network) -> Vec<PeerId> {
        remote
            .peers
            .iter()
            .filter(|p| **p != self.id && **p != remote.id && !self.peers.contains(*p))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PeerId {
        PeerId::from(s)
    }

    #[test]
    fn never_contains_itself() {
        let mut net = Network::new(id("a"));
        assert!(!net.add_peer(id("a")));
        assert!(net.is_empty());

        let net = Network::with_peers(id("a"), [id("a"), id("b")]);
        assert_eq!(net.len(), 1);
        assert!(net.knows(&id("b")));
    }

    #[test]
    fn add_is_idempotent() {
        let mut net = Network::new(id("a"));
        assert!(net.add_peer(id("b")));
        assert!(!net.add_peer(id("b")));
        assert_eq!(net.len(), 1);
    }

    #[test]
    fn remove_only_touches_named_peer() {
        let mut net = Network::with_peers(id("a"), [id("b"), id("c")]);
        assert!(net.remove_peer(&id("b")));
        assert!(!net.remove_peer(&id("b")));
        assert!(net.knows(&id("c")));
    }

    #[test]
    fn unknown_excludes_self_remote_and_known() {
        let local = Network::with_peers(id("c"), [id("b")]);
        let remote = Network::with_peers(id("b"), [id("a"), id("c"), id("d")]);
        assert_eq!(local.unknown_in(&remote), vec![id("a"), id("d")]);
    }

    #[test]
    fn wire_shape() {
        let net = Network::with_peers(id("b"), [id("a")]);
        let json = serde_json::to_value(&net).unwrap();
        assert_eq!(json, serde_json::json!({"id": "b", "peers": ["a"]}));

        let parsed: Network = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert!(parsed.is_empty());
    }
}
