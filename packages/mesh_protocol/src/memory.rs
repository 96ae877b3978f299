//! In-process rendezvous and transport, for tests and simulation.
//!
//! Both are cheap to clone; clones share state, so every node of one
//! simulated mesh must be built from clones of the same pair.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;

use crate::conversation::Role;
use crate::error::{MeshError, MeshResult};
use crate::signalling::{Invitation, Rendezvous, SignalChannel};
use crate::transport::{ControlChannel, Transport, await_signal};

#[derive(Default)]
struct RendezvousState {
    /// Invitation → guest half of the signal pair, until redeemed.
    pending: HashMap<Invitation, SignalChannel>,
    issued: usize,
}

/// Rendezvous that pairs signal channels in a shared table.
#[derive(Clone, Default)]
pub struct MemoryRendezvous {
    state: Arc<Mutex<RendezvousState>>,
}

impl MemoryRendezvous {
    /// Number of invitations issued so far.
    pub async fn issued(&self) -> usize {
        self.state.lock().await.issued
    }

    /// Number of invitations nobody has redeemed yet.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}

#[async_trait]
impl Rendezvous for MemoryRendezvous {
    async fn issue_invitation(&self) -> MeshResult<(SignalChannel, Invitation)> {
        let (host, guest) = SignalChannel::pair();
        let invitation = Invitation::from(format!("mem-{}", uuid::Uuid::new_v4()));

        let mut state = self.state.lock().await;
        // hosts that gave up waiting void their invitations
        state.pending.retain(|_, guest| !guest.is_closed());
        state.pending.insert(invitation.clone(), guest);
        state.issued += 1;
        debug!(%invitation, "memory invitation issued");
        Ok((host, invitation))
    }

    async fn accept_invitation(&self, invitation: &Invitation) -> MeshResult<SignalChannel> {
        let guest = self
            .state
            .lock()
            .await
            .pending
            .remove(invitation)
            .filter(|guest| !guest.is_closed())
            .ok_or_else(|| {
                MeshError::RendezvousFailure(format!("invitation {invitation} not found"))
            })?;
        // the host side learns that somebody showed up
        guest.send(json!({ "type": "ready" }))?;
        Ok(guest)
    }
}

/// Transport whose "connection" is a channel pair parked in a shared
/// registry; the offer names the parked half.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    parked: Arc<Mutex<HashMap<String, ControlChannel>>>,
    refuse: bool,
}

impl MemoryTransport {
    /// A transport that fails every negotiation it takes part in.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    async fn offer(&self, mut signal: SignalChannel) -> MeshResult<ControlChannel> {
        let (ours, theirs) = ControlChannel::pair();
        let key = uuid::Uuid::new_v4().to_string();
        self.parked.lock().await.insert(key.clone(), theirs);

        let answered = match signal.send(json!({ "type": "offer", "channel": key })) {
            Ok(()) => await_signal(&mut signal, "answer").await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = answered {
            self.parked.lock().await.remove(&key);
            return Err(e);
        }
        Ok(ours)
    }

    async fn answer(&self, mut signal: SignalChannel) -> MeshResult<ControlChannel> {
        let offer = await_signal(&mut signal, "offer").await?;
        let key = offer
            .get("channel")
            .and_then(|c| c.as_str())
            .ok_or_else(|| MeshError::NegotiationFailure("offer without channel".into()))?;
        let channel = self
            .parked
            .lock()
            .await
            .remove(key)
            .ok_or_else(|| MeshError::NegotiationFailure(format!("no parked channel {key}")))?;
        signal.send(json!({ "type": "answer" }))?;
        Ok(channel)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn negotiate(&self, signal: SignalChannel, role: Role) -> MeshResult<ControlChannel> {
        if self.refuse {
            let _ = signal.send(json!({ "type": "error", "data": "refused" }));
            return Err(MeshError::NegotiationFailure("transport refused".into()));
        }
        match role {
            Role::Invitee => self.offer(signal).await,
            Role::Inviter => self.answer(signal).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invitation_is_single_use() {
        let rendezvous = MemoryRendezvous::default();
        let (mut host, invitation) = rendezvous.issue_invitation().await.unwrap();
        assert!(invitation.as_str().starts_with("mem-"));

        let _guest = rendezvous.accept_invitation(&invitation).await.unwrap();
        assert_eq!(host.recv().await.unwrap()["type"], "ready");

        let err = rendezvous.accept_invitation(&invitation).await.unwrap_err();
        assert_eq!(err.error_code(), "rendezvous_failure");
        assert_eq!(rendezvous.issued().await, 1);
        assert_eq!(rendezvous.pending().await, 0);
    }

    #[tokio::test]
    async fn abandoned_invitations_are_voided() {
        let rendezvous = MemoryRendezvous::default();
        let (host, abandoned) = rendezvous.issue_invitation().await.unwrap();
        drop(host);

        let err = rendezvous.accept_invitation(&abandoned).await.unwrap_err();
        assert_eq!(err.error_code(), "rendezvous_failure");

        let (gone, _) = rendezvous.issue_invitation().await.unwrap();
        drop(gone);
        let (_live, _) = rendezvous.issue_invitation().await.unwrap();
        assert_eq!(rendezvous.pending().await, 1);
        assert_eq!(rendezvous.issued().await, 3);
    }

    #[tokio::test]
    async fn negotiation_connects_both_roles() {
        let rendezvous = MemoryRendezvous::default();
        let transport = MemoryTransport::default();
        let (host, invitation) = rendezvous.issue_invitation().await.unwrap();
        let guest = rendezvous.accept_invitation(&invitation).await.unwrap();

        let inviter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.negotiate(host, Role::Inviter).await })
        };
        let mut invitee = transport.negotiate(guest, Role::Invitee).await.unwrap();
        let inviter = inviter.await.unwrap().unwrap();

        inviter.send("ping".into()).unwrap();
        assert_eq!(invitee.recv().await.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn refusal_fails_both_sides() {
        let (host, guest) = SignalChannel::pair();
        let answering = tokio::spawn(async move {
            MemoryTransport::default()
                .negotiate(host, Role::Inviter)
                .await
        });
        assert!(
            MemoryTransport::refusing()
                .negotiate(guest, Role::Invitee)
                .await
                .is_err()
        );
        assert!(answering.await.unwrap().is_err());
    }
}
