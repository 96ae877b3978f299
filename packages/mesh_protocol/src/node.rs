//! The node actor and its handle.
//!
//! One [`NodeActor`] task per node owns the [`Network`] and every
//! Conversation record; all mutation happens inside it, one command at a
//! time. Conversation drivers (see `driver.rs`) and the public [`Node`]
//! handle talk to it over an `mpsc` queue and get answers back on `oneshot`
//! channels. Anything slow (rendezvous or transport calls) stays outside the
//! actor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::conversation::{
    ConversationId, ConversationInfo, ConversationState, Role, inviter_of,
};
use crate::driver;
use crate::error::{MeshError, MeshResult};
use crate::message::{ControlBody, ControlMessage, Frame};
use crate::network::Network;
use crate::observer::{NoopObserver, Observer};
use crate::peer::PeerId;
use crate::signalling::{Invitation, Rendezvous, SignalChannel};
use crate::transport::{ControlChannel, Transport};

/// Automatic retries of one introduction before waiting for fresh gossip.
const MAX_INTRODUCTION_ATTEMPTS: u32 = 3;

/// What a driver must do after the actor handled one inbound message.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Nothing further; read the next message.
    Continue,
    /// Invite each of these peers through the current Conversation.
    Introduce(Vec<PeerId>),
    /// A `join` addressed to us: redeem the invitation.
    Accept(Invitation),
    /// The Conversation is closed; drop the channel.
    Close,
}

pub(crate) enum NodeCommand {
    Open {
        role: Role,
        introducing: Option<PeerId>,
        /// Conversation the introduction's `join` will travel on.
        via: Option<ConversationId>,
        /// `None` when `via` is no longer usable.
        respond_to: oneshot::Sender<Option<ConversationId>>,
    },
    ChannelOpen {
        conversation: ConversationId,
        outbound: mpsc::UnboundedSender<String>,
        shutdown: oneshot::Sender<()>,
        respond_to: oneshot::Sender<bool>,
    },
    Inbound {
        conversation: ConversationId,
        frame: Frame,
        respond_to: oneshot::Sender<Verdict>,
    },
    Close {
        conversation: ConversationId,
        error: Option<MeshError>,
    },
    Release {
        peer: PeerId,
    },
    Hangup {
        peer: PeerId,
        respond_to: oneshot::Sender<bool>,
    },
    GetNetwork {
        respond_to: oneshot::Sender<Network>,
    },
    GetConversations {
        respond_to: oneshot::Sender<Vec<ConversationInfo>>,
    },
}

struct Shared {
    id: PeerId,
    config: NodeConfig,
    rendezvous: Arc<dyn Rendezvous>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn Observer>,
}

/// Handle to a running mesh node. Cheap to clone.
#[derive(Clone)]
pub struct Node {
    shared: Arc<Shared>,
    commands: mpsc::Sender<NodeCommand>,
}

/// Configures and spawns a [`Node`].
pub struct NodeBuilder {
    id: Option<PeerId>,
    config: NodeConfig,
    rendezvous: Arc<dyn Rendezvous>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn Observer>,
}

impl NodeBuilder {
    /// Use a fixed identifier instead of a freshly generated one.
    pub fn id(mut self, id: PeerId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Start the node actor. Must be called inside a tokio runtime.
    pub fn spawn(self) -> Node {
        let id = self.id.unwrap_or_else(PeerId::generate);
        let (commands, receiver) = mpsc::channel(self.config.command_buffer.max(1));
        let shared = Arc::new(Shared {
            id: id.clone(),
            config: self.config,
            rendezvous: self.rendezvous,
            transport: self.transport,
            observer: self.observer,
        });

        let actor = NodeActor::new(shared.clone(), commands.downgrade(), receiver);
        tokio::spawn(actor.run());

        info!(peer = %id, "mesh node started");

        Node { shared, commands }
    }
}

impl Node {
    pub fn builder(rendezvous: Arc<dyn Rendezvous>, transport: Arc<dyn Transport>) -> NodeBuilder {
        NodeBuilder {
            id: None,
            config: NodeConfig::default(),
            rendezvous,
            transport,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.shared.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.shared.config
    }

    /// Issue an invitation for someone outside the mesh.
    ///
    /// Returns as soon as the token exists; the channel is negotiated and
    /// attached in the background once the invitation is accepted.
    pub async fn invite(&self) -> MeshResult<Invitation> {
        let (signal, invitation) = self.shared.rendezvous.issue_invitation().await?;
        let conversation = self.open(Role::Inviter).await?;
        self.spawn_negotiation(conversation, signal, None);
        info!(peer = %self.id(), %conversation, "invitation issued");
        Ok(invitation)
    }

    /// Accept an invitation and attach the resulting channel.
    ///
    /// Returns once the channel is live; the handshake continues in the
    /// background.
    pub async fn join(&self, invitation: &Invitation) -> MeshResult<ConversationId> {
        let conversation = self.open(Role::Invitee).await?;

        let signal = match self.shared.rendezvous.accept_invitation(invitation).await {
            Ok(signal) => signal,
            Err(e) => {
                self.close(conversation, None).await;
                return Err(e);
            }
        };

        match self.shared.transport.negotiate(signal, Role::Invitee).await {
            Ok(channel) => {
                driver::spawn(self.clone(), conversation, channel);
                Ok(conversation)
            }
            Err(e) => {
                self.close(conversation, None).await;
                Err(e)
            }
        }
    }

    /// Hand an already established channel to the engine.
    pub async fn attach(&self, channel: ControlChannel, role: Role) -> MeshResult<ConversationId> {
        let conversation = self.open(role).await?;
        driver::spawn(self.clone(), conversation, channel);
        Ok(conversation)
    }

    /// Snapshot of our network state.
    pub async fn network(&self) -> MeshResult<Network> {
        self.request(|respond_to| NodeCommand::GetNetwork { respond_to })
            .await
    }

    /// Snapshot of all live Conversations, ordered by id.
    pub async fn conversations(&self) -> MeshResult<Vec<ConversationInfo>> {
        self.request(|respond_to| NodeCommand::GetConversations { respond_to })
            .await
    }

    /// Close the Conversation with `peer`, if any. The peer sees a disconnect.
    pub async fn disconnect(&self, peer: &PeerId) -> MeshResult<bool> {
        let peer = peer.clone();
        self.request(|respond_to| NodeCommand::Hangup { peer, respond_to })
            .await
    }

    // --- crate-internal plumbing used by drivers ---

    pub(crate) async fn open(&self, role: Role) -> MeshResult<ConversationId> {
        self.request(|respond_to| NodeCommand::Open {
            role,
            introducing: None,
            via: None,
            respond_to,
        })
        .await?
        .ok_or(MeshError::NodeStopped)
    }

    /// Open the inviter side of an introduction of `target` through `via`.
    /// `Ok(None)` means `via` went away; the actor already rescheduled it.
    async fn open_introduction(
        &self,
        via: ConversationId,
        target: PeerId,
    ) -> MeshResult<Option<ConversationId>> {
        self.request(|respond_to| NodeCommand::Open {
            role: Role::Inviter,
            introducing: Some(target),
            via: Some(via),
            respond_to,
        })
        .await
    }

    pub(crate) async fn channel_open(
        &self,
        conversation: ConversationId,
        outbound: mpsc::UnboundedSender<String>,
        shutdown: oneshot::Sender<()>,
    ) -> bool {
        self.request(|respond_to| NodeCommand::ChannelOpen {
            conversation,
            outbound,
            shutdown,
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    pub(crate) async fn inbound(&self, conversation: ConversationId, frame: Frame) -> Verdict {
        self.request(|respond_to| NodeCommand::Inbound {
            conversation,
            frame,
            respond_to,
        })
        .await
        .unwrap_or(Verdict::Close)
    }

    pub(crate) async fn close(&self, conversation: ConversationId, error: Option<MeshError>) {
        let _ = self
            .commands
            .send(NodeCommand::Close {
                conversation,
                error,
            })
            .await;
    }

    pub(crate) fn report(&self, conversation: Option<ConversationId>, error: &MeshError) {
        warn!(
            peer = %self.id(),
            conversation = ?conversation,
            code = error.error_code(),
            error = %error,
            "mesh operation failed"
        );
        self.shared.observer.on_error(conversation, error);
    }

    /// Invite `target` and ask it, via the Conversation `via`, to join us.
    pub(crate) async fn introduce(
        &self,
        via: ConversationId,
        outbound: &mpsc::UnboundedSender<String>,
        target: PeerId,
    ) {
        let (signal, invitation) = match self.shared.rendezvous.issue_invitation().await {
            Ok(issued) => issued,
            Err(e) => {
                let _ = self
                    .commands
                    .send(NodeCommand::Release {
                        peer: target.clone(),
                    })
                    .await;
                self.report(Some(via), &e);
                return;
            }
        };

        let Ok(Some(conversation)) = self.open_introduction(via, target.clone()).await else {
            return;
        };

        let sent = ControlMessage::join(target.clone(), invitation)
            .encode()
            .and_then(|text| {
                outbound
                    .send(text)
                    .map_err(|_| MeshError::NegotiationFailure("introducer went away".into()))
            });
        if let Err(e) = sent {
            self.close(conversation, Some(e)).await;
            return;
        }

        debug!(peer = %self.id(), %target, %via, %conversation, "join sent");
        let deadline = self.config().handshake_timeout;
        self.spawn_negotiation(conversation, signal, Some(deadline));
    }

    /// Redeem a `join` that reached us through `via`.
    pub(crate) async fn accept_introduction(&self, via: ConversationId, invitation: Invitation) {
        match self.join(&invitation).await {
            Ok(conversation) => {
                debug!(peer = %self.id(), %via, %conversation, "introduction accepted")
            }
            Err(e) => self.report(Some(via), &e),
        }
    }

    /// Negotiate as inviter in the background; the peer can only accept
    /// after our `join` (or out-of-band token) reached it.
    ///
    /// In-band introductions are bounded by `deadline` so a `join` lost in
    /// transit cannot pin its target in the in-flight set forever.
    fn spawn_negotiation(
        &self,
        conversation: ConversationId,
        signal: SignalChannel,
        deadline: Option<Duration>,
    ) {
        let node = self.clone();
        tokio::spawn(async move {
            let negotiation = node.shared.transport.negotiate(signal, Role::Inviter);
            let result = match deadline {
                Some(limit) => tokio::time::timeout(limit, negotiation)
                    .await
                    .unwrap_or_else(|_| {
                        Err(MeshError::NegotiationFailure(format!(
                            "introduction not taken up within {}s",
                            limit.as_secs()
                        )))
                    }),
                None => negotiation.await,
            };
            match result {
                Ok(channel) => driver::spawn(node, conversation, channel),
                Err(e) => node.close(conversation, Some(e)).await,
            }
        });
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> NodeCommand,
    ) -> MeshResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| MeshError::NodeStopped)?;
        rx.await.map_err(|_| MeshError::NodeStopped)
    }
}

/// Per-Conversation bookkeeping owned by the actor.
struct Entry {
    role: Role,
    state: ConversationState,
    remote: Option<PeerId>,
    /// Peer this Conversation was created to reach, while in flight.
    introducing: Option<PeerId>,
    /// Last network the remote advertised.
    advertised: Option<Network>,
    /// Lost a duplicate tie-break: still read, never written to, closed
    /// after `duplicate_linger`.
    superseded: bool,
    outbound: Option<mpsc::UnboundedSender<String>>,
    /// Dropping this stops the Conversation's driver.
    _shutdown: Option<oneshot::Sender<()>>,
}

struct NodeActor {
    network: Network,
    conversations: HashMap<ConversationId, Entry>,
    /// Resolved peer → its one registered Conversation.
    by_peer: HashMap<PeerId, ConversationId>,
    /// Peers with an invitation in flight.
    introducing: HashSet<PeerId>,
    /// Automatic retries per peer since it was last connected.
    attempts: HashMap<PeerId, u32>,
    next_id: u64,
    shared: Arc<Shared>,
    /// Weak, so the actor stops once every [`Node`] handle is gone.
    commands: mpsc::WeakSender<NodeCommand>,
    receiver: mpsc::Receiver<NodeCommand>,
}

impl NodeActor {
    fn new(
        shared: Arc<Shared>,
        commands: mpsc::WeakSender<NodeCommand>,
        receiver: mpsc::Receiver<NodeCommand>,
    ) -> Self {
        Self {
            network: Network::new(shared.id.clone()),
            conversations: HashMap::new(),
            by_peer: HashMap::new(),
            introducing: HashSet::new(),
            attempts: HashMap::new(),
            next_id: 1,
            shared,
            commands,
            receiver,
        }
    }

    async fn run(mut self) {
        while let Some(command) = self.receiver.recv().await {
            self.handle(command);
        }
        debug!(peer = %self.network.id(), "mesh node actor stopped");
    }

    fn handle(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::Open {
                role,
                introducing,
                via,
                respond_to,
            } => {
                if let Some(via) = via.filter(|via| !self.is_live(*via)) {
                    debug!(peer = %self.network.id(), %via, "introducer gone before join was sent");
                    if let Some(target) = &introducing {
                        self.release(target);
                    }
                    let _ = respond_to.send(None);
                    return;
                }

                let id = ConversationId(self.next_id);
                self.next_id += 1;
                self.conversations.insert(
                    id,
                    Entry {
                        role,
                        state: ConversationState::Negotiating,
                        remote: None,
                        introducing,
                        advertised: None,
                        superseded: false,
                        outbound: None,
                        _shutdown: None,
                    },
                );
                debug!(peer = %self.network.id(), conversation = %id, ?role, "conversation opened");
                let _ = respond_to.send(Some(id));
            }
            NodeCommand::ChannelOpen {
                conversation,
                outbound,
                shutdown,
                respond_to,
            } => {
                let ok = self.channel_open(conversation, outbound, shutdown);
                let _ = respond_to.send(ok);
            }
            NodeCommand::Inbound {
                conversation,
                frame,
                respond_to,
            } => {
                let verdict = self.inbound(conversation, frame);
                let _ = respond_to.send(verdict);
            }
            NodeCommand::Close {
                conversation,
                error,
            } => self.close(conversation, error),
            NodeCommand::Release { peer } => self.release(&peer),
            NodeCommand::Hangup { peer, respond_to } => {
                let found = self.by_peer.get(&peer).copied();
                if let Some(conversation) = found {
                    info!(peer = %self.network.id(), remote = %peer, "hanging up");
                    self.close(conversation, None);
                }
                let _ = respond_to.send(found.is_some());
            }
            NodeCommand::GetNetwork { respond_to } => {
                let _ = respond_to.send(self.network.clone());
            }
            NodeCommand::GetConversations { respond_to } => {
                let mut list: Vec<ConversationInfo> = self
                    .conversations
                    .iter()
                    .map(|(id, entry)| ConversationInfo {
                        id: *id,
                        role: entry.role,
                        remote: entry.remote.clone(),
                        state: entry.state,
                    })
                    .collect();
                list.sort_by_key(|info| info.id);
                let _ = respond_to.send(list);
            }
        }
    }

    /// A handle for work the actor hands off to a task of its own.
    fn node(&self) -> Option<Node> {
        Some(Node {
            shared: self.shared.clone(),
            commands: self.commands.upgrade()?,
        })
    }

    /// Established and not superseded: fit to carry what we send.
    fn is_live(&self, id: ConversationId) -> bool {
        self.conversations
            .get(&id)
            .is_some_and(|e| e.state == ConversationState::Established && !e.superseded)
    }

    /// Channel is live: send our `hello` and wait for theirs.
    fn channel_open(
        &mut self,
        id: ConversationId,
        outbound: mpsc::UnboundedSender<String>,
        shutdown: oneshot::Sender<()>,
    ) -> bool {
        let hello = ControlMessage::hello(self.network.clone()).encode();
        let Some(entry) = self.conversations.get_mut(&id) else {
            return false;
        };
        let next = match entry.state.transition(ConversationState::AwaitingHello) {
            Ok(next) => next,
            Err(e) => {
                warn!(conversation = %id, error = %e, "channel opened twice");
                return false;
            }
        };

        let sent = hello.and_then(|text| {
            outbound
                .send(text)
                .map_err(|_| MeshError::NegotiationFailure("channel closed before hello".into()))
        });
        if let Err(e) = sent {
            self.close(id, Some(e));
            return false;
        }

        entry.state = next;
        entry.outbound = Some(outbound);
        entry._shutdown = Some(shutdown);
        debug!(peer = %self.network.id(), conversation = %id, "hello sent");
        true
    }

    fn inbound(&mut self, id: ConversationId, frame: Frame) -> Verdict {
        let Some(state) = self.conversations.get(&id).map(|e| e.state) else {
            return Verdict::Close;
        };

        match state {
            ConversationState::AwaitingHello => {
                let for_us = frame.relay_target(self.network.id()).is_none();
                let kind = frame.message.kind();
                match frame.message.body {
                    ControlBody::Hello { network } if for_us => self.greet(id, network),
                    _ => self.violate(id, format!("expected hello, got {kind}")),
                }
            }
            ConversationState::Established => self.route(id, frame),
            ConversationState::Negotiating | ConversationState::Closed => Verdict::Close,
        }
    }

    /// First `hello` on a Conversation: resolve the peer and extend.
    fn greet(&mut self, id: ConversationId, remote_network: Network) -> Verdict {
        let remote = remote_network.id().clone();
        if &remote == self.network.id() {
            return self.violate(id, "peer claims our own identifier".into());
        }
        let Some(entry) = self.conversations.get_mut(&id) else {
            return Verdict::Close;
        };
        let role = entry.role;
        let intended = entry.introducing.take();
        entry.state = ConversationState::Established;
        entry.remote = Some(remote.clone());
        entry.advertised = Some(remote_network.clone());
        self.introducing.remove(&remote);
        self.attempts.remove(&remote);
        if let Some(other) = intended.filter(|t| *t != remote) {
            self.release(&other);
        }

        match self.by_peer.get(&remote).copied() {
            Some(existing) if existing != id => {
                let local = self.network.id();
                let existing_role = self
                    .conversations
                    .get(&existing)
                    .map(|e| e.role)
                    .unwrap_or(role);
                let ours = inviter_of(role, local, &remote);
                let theirs = inviter_of(existing_role, local, &remote);
                let (kept, dropped) = if ours >= theirs {
                    (existing, id)
                } else {
                    (id, existing)
                };
                info!(peer = %local, %remote, %kept, %dropped, "duplicate conversation");

                // silent swap: the peer stays known, no observer callbacks
                self.by_peer.insert(remote, kept);
                self.supersede(dropped);
                if dropped == id {
                    // the registered Conversation already extended
                    return Verdict::Continue;
                }
            }
            _ => {
                self.by_peer.insert(remote.clone(), id);
                if self.network.add_peer(remote.clone()) {
                    info!(peer = %self.network.id(), %remote, conversation = %id, "connected");
                    self.shared.observer.on_connect(&remote);
                    self.advertise(id);
                }
            }
        }

        self.extend(&remote_network)
    }

    /// Peer exchange: invite everyone `remote_network` knows and we don't.
    fn extend(&mut self, remote_network: &Network) -> Verdict {
        let targets: Vec<PeerId> = self
            .network
            .unknown_in(remote_network)
            .into_iter()
            .filter(|p| !self.by_peer.contains_key(p) && !self.introducing.contains(p))
            .collect();

        if targets.is_empty() {
            return Verdict::Continue;
        }

        debug!(
            peer = %self.network.id(),
            via = %remote_network.id(),
            new_peers = ?targets,
            "extending network"
        );
        self.introducing.extend(targets.iter().cloned());
        Verdict::Introduce(targets)
    }

    /// Our peer set grew: re-send `hello` on every other live Conversation
    /// so neighbours that greeted us earlier learn the newcomer.
    fn advertise(&self, except: ConversationId) {
        let hello = match ControlMessage::hello(self.network.clone()).encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(peer = %self.network.id(), error = %e, "cannot encode hello");
                return;
            }
        };
        for (id, entry) in &self.conversations {
            if *id == except || !self.is_live(*id) {
                continue;
            }
            if let Some(out) = &entry.outbound {
                // a closed channel is picked up by its own driver
                let _ = out.send(hello.clone());
            }
        }
    }

    /// A message on an Established Conversation: relay or handle locally.
    fn route(&mut self, id: ConversationId, frame: Frame) -> Verdict {
        if let Some(target) = frame.relay_target(self.network.id()).cloned() {
            let outbound = self
                .by_peer
                .get(&target)
                .and_then(|c| self.conversations.get(c))
                .filter(|e| e.state == ConversationState::Established)
                .and_then(|e| e.outbound.as_ref());

            let delivered = match outbound {
                Some(out) => out.send(frame.raw).is_ok(),
                None => false,
            };
            if delivered {
                debug!(peer = %self.network.id(), %target, from = %id, "relayed");
            } else {
                let error = MeshError::Undeliverable { to: target };
                warn!(
                    peer = %self.network.id(),
                    conversation = %id,
                    error = %error,
                    "dropping routed message"
                );
                self.shared.observer.on_error(Some(id), &error);
            }
            return Verdict::Continue;
        }

        match frame.message.body {
            ControlBody::Join { invitation } => Verdict::Accept(invitation),
            ControlBody::Hello { network } => {
                let Some(entry) = self.conversations.get_mut(&id) else {
                    return Verdict::Close;
                };
                if entry.remote.as_ref() != Some(network.id()) {
                    let claimed = network.id();
                    return self
                        .violate(id, format!("hello from {claimed} on another peer's conversation"));
                }
                if entry.superseded {
                    return Verdict::Continue;
                }
                entry.advertised = Some(network.clone());
                self.extend(&network)
            }
        }
    }

    fn violate(&mut self, id: ConversationId, reason: String) -> Verdict {
        self.close(id, Some(MeshError::ProtocolViolation(reason)));
        Verdict::Close
    }

    /// Close a Conversation, forgetting its peer if it was the registered one.
    fn close(&mut self, id: ConversationId, error: Option<MeshError>) {
        let Some(entry) = self.retire(id) else {
            return;
        };

        if let Some(remote) = entry.remote {
            if self.by_peer.get(&remote) == Some(&id) {
                self.by_peer.remove(&remote);
                if self.network.remove_peer(&remote) {
                    info!(peer = %self.network.id(), %remote, conversation = %id, "disconnected");
                    self.shared.observer.on_disconnect(&remote);
                }
            }
        }

        if let Some(error) = error {
            warn!(
                peer = %self.network.id(),
                conversation = %id,
                code = error.error_code(),
                error = %error,
                "conversation closed"
            );
            self.shared.observer.on_error(Some(id), &error);
        }
    }

    /// Drop the record (which stops its driver) and release any in-flight
    /// introduction it carried. Peer bookkeeping is the caller's business.
    fn retire(&mut self, id: ConversationId) -> Option<Entry> {
        let mut entry = self.conversations.remove(&id)?;
        if let Err(e) = entry.state.transition(ConversationState::Closed) {
            debug!(conversation = %id, error = %e, "retiring closed conversation");
        }
        entry.state = ConversationState::Closed;
        entry.outbound = None;
        if let Some(target) = entry.introducing.take() {
            self.release(&target);
        }
        Some(entry)
    }

    /// Keep reading a duplicate the remote may still be sending on, but stop
    /// using it, and close it once `duplicate_linger` has passed.
    fn supersede(&mut self, id: ConversationId) {
        let Some(entry) = self.conversations.get_mut(&id) else {
            return;
        };
        entry.superseded = true;

        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let linger = self.shared.config.duplicate_linger;
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            let _ = commands
                .send(NodeCommand::Close {
                    conversation: id,
                    error: None,
                })
                .await;
        });
    }

    /// An introduction toward `target` ended without a Conversation. Unless
    /// another one is still pending, forget it and try again.
    fn release(&mut self, target: &PeerId) {
        let pending = self
            .conversations
            .values()
            .any(|e| e.introducing.as_ref() == Some(target));
        if pending {
            return;
        }
        self.introducing.remove(target);
        self.reintroduce(target);
    }

    /// Re-run extension for one peer against what our neighbours last
    /// advertised, so a `join` lost in transit is sent again.
    fn reintroduce(&mut self, target: &PeerId) {
        if target == self.network.id()
            || self.network.knows(target)
            || self.by_peer.contains_key(target)
            || self.introducing.contains(target)
        {
            return;
        }
        let attempt = self.attempts.get(target).copied().unwrap_or(0) + 1;
        if attempt > MAX_INTRODUCTION_ATTEMPTS {
            debug!(peer = %self.network.id(), %target, "giving up on introduction until next hello");
            return;
        }

        let via = self
            .conversations
            .iter()
            .filter(|(id, e)| {
                self.is_live(**id) && e.advertised.as_ref().is_some_and(|n| n.knows(target))
            })
            .filter_map(|(id, e)| Some((*id, e.outbound.clone()?)))
            .min_by_key(|(id, _)| *id);
        let (Some((via, outbound)), Some(node)) = (via, self.node()) else {
            return;
        };

        info!(peer = %self.network.id(), %target, %via, attempt, "retrying introduction");
        self.attempts.insert(target.clone(), attempt);
        self.introducing.insert(target.clone());
        let target = target.clone();
        tokio::spawn(async move {
            node.introduce(via, &outbound, target).await;
        });
    }
}
