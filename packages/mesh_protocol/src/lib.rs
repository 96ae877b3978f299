//! Mesh protocol - pairwise introductions converging on a full mesh
//!
//! This crate holds the control plane that runs once two nodes share a
//! channel: the `hello` handshake, peer exchange, and routing of `join`
//! introductions across the partially formed mesh. It knows nothing about
//! sockets; rendezvous and transport are pluggable traits, and in-memory
//! versions of both live in [`memory`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mesh_protocol::Node;
//! use mesh_protocol::memory::{MemoryRendezvous, MemoryTransport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let rendezvous = Arc::new(MemoryRendezvous::default());
//!     let transport = Arc::new(MemoryTransport::default());
//!
//!     let a = Node::builder(rendezvous.clone(), transport.clone()).spawn();
//!     let b = Node::builder(rendezvous, transport).spawn();
//!
//!     let invitation = a.invite().await.unwrap();
//!     b.join(&invitation).await.unwrap();
//!
//!     // once the hellos crossed, each side knows the other
//!     let network = a.network().await.unwrap();
//!     println!("{} knows {:?}", network.id(), network.peers());
//! }
//! ```

pub mod config;
pub mod conversation;
mod driver;
pub mod error;
pub mod memory;
pub mod message;
pub mod network;
pub mod node;
pub mod observer;
pub mod peer;
pub mod signalling;
pub mod transport;

pub use config::NodeConfig;
pub use conversation::{ConversationId, ConversationInfo, ConversationState, Role};
pub use error::{MeshError, MeshResult};
pub use message::{ControlBody, ControlMessage, Frame};
pub use network::Network;
pub use node::{Node, NodeBuilder};
pub use observer::{EventBus, MeshEvent, NoopObserver, Observer};
pub use peer::PeerId;
pub use signalling::{Invitation, Rendezvous, SignalChannel};
pub use transport::{ControlChannel, Transport};
