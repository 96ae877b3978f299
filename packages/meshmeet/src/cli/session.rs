//! `host` and `join`: one live node talking through a beacon.

use std::sync::Arc;

use anyhow::{Context, Result};
use mesh_protocol::{EventBus, Invitation, Node, NodeConfig};
use rendezvous::{RelayTransport, WsRendezvous};
use tracing::info;

use super::print_events;

fn spawn_node(client: WsRendezvous, config: NodeConfig) -> Node {
    let bus = EventBus::default();
    print_events(bus.subscribe());
    Node::builder(Arc::new(client), Arc::new(RelayTransport))
        .config(config)
        .observer(Arc::new(bus))
        .spawn()
}

/// Start a node, print `count` invitations and stay in the mesh until Ctrl-C.
pub async fn host_command(url: &str, count: usize, config: NodeConfig) -> Result<()> {
    let client = WsRendezvous::new(url).context("Invalid rendezvous url")?;
    let node = spawn_node(client, config);
    println!("Node {}", node.id());

    for _ in 0..count.max(1) {
        let invitation = node
            .invite()
            .await
            .with_context(|| format!("Failed to get an invitation from {url}"))?;
        println!("Invitation: {invitation}");
    }

    run_until_interrupted(&node).await
}

/// Redeem `invitation` and stay in the mesh until Ctrl-C.
pub async fn join_command(invitation: &str, config: NodeConfig) -> Result<()> {
    let invitation = Invitation::from(invitation);
    let client = WsRendezvous::from_invitation(&invitation).context("Invalid invitation")?;
    let node = spawn_node(client, config);
    println!("Node {}", node.id());

    node.join(&invitation)
        .await
        .context("Failed to join the mesh")?;
    info!(peer = %node.id(), "joined, waiting for handshakes");

    run_until_interrupted(&node).await
}

async fn run_until_interrupted(node: &Node) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;
    info!("Received shutdown signal");

    let network = node.network().await?;
    println!("Leaving with {} peer(s):", network.len());
    for peer in network.peers() {
        println!("  {peer}");
    }
    Ok(())
}
