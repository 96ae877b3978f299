//! `simulate`: form a mesh of in-process nodes and report the result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use mesh_protocol::memory::{MemoryRendezvous, MemoryTransport};
use mesh_protocol::{ConversationState, Network, Node, NodeConfig, PeerId};
use tracing::{debug, info};

/// Who introduces each new node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Topology {
    /// node i is invited by node i-1
    Chain,
    /// every node is invited by node 0
    Star,
}

impl Topology {
    fn introducer(self, joiner: usize) -> usize {
        match self {
            Topology::Chain => joiner - 1,
            Topology::Star => 0,
        }
    }
}

#[derive(Debug)]
pub struct SimulationReport {
    pub networks: Vec<Network>,
    pub invitations: usize,
    pub elapsed: Duration,
}

/// Introduce `count` nodes one by one, waiting for the mesh to settle after
/// each introduction.
pub async fn run_simulation(
    count: usize,
    topology: Topology,
    config: NodeConfig,
) -> Result<SimulationReport> {
    if count < 2 {
        bail!("a mesh needs at least 2 nodes, got {count}");
    }

    let rendezvous = MemoryRendezvous::default();
    let transport = MemoryTransport::default();
    let settle_limit = config.handshake_timeout;
    let started = Instant::now();

    let nodes: Vec<Node> = (0..count)
        .map(|i| {
            Node::builder(Arc::new(rendezvous.clone()), Arc::new(transport.clone()))
                .id(PeerId::from(format!("node-{i}")))
                .config(config.clone())
                .spawn()
        })
        .collect();

    for joiner in 1..count {
        let host = &nodes[topology.introducer(joiner)];
        let invitation = host.invite().await?;
        nodes[joiner]
            .join(&invitation)
            .await
            .with_context(|| format!("{} could not join {}", nodes[joiner].id(), host.id()))?;

        tokio::time::timeout(settle_limit, settle(&nodes[..=joiner]))
            .await
            .with_context(|| format!("mesh of {} nodes did not settle", joiner + 1))??;
        debug!(nodes = joiner + 1, "mesh settled");
    }

    let mut networks = Vec::with_capacity(count);
    for node in &nodes {
        networks.push(node.network().await?);
    }

    let report = SimulationReport {
        networks,
        invitations: rendezvous.issued().await,
        elapsed: started.elapsed(),
    };
    info!(
        nodes = count,
        invitations = report.invitations,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "simulation finished"
    );
    Ok(report)
}

async fn settle(nodes: &[Node]) -> Result<()> {
    loop {
        if is_full_mesh(nodes).await? {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn is_full_mesh(nodes: &[Node]) -> Result<bool> {
    let expected = nodes.len() - 1;
    for node in nodes {
        if node.network().await?.len() != expected {
            return Ok(false);
        }
        let conversations = node.conversations().await?;
        if conversations.len() != expected
            || conversations
                .iter()
                .any(|c| c.state != ConversationState::Established)
        {
            return Ok(false);
        }
    }
    Ok(true)
}

pub async fn simulate_command(count: usize, topology: Topology, config: NodeConfig) -> Result<()> {
    let report = run_simulation(count, topology, config).await?;

    println!(
        "{} nodes ({:?}) formed a full mesh in {:?} using {} invitations",
        report.networks.len(),
        topology,
        report.elapsed,
        report.invitations
    );
    for network in &report.networks {
        let peers: Vec<&str> = network.peers().iter().map(PeerId::as_str).collect();
        println!("{:>10}: {}", network.id().as_str(), peers.join(", "));
    }
    Ok(())
}
