use anyhow::{Context, Result};
use rendezvous::{Beacon, BeaconConfig};
use tracing::info;

/// Run a beacon in the foreground until Ctrl-C.
pub async fn beacon_command(config: BeaconConfig) -> Result<()> {
    let beacon = Beacon::bind(&config).await?;

    println!("Beacon ready at {}", beacon.url());
    println!("Clients: set [rendezvous] url = \"{}\"", beacon.url());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;
    info!("Received shutdown signal");

    beacon.shutdown().await;
    Ok(())
}
