pub mod beacon;
pub mod session;
pub mod simulate;

use mesh_protocol::MeshEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// Print mesh events to stdout as they happen.
pub fn print_events(mut events: broadcast::Receiver<MeshEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MeshEvent::Connected(peer)) => println!("+ {peer}"),
                Ok(MeshEvent::Disconnected(peer)) => println!("- {peer}"),
                Ok(MeshEvent::Error {
                    conversation,
                    error,
                }) => match conversation {
                    Some(conversation) => println!("! {conversation}: {error}"),
                    None => println!("! {error}"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event printer lagged, skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
