//! The beacon: pairs a waiting host with the guest holding its invitation.
//!
//! - `GET /meet` (upgrade): mint a token, send it, wait as host.
//! - `GET /meet/{invitation}` (upgrade): claim the waiting host, send `ready`
//!   to both, then relay frames until either side goes away.
//! - anything else: `{"type":"error","data":"unsupported"}` and close.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{BeaconMessage, ERROR_UNSUPPORTED, ERROR_VOID};

pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Where the beacon listens.
#[derive(Clone, Debug)]
pub struct BeaconConfig {
    pub host: String,
    /// 0 = auto-select
    pub port: u16,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl BeaconConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid beacon address {}:{}", self.host, self.port))
    }
}

/// Hosts waiting for their guest, by token. The sender hands the guest's
/// socket to the host's task, which then runs the relay.
#[derive(Clone, Default)]
struct BeaconState {
    waiting: Arc<Mutex<HashMap<String, oneshot::Sender<WebSocket>>>>,
}

pub fn router() -> Router {
    Router::new()
        .route("/meet", get(host_handler))
        .route("/meet/{invitation}", get(guest_handler))
        .fallback(unsupported_handler)
        .with_state(BeaconState::default())
}

/// A running beacon server.
pub struct Beacon {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Beacon {
    pub async fn bind(config: &BeaconConfig) -> Result<Self> {
        let addr = config.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind beacon on {addr}"))?;
        let addr = listener.local_addr()?;

        let (shutdown, stop) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, router())
                .with_graceful_shutdown(async move {
                    let _ = stop.await;
                })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "beacon server failed");
            }
        });

        info!("Beacon listening on ws://{}", addr);
        Ok(Self {
            addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL clients should be configured with.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Stop accepting connections. Relays still running after
    /// [`SHUTDOWN_GRACE`] are cut off.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let mut task = self.task;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("beacon did not drain in time, aborting");
            task.abort();
        }
        info!("Beacon stopped");
    }
}

async fn host_handler(State(state): State<BeaconState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| host_session(socket, state))
}

async fn guest_handler(
    State(state): State<BeaconState>,
    Path(invitation): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| guest_session(socket, invitation, state))
}

async fn unsupported_handler(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|socket| refuse(socket, ERROR_UNSUPPORTED))
}

async fn send(socket: &mut WebSocket, message: &BeaconMessage) -> Result<()> {
    socket
        .send(Message::Text(message.to_json().into()))
        .await
        .context("websocket send failed")
}

async fn refuse(mut socket: WebSocket, reason: &'static str) {
    let _ = send(&mut socket, &BeaconMessage::error(reason)).await;
    let _ = socket.send(Message::Close(None)).await;
}

async fn host_session(mut socket: WebSocket, state: BeaconState) {
    let token = Uuid::new_v4().to_string();
    let (pair, mut paired) = oneshot::channel();
    state.waiting.lock().await.insert(token.clone(), pair);

    let announced = send(
        &mut socket,
        &BeaconMessage::Invitation {
            invitation: token.clone(),
        },
    )
    .await;
    if announced.is_err() {
        state.waiting.lock().await.remove(&token);
        return;
    }
    debug!(%token, "host waiting");

    let guest = loop {
        tokio::select! {
            guest = &mut paired => match guest {
                Ok(guest) => break guest,
                Err(_) => return,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    state.waiting.lock().await.remove(&token);
                    debug!(%token, "host left before anyone joined");
                    return;
                }
                // nothing to relay yet
                Some(Ok(_)) => continue,
            },
        }
    };

    info!(%token, "invitation redeemed");
    relay(socket, guest).await;
    debug!(%token, "relay finished");
}

async fn guest_session(socket: WebSocket, invitation: String, state: BeaconState) {
    // claiming removes the token: invitations are one-time
    let host = state.waiting.lock().await.remove(&invitation);
    match host {
        Some(host) => {
            if let Err(socket) = host.send(socket) {
                refuse(socket, ERROR_VOID).await;
            }
        }
        None => {
            debug!(%invitation, "unknown invitation");
            refuse(socket, ERROR_VOID).await;
        }
    }
}

/// Send `ready` to both ends, then shuttle frames until one side closes.
async fn relay(mut host: WebSocket, mut guest: WebSocket) {
    if send(&mut host, &BeaconMessage::Ready).await.is_err()
        || send(&mut guest, &BeaconMessage::Ready).await.is_err()
    {
        return;
    }

    let (mut host_tx, mut host_rx) = host.split();
    let (mut guest_tx, mut guest_rx) = guest.split();

    loop {
        tokio::select! {
            msg = host_rx.next() => match msg {
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                    if guest_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            msg = guest_rx.next() => match msg {
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                    if host_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = host_tx.close().await;
    let _ = guest_tx.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_addr() {
        let addr = BeaconConfig::default().socket_addr().unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn bad_host_is_an_error() {
        let config = BeaconConfig {
            host: "not a host".into(),
            port: 1,
        };
        assert!(config.socket_addr().is_err());
    }
}
