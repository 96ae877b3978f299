//! [`Rendezvous`] over a beacon's WebSocket endpoints.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use mesh_protocol::{Invitation, MeshError, MeshResult, Rendezvous, SignalChannel};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tracing::debug;
use url::Url;

use crate::protocol::BeaconMessage;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Rendezvous client for one beacon.
///
/// Invitations are full join URLs (`ws://host:port/meet/<token>`), so whoever
/// receives one can redeem it without knowing the beacon beforehand.
#[derive(Clone, Debug)]
pub struct WsRendezvous {
    base: Url,
}

impl WsRendezvous {
    /// `base` is the beacon's root, e.g. `ws://127.0.0.1:8080`.
    pub fn new(base: &str) -> MeshResult<Self> {
        let mut base = Url::parse(base)
            .map_err(|e| MeshError::RendezvousFailure(format!("bad beacon url {base}: {e}")))?;
        if !matches!(base.scheme(), "ws" | "wss") {
            return Err(MeshError::RendezvousFailure(format!(
                "beacon url must be ws:// or wss://, got {base}"
            )));
        }
        base.set_path("/");
        base.set_query(None);
        Ok(Self { base })
    }

    /// The beacon an invitation was issued by; lets an invitee issue its own
    /// invitations later.
    pub fn from_invitation(invitation: &Invitation) -> MeshResult<Self> {
        let url = Url::parse(invitation.as_str()).map_err(|e| {
            MeshError::RendezvousFailure(format!("invitation is not a url: {e}"))
        })?;
        let mut segments = url.path_segments().into_iter().flatten();
        if segments.next() != Some("meet") || segments.next().is_none_or(str::is_empty) {
            return Err(MeshError::RendezvousFailure(format!(
                "not a meet invitation: {invitation}"
            )));
        }
        Self::new(url.as_str())
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn meet_url(&self) -> String {
        format!("{}meet", self.base)
    }
}

#[async_trait]
impl Rendezvous for WsRendezvous {
    async fn issue_invitation(&self) -> MeshResult<(SignalChannel, Invitation)> {
        let mut socket = connect(&self.meet_url()).await?;
        match next_beacon_message(&mut socket).await? {
            BeaconMessage::Invitation { invitation } => {
                let invitation = Invitation::from(format!("{}/{}", self.meet_url(), invitation));
                debug!(%invitation, "beacon issued invitation");
                Ok((bridge(socket), invitation))
            }
            other => Err(unexpected(other)),
        }
    }

    async fn accept_invitation(&self, invitation: &Invitation) -> MeshResult<SignalChannel> {
        let mut socket = connect(invitation.as_str()).await?;
        match next_beacon_message(&mut socket).await? {
            BeaconMessage::Ready => Ok(bridge(socket)),
            other => Err(unexpected(other)),
        }
    }
}

async fn connect(url: &str) -> MeshResult<Socket> {
    let (socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| MeshError::RendezvousFailure(format!("cannot reach {url}: {e}")))?;
    Ok(socket)
}

fn unexpected(message: BeaconMessage) -> MeshError {
    match message {
        BeaconMessage::Error { data } => MeshError::RendezvousFailure(data),
        other => MeshError::RendezvousFailure(format!("unexpected beacon message {other:?}")),
    }
}

/// First text frame, parsed as a beacon message.
async fn next_beacon_message(socket: &mut Socket) -> MeshResult<BeaconMessage> {
    while let Some(frame) = socket.next().await {
        match frame {
            Ok(tungstenite::Message::Text(text)) => {
                return serde_json::from_str(text.as_str()).map_err(|e| {
                    MeshError::RendezvousFailure(format!("malformed beacon message: {e}"))
                });
            }
            Ok(tungstenite::Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(MeshError::RendezvousFailure(e.to_string())),
        }
    }
    Err(MeshError::RendezvousFailure(
        "beacon closed the connection".into(),
    ))
}

/// Pump a beacon socket into a [`SignalChannel`]. Dropping the channel
/// closes the socket; the socket closing ends the channel's stream.
fn bridge(socket: Socket) -> SignalChannel {
    let (mut ws_write, mut ws_read) = socket.split();
    let (to_app, app_rx) = mpsc::unbounded_channel::<serde_json::Value>();
    let (app_tx, mut from_app) = mpsc::unbounded_channel::<serde_json::Value>();

    tokio::spawn(async move {
        while let Some(frame) = ws_read.next().await {
            match frame {
                Ok(tungstenite::Message::Text(text)) => {
                    match serde_json::from_str::<serde_json::Value>(text.as_str()) {
                        Ok(value) => {
                            if to_app.send(value).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(error = %e, "dropping non-json signal frame"),
                    }
                }
                Ok(tungstenite::Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::spawn(async move {
        while let Some(value) = from_app.recv().await {
            let text = value.to_string();
            if ws_write
                .send(tungstenite::Message::Text(text.into()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = ws_write.close().await;
    });

    SignalChannel::new(app_tx, app_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_is_normalised() {
        let client = WsRendezvous::new("ws://127.0.0.1:8080/some/path?x=1").unwrap();
        assert_eq!(client.base().as_str(), "ws://127.0.0.1:8080/");
        assert_eq!(client.meet_url(), "ws://127.0.0.1:8080/meet");
    }

    #[test]
    fn http_is_rejected() {
        let err = WsRendezvous::new("http://example.com").unwrap_err();
        assert_eq!(err.error_code(), "rendezvous_failure");
    }

    #[test]
    fn beacon_is_derived_from_invitation() {
        let inv = Invitation::from("ws://10.0.0.2:9000/meet/3f1c");
        let client = WsRendezvous::from_invitation(&inv).unwrap();
        assert_eq!(client.base().as_str(), "ws://10.0.0.2:9000/");

        assert!(WsRendezvous::from_invitation(&Invitation::from("ws://h/elsewhere/x")).is_err());
        assert!(WsRendezvous::from_invitation(&Invitation::from("ws://h/meet")).is_err());
        assert!(WsRendezvous::from_invitation(&Invitation::from("not a url")).is_err());
    }
}
