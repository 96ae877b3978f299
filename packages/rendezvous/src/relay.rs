//! Transport that keeps talking through the beacon.
//!
//! After a token offer/answer exchange, control messages ride the signal
//! channel wrapped as `{"type":"control","data":"<envelope>"}`. No NAT
//! traversal, no direct path: the beacon relays everything.

use async_trait::async_trait;
use mesh_protocol::transport::await_signal;
use mesh_protocol::{ControlChannel, MeshError, MeshResult, Role, SignalChannel, Transport};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

const TRANSPORT_NAME: &str = "relay";

#[derive(Clone, Copy, Debug, Default)]
pub struct RelayTransport;

#[async_trait]
impl Transport for RelayTransport {
    async fn negotiate(&self, mut signal: SignalChannel, role: Role) -> MeshResult<ControlChannel> {
        match role {
            Role::Invitee => {
                signal.send(json!({ "type": "offer", "transport": TRANSPORT_NAME }))?;
                let answer = await_signal(&mut signal, "answer").await?;
                check_transport(&answer)?;
            }
            Role::Inviter => {
                let offer = await_signal(&mut signal, "offer").await?;
                if let Err(e) = check_transport(&offer) {
                    let _ = signal.send(json!({ "type": "error", "data": "unsupported transport" }));
                    return Err(e);
                }
                signal.send(json!({ "type": "answer", "transport": TRANSPORT_NAME }))?;
            }
        }
        debug!(?role, "relay transport negotiated");
        Ok(wrap(signal))
    }
}

fn check_transport(message: &serde_json::Value) -> MeshResult<()> {
    match message.get("transport").and_then(|t| t.as_str()) {
        Some(TRANSPORT_NAME) => Ok(()),
        other => Err(MeshError::NegotiationFailure(format!(
            "peer offered transport {other:?}"
        ))),
    }
}

/// Run a control channel over the (already negotiated) signal channel.
fn wrap(signal: SignalChannel) -> ControlChannel {
    let (signal_tx, mut signal_rx) = signal.into_parts();
    let (engine_tx, mut outgoing) = mpsc::unbounded_channel::<String>();
    let (incoming, engine_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(text) = outgoing.recv().await {
            if signal_tx
                .send(json!({ "type": "control", "data": text }))
                .is_err()
            {
                break;
            }
        }
        // dropping signal_tx closes the beacon socket
    });

    tokio::spawn(async move {
        while let Some(message) = signal_rx.recv().await {
            if message.get("type").and_then(|t| t.as_str()) != Some("control") {
                continue;
            }
            let Some(data) = message.get("data").and_then(|d| d.as_str()) else {
                debug!("control frame without data");
                continue;
            };
            if incoming.send(data.to_string()).is_err() {
                break;
            }
        }
    });

    ControlChannel::new(engine_tx, engine_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn control_messages_are_wrapped() {
        let (a, b) = SignalChannel::pair();
        let inviter = tokio::spawn(async move { RelayTransport.negotiate(a, Role::Inviter).await });
        let mut invitee = RelayTransport.negotiate(b, Role::Invitee).await.unwrap();
        let mut inviter = inviter.await.unwrap().unwrap();

        inviter.send(r#"{"type":"hello"}"#.into()).unwrap();
        assert_eq!(invitee.recv().await.as_deref(), Some(r#"{"type":"hello"}"#));

        invitee.send("back".into()).unwrap();
        assert_eq!(inviter.recv().await.as_deref(), Some("back"));

        drop(invitee);
        assert_eq!(inviter.recv().await, None);
    }

    #[tokio::test]
    async fn foreign_transport_is_refused() {
        let (a, mut b) = SignalChannel::pair();
        b.send(json!({ "type": "offer", "transport": "webrtc" })).unwrap();
        let err = RelayTransport
            .negotiate(a, Role::Inviter)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "negotiation_failure");
        assert_eq!(b.recv().await.unwrap()["type"], "error");
    }
}
