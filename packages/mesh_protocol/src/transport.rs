//! Transport contract and the control channel it produces.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::conversation::Role;
use crate::error::{MeshError, MeshResult};
use crate::signalling::SignalChannel;

/// Ordered, reliable, bidirectional text pipe to one remote node.
///
/// The end of the inbound stream is the disconnect signal. Dropping a
/// `ControlChannel` closes it for the other end.
#[derive(Debug)]
pub struct ControlChannel {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl ControlChannel {
    pub fn new(tx: mpsc::UnboundedSender<String>, rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { tx, rx }
    }

    /// Two directly connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    pub fn send(&self, message: String) -> MeshResult<()> {
        self.tx
            .send(message)
            .map_err(|_| MeshError::NegotiationFailure("control channel closed".into()))
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn into_parts(self) -> (mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
        (self.tx, self.rx)
    }
}

/// Turns a signal channel into a live [`ControlChannel`].
///
/// The invitee offers, the inviter answers.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn negotiate(&self, signal: SignalChannel, role: Role) -> MeshResult<ControlChannel>;
}

/// Read the signal channel until a message of type `expected` arrives.
///
/// Messages of other types (`ready`, `candidate`, ...) are skipped. An
/// `error` message or a hangup fails the negotiation.
pub async fn await_signal(
    signal: &mut SignalChannel,
    expected: &str,
) -> MeshResult<serde_json::Value> {
    loop {
        let Some(message) = signal.recv().await else {
            return Err(MeshError::NegotiationFailure(format!(
                "signal channel closed while waiting for {expected}"
            )));
        };
        match message.get("type").and_then(|t| t.as_str()) {
            Some(kind) if kind == expected => return Ok(message),
            Some("error") => {
                let detail = message
                    .get("data")
                    .or_else(|| message.get("code"))
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "unspecified".into());
                return Err(MeshError::NegotiationFailure(format!(
                    "remote reported {detail}"
                )));
            }
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn await_signal_skips_noise() {
        let (a, mut b) = SignalChannel::pair();
        a.send(json!({"type": "ready"})).unwrap();
        a.send(json!({"type": "candidate", "candidate": "x"})).unwrap();
        a.send(json!({"type": "answer", "sdp": "y"})).unwrap();
        let answer = await_signal(&mut b, "answer").await.unwrap();
        assert_eq!(answer["sdp"], "y");
    }

    #[tokio::test]
    async fn await_signal_fails_on_error_or_hangup() {
        let (a, mut b) = SignalChannel::pair();
        a.send(json!({"type": "error", "data": "void"})).unwrap();
        let err = await_signal(&mut b, "offer").await.unwrap_err();
        assert_eq!(err.error_code(), "negotiation_failure");

        drop(a);
        assert!(await_signal(&mut b, "offer").await.is_err());
    }

    #[tokio::test]
    async fn drop_signals_disconnect() {
        let (a, mut b) = ControlChannel::pair();
        a.send("one".into()).unwrap();
        drop(a);
        assert_eq!(b.recv().await.as_deref(), Some("one"));
        assert_eq!(b.recv().await, None);
    }
}
