//! Control message envelope.
//!
//! Wire format: one JSON object per channel message,
//! `{ "type": "hello" | "join", "to"?: PeerId, ... }`.
//! Unknown `type` tags are rejected here, at decode time.

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, MeshResult};
use crate::network::Network;
use crate::peer::PeerId;
use crate::signalling::Invitation;

/// A control message with its optional routing target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Final recipient. Absent means "whoever receives this".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PeerId>,
    #[serde(flatten)]
    pub body: ControlBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlBody {
    /// Handshake: introduce ourselves and everyone we know.
    Hello { network: Network },
    /// Ask `to` to accept `invitation` and connect back to the sender's side.
    Join { invitation: Invitation },
}

impl ControlMessage {
    pub fn hello(network: Network) -> Self {
        Self {
            to: None,
            body: ControlBody::Hello { network },
        }
    }

    pub fn join(to: PeerId, invitation: Invitation) -> Self {
        Self {
            to: Some(to),
            body: ControlBody::Join { invitation },
        }
    }

    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self.body {
            ControlBody::Hello { .. } => "hello",
            ControlBody::Join { .. } => "join",
        }
    }

    pub fn encode(&self) -> MeshResult<String> {
        serde_json::to_string(self)
            .map_err(|e| MeshError::ProtocolViolation(format!("unencodable {}: {e}", self.kind())))
    }
}

/// A decoded message together with the exact text it arrived as.
///
/// Relays forward `raw`, never a re-encoding, so routed messages reach their
/// target byte-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub raw: String,
    pub message: ControlMessage,
}

impl Frame {
    pub fn decode(raw: String) -> MeshResult<Self> {
        match serde_json::from_str::<ControlMessage>(&raw) {
            Ok(message) => Ok(Self { raw, message }),
            Err(e) => Err(MeshError::ProtocolViolation(format!(
                "undecodable control message: {e}"
            ))),
        }
    }

    /// Where this frame should go, given our own identifier.
    /// `None` means it is for us.
    pub fn relay_target(&self, local: &PeerId) -> Option<&PeerId> {
        self.message.to.as_ref().filter(|to| *to != local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PeerId {
        PeerId::from(s)
    }

    #[test]
    fn hello_wire_shape() {
        let msg = ControlMessage::hello(Network::with_peers(id("b"), [id("a")]));
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "hello", "network": {"id": "b", "peers": ["a"]}})
        );
    }

    #[test]
    fn join_wire_shape() {
        let msg = ControlMessage::join(id("a"), Invitation::from("tok-1"));
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "join", "to": "a", "invitation": "tok-1"})
        );
    }

    #[test]
    fn decode_keeps_raw_text() {
        let raw = r#"{ "to":"a",  "type":"join","invitation":"t" }"#.to_string();
        let frame = Frame::decode(raw.clone()).unwrap();
        assert_eq!(frame.raw, raw);
        assert_eq!(frame.message.kind(), "join");
        assert_eq!(frame.message.to, Some(id("a")));
    }

    #[test]
    fn unknown_type_is_a_violation() {
        let err = Frame::decode(r#"{"type":"ping"}"#.to_string()).unwrap_err();
        assert_eq!(err.error_code(), "protocol_violation");
    }

    #[test]
    fn garbage_is_a_violation() {
        let err = Frame::decode("not json".to_string()).unwrap_err();
        assert!(matches!(err, MeshError::ProtocolViolation(_)));

        let err = Frame::decode(r#"{"type":"join"}"#.to_string()).unwrap_err();
        assert!(matches!(err, MeshError::ProtocolViolation(_)));
    }

    #[test]
    fn relay_target() {
        let me = id("me");
        let for_me = Frame::decode(r#"{"type":"join","to":"me","invitation":"t"}"#.into()).unwrap();
        assert_eq!(for_me.relay_target(&me), None);

        let untargeted =
            Frame::decode(r#"{"type":"hello","network":{"id":"x","peers":[]}}"#.into()).unwrap();
        assert_eq!(untargeted.relay_target(&me), None);

        let onward = Frame::decode(r#"{"type":"join","to":"c","invitation":"t"}"#.into()).unwrap();
        assert_eq!(onward.relay_target(&me), Some(&id("c")));
    }
}
