use serde::{Deserialize, Serialize};

/// `data` of the error sent for an unknown or already used invitation.
pub const ERROR_VOID: &str = "void";
/// `data` of the error sent for any path the beacon does not serve.
pub const ERROR_UNSUPPORTED: &str = "unsupported";

/// Messages the beacon itself sends. Everything after `ready` is relayed
/// verbatim and never parsed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BeaconMessage {
    /// Sent to a host right after it connects to `/meet`.
    Invitation { invitation: String },
    /// Both sides are connected; relaying starts.
    Ready,
    Error { data: String },
}

impl BeaconMessage {
    pub fn error(data: &str) -> Self {
        Self::Error {
            data: data.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        // only string fields: serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error"}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shapes() {
        assert_eq!(BeaconMessage::Ready.to_json(), r#"{"type":"ready"}"#);
        assert_eq!(
            BeaconMessage::error(ERROR_VOID).to_json(),
            r#"{"type":"error","data":"void"}"#
        );
        let parsed: BeaconMessage =
            serde_json::from_str(r#"{"type":"invitation","invitation":"abc"}"#).unwrap();
        assert_eq!(
            parsed,
            BeaconMessage::Invitation {
                invitation: "abc".into()
            }
        );
    }

    #[test]
    fn relayed_frames_are_not_beacon_messages() {
        assert!(serde_json::from_str::<BeaconMessage>(r#"{"type":"offer"}"#).is_err());
    }
}
