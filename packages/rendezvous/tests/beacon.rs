//! Beacon server and clients over real sockets on an auto-selected port.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use mesh_protocol::{ConversationState, Invitation, Node, PeerId, Rendezvous};
use rendezvous::{Beacon, BeaconConfig, BeaconMessage, RelayTransport, WsRendezvous};
use serde_json::json;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite;

/// Timeout for each async operation in tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

async fn start_beacon() -> Beacon {
    Beacon::bind(&BeaconConfig {
        host: "127.0.0.1".into(),
        port: 0,
    })
    .await
    .expect("failed to start beacon")
}

fn node(client: &WsRendezvous, name: &str) -> Node {
    Node::builder(Arc::new(client.clone()), Arc::new(RelayTransport))
        .id(PeerId::from(name))
        .spawn()
}

#[tokio::test]
async fn invitation_pairs_host_and_guest() {
    let beacon = start_beacon().await;
    let client = WsRendezvous::new(&beacon.url()).unwrap();

    let (mut host, invitation) = client.issue_invitation().await.unwrap();
    assert!(
        invitation
            .as_str()
            .starts_with(&format!("{}/meet/", beacon.url()))
    );

    let mut guest = client.accept_invitation(&invitation).await.unwrap();
    let ready = timeout(TEST_TIMEOUT, host.recv()).await.unwrap().unwrap();
    assert_eq!(ready["type"], "ready");

    guest.send(json!({"type": "offer", "n": 1})).unwrap();
    let relayed = timeout(TEST_TIMEOUT, host.recv()).await.unwrap().unwrap();
    assert_eq!(relayed, json!({"type": "offer", "n": 1}));

    host.send(json!({"type": "answer"})).unwrap();
    let relayed = timeout(TEST_TIMEOUT, guest.recv()).await.unwrap().unwrap();
    assert_eq!(relayed["type"], "answer");

    // one side hanging up ends the other's stream
    drop(guest);
    assert!(timeout(TEST_TIMEOUT, host.recv()).await.unwrap().is_none());

    beacon.shutdown().await;
}

#[tokio::test]
async fn invitation_is_single_use() {
    let beacon = start_beacon().await;
    let client = WsRendezvous::new(&beacon.url()).unwrap();

    let (_host, invitation) = client.issue_invitation().await.unwrap();
    let _guest = client.accept_invitation(&invitation).await.unwrap();

    let err = client.accept_invitation(&invitation).await.unwrap_err();
    assert_eq!(err, mesh_protocol::MeshError::RendezvousFailure("void".into()));
}

#[tokio::test]
async fn unknown_invitation_is_void() {
    let beacon = start_beacon().await;
    let client = WsRendezvous::new(&beacon.url()).unwrap();
    let bogus = Invitation::from(format!("{}/meet/nope", beacon.url()));
    let err = client.accept_invitation(&bogus).await.unwrap_err();
    assert_eq!(err.error_code(), "rendezvous_failure");
}

#[tokio::test]
async fn other_paths_are_unsupported() {
    let beacon = start_beacon().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("{}/elsewhere", beacon.url()))
        .await
        .unwrap();

    let frame = timeout(TEST_TIMEOUT, socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let tungstenite::Message::Text(text) = frame else {
        panic!("expected a text frame, got {frame:?}");
    };
    let message: BeaconMessage = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(message, BeaconMessage::error("unsupported"));
}

#[tokio::test]
async fn host_leaving_voids_its_invitation() {
    let beacon = start_beacon().await;
    let client = WsRendezvous::new(&beacon.url()).unwrap();

    let (host, invitation) = client.issue_invitation().await.unwrap();
    drop(host);

    // the beacon notices the close asynchronously
    let result = timeout(TEST_TIMEOUT, async {
        loop {
            match client.accept_invitation(&invitation).await {
                Err(e) => return e,
                Ok(_) => sleep(Duration::from_millis(20)).await,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(result.error_code(), "rendezvous_failure");
}

#[tokio::test]
async fn three_nodes_mesh_through_the_beacon() {
    let beacon = start_beacon().await;
    let client = WsRendezvous::new(&beacon.url()).unwrap();
    let a = node(&client, "a");
    let b = node(&client, "b");
    let c = node(&client, "c");

    let invitation = a.invite().await.unwrap();
    // the invitee only needs the invitation itself
    let b_client = WsRendezvous::from_invitation(&invitation).unwrap();
    assert_eq!(b_client.base(), client.base());
    b.join(&invitation).await.unwrap();

    let invitation = b.invite().await.unwrap();
    c.join(&invitation).await.unwrap();

    let nodes = [a, b, c];
    timeout(TEST_TIMEOUT, async {
        loop {
            let mut done = true;
            for node in &nodes {
                let network = node.network().await.unwrap();
                let conversations = node.conversations().await.unwrap();
                done &= network.len() == 2
                    && conversations.len() == 2
                    && conversations
                        .iter()
                        .all(|c| c.state == ConversationState::Established);
            }
            if done {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("mesh did not converge over the beacon");
}
