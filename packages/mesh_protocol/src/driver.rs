//! Conversation driver: one task per live channel.
//!
//! Reads the channel one message at a time, hands each to the node actor and
//! carries out the verdict (introductions, accepting a join) before reading
//! the next one. The end of the inbound stream is the disconnect signal.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::oneshot;
use tracing::debug;

use crate::conversation::ConversationId;
use crate::error::MeshError;
use crate::message::Frame;
use crate::node::{Node, Verdict};
use crate::transport::ControlChannel;

/// Start driving `channel` as Conversation `conversation`.
///
/// Boxed so drivers can spawn further drivers (a `join` accepted here starts
/// a new Conversation).
pub(crate) fn spawn(node: Node, conversation: ConversationId, channel: ControlChannel) {
    let task: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(run(node, conversation, channel));
    tokio::spawn(task);
}

async fn run(node: Node, conversation: ConversationId, channel: ControlChannel) {
    let (outbound, mut inbound) = channel.into_parts();
    let (shutdown_tx, mut shutdown) = oneshot::channel::<()>();

    if !node
        .channel_open(conversation, outbound.clone(), shutdown_tx)
        .await
    {
        debug!(peer = %node.id(), %conversation, "conversation gone before its channel opened");
        return;
    }

    let limit = node.config().handshake_timeout;
    let mut greeted = false;

    loop {
        let next = if greeted {
            tokio::select! {
                _ = &mut shutdown => break,
                next = inbound.recv() => next,
            }
        } else {
            tokio::select! {
                _ = &mut shutdown => break,
                next = tokio::time::timeout(limit, inbound.recv()) => match next {
                    Ok(next) => next,
                    Err(_) => {
                        let error = MeshError::HandshakeTimeout { secs: limit.as_secs() };
                        node.close(conversation, Some(error)).await;
                        break;
                    }
                },
            }
        };

        let Some(raw) = next else {
            debug!(peer = %node.id(), %conversation, "transport disconnected");
            node.close(conversation, None).await;
            break;
        };

        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                node.close(conversation, Some(e)).await;
                break;
            }
        };

        match node.inbound(conversation, frame).await {
            Verdict::Continue => {}
            Verdict::Introduce(targets) => {
                for target in targets {
                    node.introduce(conversation, &outbound, target).await;
                }
            }
            Verdict::Accept(invitation) => {
                node.accept_introduction(conversation, invitation).await;
            }
            Verdict::Close => break,
        }
        // a non-closing verdict on the first message means the hello was accepted
        greeted = true;
    }
    // dropping both halves closes the channel for the remote end
}
