//! WebSocket transport for observers (UIs, notifiers).
//!
//! Every event on the bus goes out to every connected observer as a JSON
//! text frame. Observers may answer pending questions:
//!
//! ```json
//! {"type": "user:answer", "questionId": "q1", "answer": "Blue"}
//! ```
//!
//! and get `{"type": "answer_ack", "questionId": "q1", "accepted": true}`
//! back. Only the first answer to a question is accepted.
//!
//! Each observer has a bounded event queue. One that stops reading long
//! enough to fill it is disconnected rather than buffered without limit.

use crate::Coordinator;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Undelivered events allowed per observer before it is disconnected.
pub const OBSERVER_QUEUE_CAPACITY: usize = 1024;

/// Frames observers send to the gateway.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum InboundFrame {
    #[serde(rename = "user:answer", rename_all = "camelCase")]
    UserAnswer { question_id: String, answer: String },
}

/// Frames the gateway sends besides forwarded events.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum ReplyFrame {
    AnswerAck { question_id: String, accepted: bool },
    Error { message: String },
}

fn handle_inbound(coordinator: &Coordinator, text: &str) -> ReplyFrame {
    match serde_json::from_str::<InboundFrame>(text) {
        Ok(InboundFrame::UserAnswer {
            question_id,
            answer,
        }) => {
            let accepted = coordinator.ask_user().answer_question(&question_id, answer);
            ReplyFrame::AnswerAck {
                question_id,
                accepted,
            }
        }
        Err(e) => ReplyFrame::Error {
            message: format!("unrecognized frame: {e}"),
        },
    }
}

/// Accept observer connections on `listener` until `cancel` fires.
pub async fn serve_observers(
    listener: TcpListener,
    coordinator: Coordinator,
    cancel: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "observer socket listening");
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("observer socket shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("Failed to accept observer connection")?;
                let coordinator = coordinator.clone();
                let child_cancel = cancel.child_token();
                tokio::spawn(async move {
                    if let Err(err) = handle_observer(stream, peer, coordinator, child_cancel).await {
                        warn!(%peer, error = %err, "observer connection error");
                    }
                });
            }
        }
    }

    Ok(())
}

async fn handle_observer(
    stream: TcpStream,
    peer: SocketAddr,
    coordinator: Coordinator,
    cancel: CancellationToken,
) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut writer, mut reader) = ws_stream.split();

    // Subscribed for exactly as long as the connection lives.
    let (subscription, mut events) = coordinator.bus().subscribe_bounded(OBSERVER_QUEUE_CAPACITY);
    info!(%peer, "observer connected");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = writer.send(Message::Close(None)).await;
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    warn!(%peer, "observer fell behind, disconnecting");
                    let _ = writer.send(Message::Close(None)).await;
                    break;
                };
                let frame = serde_json::to_string(&event).context("Failed to encode event")?;
                writer
                    .send(Message::Text(frame.into()))
                    .await
                    .context("Failed to forward event")?;
            }
            msg = reader.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_inbound(&coordinator, text.as_str());
                        let frame = serde_json::to_string(&reply).context("Failed to encode reply")?;
                        writer
                            .send(Message::Text(frame.into()))
                            .await
                            .context("Failed to send reply")?;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%peer, error = %e, "observer read failed");
                        break;
                    }
                }
            }
        }
    }

    subscription.unsubscribe();
    info!(%peer, "observer disconnected");
    Ok(())
}
