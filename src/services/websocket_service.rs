use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientMessage, ServerMessage},
    services::dispatcher::Command,
    state::SharedState,
};

/// Handle the full lifecycle of one room client connection.
///
/// Frames are parsed here and forwarded to the room engine; everything the engine sends back
/// goes through the connection's outbox and a dedicated writer task.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut events) = mpsc::unbounded_channel::<ServerMessage>();
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                Some(control) = control_rx.recv() => control,
                Some(event) = events.recv() => match encode(&event) {
                    Some(message) => message,
                    None => continue,
                },
                else => break,
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    if state
        .send(Command::Connect {
            connection_id,
            outbox,
        })
        .is_err()
    {
        warn!(connection_id = %connection_id, "room engine unavailable, closing connection");
        let _ = control_tx.send(Message::Close(None));
        finalize(writer_task, control_tx).await;
        return;
    }
    info!(connection_id = %connection_id, "client connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientMessage::from_json_str(&text) {
                Ok(message) => {
                    debug!(connection_id = %connection_id, kind = message.kind(), "received client message");
                    if state
                        .send(Command::Inbound {
                            connection_id,
                            message,
                        })
                        .is_err()
                    {
                        warn!(connection_id = %connection_id, "room engine stopped, closing connection");
                        break;
                    }
                }
                Err(err) => {
                    warn!(connection_id = %connection_id, error = %err, "failed to parse client message");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = control_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(connection_id = %connection_id, "client closed");
                let _ = control_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    let _ = state.send(Command::Disconnect { connection_id });
    info!(connection_id = %connection_id, "client disconnected");

    finalize(writer_task, control_tx).await;
}

/// Serialize an event into a text frame. Serialization failures are logged and skipped.
fn encode(event: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(Message::Text(payload.into())),
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{event:?}`");
            None
        }
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
///
/// The event outbox is owned by the engine and closes once the disconnect is processed.
async fn finalize(writer_task: JoinHandle<()>, control_tx: mpsc::UnboundedSender<Message>) {
    drop(control_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_encoded_as_text_frames() {
        let Some(Message::Text(text)) = encode(&ServerMessage::TimerReset) else {
            panic!("expected a text frame");
        };
        assert_eq!(text.as_str(), r#"{"type":"timerReset"}"#);
    }
}
