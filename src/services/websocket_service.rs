use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    dto::ws::OutboundMessage,
    error::ProtocolError,
    services::{connection_service, protocol_service},
    state::SharedState,
};

/// Handle the full lifecycle of one client WebSocket.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let mut writer_task: JoinHandle<()> = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let connection_id = connection_service::register_connection(&state, outbound_tx.clone());
    let mut writer_done = false;

    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            _ = &mut writer_task => {
                // Server side close (eviction or superseded connection).
                writer_done = true;
                break;
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                protocol_service::handle_frame(&state, connection_id, text.as_str()).await;
            }
            Some(Ok(Message::Ping(payload))) => {
                state.connections().touch(&connection_id);
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Some(Ok(Message::Pong(_))) => state.connections().touch(&connection_id),
            Some(Ok(Message::Binary(_))) => {
                let err = ProtocolError::MalformedPayload("binary frames are not supported".into());
                connection_service::send_to_connection(
                    &state,
                    connection_id,
                    &OutboundMessage::error(err.to_string(), err.code()),
                );
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!(connection = %connection_id, "client closed the socket");
                break;
            }
            Some(Err(err)) => {
                warn!(connection = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    connection_service::remove_connection(state.clone(), connection_id).await;
    info!(connection = %connection_id, "client disconnected");

    drop(outbound_tx);
    if !writer_done {
        let _ = writer_task.await;
    }
}
