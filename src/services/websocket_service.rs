use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientMessage, ErrorDto, PixelUpdateErrorDto, ServerMessage},
    error::ServiceError,
    services::{
        broadcast::{ConnectionClosed, send_message_to_websocket},
        canvas_service, presence_service,
    },
    state::{ClientConnection, ConnectionId, SharedState},
};

/// Failure while handling one inbound event.
#[derive(Debug, Error)]
enum SessionError {
    /// Writer channel closed; the session must end.
    #[error("connection closed")]
    ConnectionClosed(#[from] ConnectionClosed),
    /// The event was rejected; the sender has been told why.
    #[error("event rejected: {0}")]
    Rejected(#[from] ServiceError),
}

/// Handle the full lifecycle of one canvas WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let connection_id: ConnectionId = Uuid::new_v4();
    // Registered before the snapshot goes out so no committed write falls between the two.
    state.connections().insert(
        connection_id,
        ClientConnection {
            id: connection_id,
            tx: outbound_tx.clone(),
        },
    );
    info!(%connection_id, "canvas client connected");

    if send_initial_state(&state, connection_id, &outbound_tx)
        .await
        .is_err()
    {
        info!(%connection_id, "connection closed during initial sync, terminating");
        cleanup(&state, connection_id).await;
        finalize(writer_task, outbound_tx).await;
        return;
    }

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(%connection_id, payload = %text, "received client message");

                let result = match ClientMessage::from_json_str(&text) {
                    Ok(event) => handle_event(&state, connection_id, &outbound_tx, event).await,
                    Err(err) => {
                        warn!(%connection_id, error = %err, "failed to parse client message");
                        send_message_to_websocket(
                            &outbound_tx,
                            &ServerMessage::ProtocolError(ErrorDto {
                                error: "malformed event".into(),
                            }),
                        )
                        .map_err(SessionError::from)
                    }
                };

                if let Err(SessionError::ConnectionClosed(_)) = result {
                    info!(%connection_id, "connection closed while handling event, terminating");
                    break;
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(%connection_id, "canvas client closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {
                let _ = send_message_to_websocket(
                    &outbound_tx,
                    &ServerMessage::ProtocolError(ErrorDto {
                        error: "binary frames are not supported".into(),
                    }),
                );
            }
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    cleanup(&state, connection_id).await;
    info!(%connection_id, "canvas client disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Snapshot first, then the presence list.
async fn send_initial_state(
    state: &SharedState,
    connection_id: ConnectionId,
    tx: &mpsc::UnboundedSender<Message>,
) -> Result<(), ConnectionClosed> {
    canvas_service::send_snapshot(state, connection_id, tx).await?;
    presence_service::send_users_list(state, tx).await
}

async fn handle_event(
    state: &SharedState,
    connection_id: ConnectionId,
    tx: &mpsc::UnboundedSender<Message>,
    event: ClientMessage,
) -> Result<(), SessionError> {
    match event {
        ClientMessage::RegisterUser(request) => {
            match presence_service::register_user(state, connection_id, request).await {
                Ok(_) => Ok(()),
                Err(err) => {
                    warn!(%connection_id, error = %err, "registration rejected");
                    send_message_to_websocket(
                        tx,
                        &ServerMessage::RegisterUserError(ErrorDto {
                            error: err.to_string(),
                        }),
                    )?;
                    Err(err.into())
                }
            }
        }
        ClientMessage::UpdatePixel(request) => {
            let (x, y) = (request.x, request.y);
            match canvas_service::apply_update(state, connection_id, request).await {
                Ok(_) => Ok(()),
                Err(err) => {
                    warn!(%connection_id, x, y, error = %err, cause = ?err, "pixel update rejected");
                    send_message_to_websocket(
                        tx,
                        &ServerMessage::PixelUpdateError(PixelUpdateErrorDto {
                            x,
                            y,
                            error: err.to_string(),
                        }),
                    )?;
                    Err(err.into())
                }
            }
        }
        ClientMessage::RequestSnapshot => {
            canvas_service::send_snapshot(state, connection_id, tx).await?;
            Ok(())
        }
    }
}

/// Drop every trace of the connection from shared state.
async fn cleanup(state: &SharedState, connection_id: ConnectionId) {
    state.connections().remove(&connection_id);
    presence_service::disconnect(state, &connection_id).await;
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
