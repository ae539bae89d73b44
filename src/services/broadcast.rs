//! Fan-out of server events to live WebSocket connections.
//!
//! Every send is a non-blocking enqueue onto the connection's writer channel; a slow or dead
//! peer never holds up the others.

use axum::extract::ws::Message;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    dto::ws::ServerMessage,
    state::SharedState,
};

/// The writer side of a connection is gone.
#[derive(Debug, Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

/// Serialize a server event once into a text frame.
///
/// Returns `None` on serialization failure, which is a bug rather than a transient condition;
/// it is logged and the event is dropped.
pub fn encode(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(payload) => Some(Message::Text(payload.into())),
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{message:?}` (permanent error, not retrying)");
            None
        }
    }
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Serialization failures are logged and reported as success since retrying cannot help.
pub fn send_message_to_websocket(
    tx: &mpsc::UnboundedSender<Message>,
    message: &ServerMessage,
) -> Result<(), ConnectionClosed> {
    let Some(frame) = encode(message) else {
        return Ok(());
    };
    tx.send(frame).map_err(|_| ConnectionClosed)
}

/// Deliver an event to every live connection. Returns the number of connections reached.
pub fn broadcast(state: &SharedState, message: &ServerMessage) -> usize {
    let Some(frame) = encode(message) else {
        return 0;
    };

    let mut delivered = 0;
    for connection in state.connections().iter() {
        if connection.tx.send(frame.clone()).is_ok() {
            delivered += 1;
        } else {
            // The connection task removes itself once its socket loop ends.
            debug!(connection_id = %connection.id, "skipping closed connection during broadcast");
        }
    }
    delivered
}
