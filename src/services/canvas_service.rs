//! The pixel write path and snapshot delivery.

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use validator::Validate;

use crate::{
    dao::{models::CellEntity, storage::with_timeout},
    dto::ws::{ErrorDto, PixelDto, PixelUpdateRequest, ServerMessage},
    error::ServiceError,
    services::broadcast::{self, ConnectionClosed, send_message_to_websocket},
    state::{ConnectionId, SharedState},
};

/// Commit a cell write requested by `connection_id` and fan it out to every connection.
///
/// Validation happens before anything is touched. On storage failure nothing is broadcast and
/// the snapshot cache is left as it was; the caller reports the error to the sender only.
pub async fn apply_update(
    state: &SharedState,
    connection_id: ConnectionId,
    request: PixelUpdateRequest,
) -> Result<CellEntity, ServiceError> {
    request.validate()?;
    let config = state.config();
    if !config.contains(request.x, request.y) {
        return Err(ServiceError::InvalidInput(format!(
            "pixel ({}, {}) is outside the {}x{} canvas",
            request.x, request.y, config.width, config.height
        )));
    }

    let PixelUpdateRequest {
        x,
        y,
        color,
        user_id,
    } = request;
    let color = color.to_ascii_uppercase();

    let writer_id = {
        let mut presence = state.presence().write().await;
        presence.touch(&connection_id);
        user_id.or_else(|| {
            presence
                .get(&connection_id)
                .map(|entry| entry.user_id.clone())
        })
    };

    let store = state.require_cell_store().await?;

    let _gate = state.commit_gates().lock((x, y)).await;
    let cell = with_timeout(
        "upsert",
        config.store_timeout,
        store.upsert(x, y, color, writer_id),
    )
    .await?;

    state.snapshot_cache().patch(cell.clone()).await;
    let delivered = broadcast::broadcast(
        state,
        &ServerMessage::PixelUpdated(PixelDto::from(cell.clone())),
    );
    debug!(%connection_id, x, y, color = %cell.color, delivered, "pixel committed");

    Ok(cell)
}

/// Current full grid, served from the snapshot cache.
pub async fn snapshot(state: &SharedState) -> Result<Vec<CellEntity>, ServiceError> {
    let store = state.require_cell_store().await?;
    let limit = state.config().store_timeout;
    let cells = state
        .snapshot_cache()
        .get_snapshot(|| with_timeout("load_all", limit, store.load_all()))
        .await?;
    Ok(cells)
}

/// Enqueue `initialPixels` for one connection, or `snapshotUnavailable` when the grid cannot be
/// produced. An empty list is only ever sent for an empty grid.
pub async fn send_snapshot(
    state: &SharedState,
    connection_id: ConnectionId,
    tx: &mpsc::UnboundedSender<Message>,
) -> Result<(), ConnectionClosed> {
    let store = match state.require_cell_store().await {
        Ok(store) => store,
        Err(err) => return report_snapshot_failure(connection_id, tx, err),
    };
    let limit = state.config().store_timeout;

    let delivered = state
        .snapshot_cache()
        .deliver_snapshot(
            || with_timeout("load_all", limit, store.load_all()),
            |cells| {
                let count = cells.len();
                let pixels = cells.iter().map(PixelDto::snapshot).collect();
                debug!(%connection_id, count, "sending initial pixels");
                send_message_to_websocket(tx, &ServerMessage::InitialPixels(pixels))
            },
        )
        .await;

    match delivered {
        Ok(sent) => sent,
        Err(err) => report_snapshot_failure(connection_id, tx, err.into()),
    }
}

fn report_snapshot_failure(
    connection_id: ConnectionId,
    tx: &mpsc::UnboundedSender<Message>,
    err: ServiceError,
) -> Result<(), ConnectionClosed> {
    warn!(%connection_id, error = %err, cause = ?err, "failed to load snapshot");
    send_message_to_websocket(
        tx,
        &ServerMessage::SnapshotUnavailable(ErrorDto {
            error: err.to_string(),
        }),
    )
}
