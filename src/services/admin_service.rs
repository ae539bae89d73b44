//! Business logic behind the admin REST routes.

use tracing::{info, warn};

use crate::{
    dao::storage::with_timeout,
    dto::admin::ResetPixelsResponse,
    error::ServiceError,
    state::SharedState,
};

/// Delete every cell after checking `secret` against the configured admin secret.
///
/// A mismatch, or a deployment without a secret, fails with [`ServiceError::Unauthorized`]
/// before the store or the cache is touched. Connected clients are not notified; they pick
/// the empty grid up on their next snapshot.
pub async fn reset_pixels(
    state: &SharedState,
    secret: &str,
) -> Result<ResetPixelsResponse, ServiceError> {
    let Some(expected) = state.config().admin_secret.as_deref() else {
        warn!("reset requested but no admin secret is configured");
        return Err(ServiceError::Unauthorized(
            "reset is disabled on this deployment".into(),
        ));
    };
    if !secrets_match(expected, secret) {
        warn!("reset requested with an invalid admin secret");
        return Err(ServiceError::Unauthorized("invalid secret key".into()));
    }

    let store = state.require_cell_store().await?;
    let deleted_count = with_timeout("clear_all", state.config().store_timeout, store.clear_all()).await?;
    state.snapshot_cache().invalidate().await;

    info!(deleted_count, "canvas reset");
    Ok(ResetPixelsResponse {
        message: "All pixels have been reset".into(),
        deleted_count,
    })
}

/// Compare without short-circuiting on the first differing byte.
fn secrets_match(expected: &str, provided: &str) -> bool {
    let (expected, provided) = (expected.as_bytes(), provided.as_bytes());
    if expected.len() != provided.len() {
        return false;
    }
    expected
        .iter()
        .zip(provided)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
