use tracing::warn;

use crate::{dao::storage::with_timeout, dto::health::HealthResponse, state::SharedState};

/// Report `ok` or `degraded`, pinging the store on the way so failures show up in the logs.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_cell_store().await {
        Ok(store) => {
            let limit = state.config().store_timeout;
            if let Err(err) = with_timeout("health_check", limit, store.health_check()).await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    if state.is_degraded() {
        HealthResponse::degraded()
    } else {
        HealthResponse::ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{config::AppConfig, dao::cell_store::memory::MemoryCellStore, state::AppState};

    #[tokio::test]
    async fn reports_degraded_until_store_installed() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, "degraded");

        state.install_cell_store(Arc::new(MemoryCellStore::new())).await;
        assert_eq!(health_status(&state).await.status, "ok");
    }
}
