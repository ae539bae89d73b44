use axum::{Json, Router, extract::State, routing::post};
use axum_valid::Valid;

use crate::{
    dto::admin::{ResetPixelsRequest, ResetPixelsResponse},
    error::AppError,
    services::admin_service,
    state::SharedState,
};

/// Administrative endpoints guarded by the shared admin secret.
pub fn router() -> Router<SharedState> {
    Router::new().route("/api/reset-pixels", post(reset_pixels))
}

/// Delete every pixel of the canvas.
#[utoipa::path(
    post,
    path = "/api/reset-pixels",
    tag = "admin",
    request_body = ResetPixelsRequest,
    responses(
        (status = 200, description = "Canvas cleared", body = ResetPixelsResponse),
        (status = 400, description = "Malformed request"),
        (status = 401, description = "Invalid secret key"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn reset_pixels(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ResetPixelsRequest>>,
) -> Result<Json<ResetPixelsResponse>, AppError> {
    let response = admin_service::reset_pixels(&state, &payload.secret_key).await?;
    Ok(Json(response))
}
