//! DTO definitions used by the admin REST API and documentation layer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Request to wipe every stored pixel.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPixelsRequest {
    /// Shared administrative secret. Checked by the service so a blank value is an
    /// authorization failure like any other mismatch.
    pub secret_key: String,
}

/// Outcome of a successful reset.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetPixelsResponse {
    /// Human-readable outcome.
    pub message: String,
    /// Number of pixels removed from the store.
    pub deleted_count: u64,
}
