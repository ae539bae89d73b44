use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Admin REST payloads.
pub mod admin;
/// Health check payload.
pub mod health;
/// Custom field validators.
pub mod validation;
/// Realtime protocol events.
pub mod ws;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
