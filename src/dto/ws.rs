use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dao::models::CellEntity,
    dto::{
        format_system_time,
        validation::{validate_hex_color, validate_nickname},
    },
    state::PresenceEntry,
};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
/// Events accepted from canvas clients, framed as `{"event": ..., "data": ...}`.
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Establish (or replace) the presence of this connection.
    RegisterUser(RegisterUserRequest),
    /// Request a cell write.
    UpdatePixel(PixelUpdateRequest),
    /// Ask for a fresh `initialPixels` payload.
    RequestSnapshot,
}

impl ClientMessage {
    /// Decode one inbound text frame.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
/// Events pushed to canvas clients, framed as `{"event": ..., "data": ...}`.
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Full grid, sent once on connect and on explicit request.
    InitialPixels(Vec<PixelDto>),
    /// Every registered user, in registration order.
    UsersList(Vec<UserDto>),
    /// A committed write.
    PixelUpdated(PixelDto),
    /// A write from this connection that was not committed.
    PixelUpdateError(PixelUpdateErrorDto),
    /// A registration from this connection that was rejected.
    RegisterUserError(ErrorDto),
    /// The snapshot could not be produced; the client should retry with `requestSnapshot`.
    SnapshotUnavailable(ErrorDto),
    /// A frame from this connection could not be decoded.
    ProtocolError(ErrorDto),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
/// Presence registration payload.
pub struct RegisterUserRequest {
    /// Client-generated identity, stable across reconnects.
    #[validate(length(min = 1, max = 64))]
    pub id: String,
    /// Display name, 2 to 15 characters once trimmed.
    #[validate(custom(function = validate_nickname))]
    pub nickname: String,
    /// `#RRGGBB` color, either case.
    #[validate(custom(function = validate_hex_color))]
    pub color: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
/// Cell write request.
pub struct PixelUpdateRequest {
    /// Column, from 0.
    #[validate(range(min = 0))]
    pub x: i32,
    /// Row, from 0.
    #[validate(range(min = 0))]
    pub y: i32,
    /// `#RRGGBB` color, either case.
    #[validate(custom(function = validate_hex_color))]
    pub color: String,
    /// Writer identity; defaults to the registered user of the connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 64))]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Committed color of a cell as seen by clients.
pub struct PixelDto {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
    /// Uppercase `#RRGGBB` color.
    pub color: String,
    /// Writer of the update; absent from snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl PixelDto {
    /// Snapshot form: coordinates and color only.
    pub fn snapshot(cell: &CellEntity) -> Self {
        Self {
            x: cell.x,
            y: cell.y,
            color: cell.color.clone(),
            user_id: None,
        }
    }
}

impl From<CellEntity> for PixelDto {
    fn from(cell: CellEntity) -> Self {
        Self {
            x: cell.x,
            y: cell.y,
            color: cell.color,
            user_id: cell.writer_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Public view of a presence entry.
pub struct UserDto {
    /// Client-generated identity.
    pub id: String,
    /// Display name.
    pub nickname: String,
    /// Chosen color.
    pub color: String,
    /// RFC 3339 timestamp of the last accepted action.
    pub last_activity: String,
}

impl From<PresenceEntry> for UserDto {
    fn from(entry: PresenceEntry) -> Self {
        Self {
            id: entry.user_id,
            nickname: entry.nickname,
            color: entry.color,
            last_activity: format_system_time(entry.last_activity),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
/// Failure report for a single cell write.
pub struct PixelUpdateErrorDto {
    /// Column of the rejected write.
    pub x: i32,
    /// Row of the rejected write.
    pub y: i32,
    /// Reason, safe to show to the user.
    pub error: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
/// Generic failure report sent to a single connection.
pub struct ErrorDto {
    /// Reason, safe to show to the user.
    pub error: String,
}
