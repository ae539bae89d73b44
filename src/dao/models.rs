use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Grid coordinate used as the identity of a cell.
pub type Coordinate = (i32, i32);

/// Committed color of a single grid cell, shared across persistence and service layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellEntity {
    /// Column of the cell.
    pub x: i32,
    /// Row of the cell.
    pub y: i32,
    /// Hex color (`#RRGGBB`).
    pub color: String,
    /// Time of the last accepted write for this coordinate.
    pub last_modified: SystemTime,
    /// Identity of the client that performed the last write, when known.
    pub writer_id: Option<String>,
}

impl CellEntity {
    /// Coordinate pair identifying this cell.
    pub fn coordinate(&self) -> Coordinate {
        (self.x, self.y)
    }
}

/// Durable record of a registered user, kept for display purposes only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEntity {
    /// Client-generated identity, stable across reconnects.
    pub user_id: String,
    /// Display name chosen by the user.
    pub nickname: String,
    /// Color picked by the user.
    pub color: String,
    /// Last time the user was seen acting.
    pub last_activity: SystemTime,
    /// Whether a live connection currently holds this identity.
    pub is_online: bool,
}
