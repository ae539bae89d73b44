use mongodb::bson::{DateTime, Document, doc, oid::ObjectId};
use serde::{Deserialize, Serialize};

use crate::dao::models::{CellEntity, UserEntity};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Stored form of one cell.
pub struct MongoPixelDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    x: i32,
    y: i32,
    color: String,
    last_modified: DateTime,
    #[serde(default)]
    writer_id: Option<String>,
}

impl From<MongoPixelDocument> for CellEntity {
    fn from(value: MongoPixelDocument) -> Self {
        Self {
            x: value.x,
            y: value.y,
            color: value.color,
            last_modified: value.last_modified.to_system_time(),
            writer_id: value.writer_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Stored form of a user record.
pub struct MongoUserDocument {
    user_id: String,
    nickname: String,
    color: String,
    last_activity: DateTime,
    is_online: bool,
}

impl From<UserEntity> for MongoUserDocument {
    fn from(value: UserEntity) -> Self {
        Self {
            user_id: value.user_id,
            nickname: value.nickname,
            color: value.color,
            last_activity: DateTime::from_system_time(value.last_activity),
            is_online: value.is_online,
        }
    }
}

/// Filter matching the document of `(x, y)`.
pub fn pixel_filter(x: i32, y: i32) -> Document {
    doc! { "x": x, "y": y }
}

/// Filter matching the record of `user_id`.
pub fn user_filter(user_id: &str) -> Document {
    doc! { "userId": user_id }
}
