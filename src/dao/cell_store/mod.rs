/// In-process backend.
pub mod memory;
#[cfg(feature = "mongo-store")]
/// MongoDB backend.
pub mod mongodb;

use crate::dao::models::{CellEntity, UserEntity};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;

/// Abstraction over the authoritative persistence layer for cells and users.
///
/// Every write to a given coordinate is linearized by the backend itself: `upsert` must be an
/// atomic overwrite-or-insert keyed by `(x, y)`.
pub trait CellStore: Send + Sync {
    /// Overwrite the color at `(x, y)` or insert it, returning the committed record.
    fn upsert(
        &self,
        x: i32,
        y: i32,
        color: String,
        writer_id: Option<String>,
    ) -> BoxFuture<'static, StorageResult<CellEntity>>;
    /// Full scan of every stored cell.
    fn load_all(&self) -> BoxFuture<'static, StorageResult<Vec<CellEntity>>>;
    /// Delete every stored cell, returning the number of removed records.
    fn clear_all(&self) -> BoxFuture<'static, StorageResult<u64>>;
    /// Insert or replace the durable record of a user.
    fn save_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Flag a user as no longer online.
    fn mark_user_offline(&self, user_id: String) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
