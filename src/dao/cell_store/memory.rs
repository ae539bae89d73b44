//! Process-local backend used for development and tests.

use std::{sync::Arc, time::SystemTime};

use dashmap::DashMap;
use futures::future::BoxFuture;

use crate::dao::{
    cell_store::CellStore,
    models::{CellEntity, Coordinate, UserEntity},
    storage::StorageResult,
};

/// In-memory cell store. Per-coordinate atomicity comes from the `DashMap` entry API.
#[derive(Clone, Default)]
pub struct MemoryCellStore {
    cells: Arc<DashMap<Coordinate, CellEntity>>,
    users: Arc<DashMap<String, UserEntity>>,
}

impl MemoryCellStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cells currently stored.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether no cell has been written yet.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Durable record of a user, if one was saved.
    pub fn user(&self, user_id: &str) -> Option<UserEntity> {
        self.users.get(user_id).map(|entry| entry.value().clone())
    }

    fn upsert_cell(&self, x: i32, y: i32, color: String, writer_id: Option<String>) -> CellEntity {
        let mut entry = self.cells.entry((x, y)).or_insert_with(|| CellEntity {
            x,
            y,
            color: color.clone(),
            last_modified: SystemTime::now(),
            writer_id: writer_id.clone(),
        });
        let cell = entry.value_mut();
        cell.color = color;
        cell.last_modified = SystemTime::now();
        cell.writer_id = writer_id;
        cell.clone()
    }

    /// Counts entries as they are removed, so a write racing the reset is either counted or
    /// survives it.
    fn clear_cells(&self) -> u64 {
        let mut removed = 0;
        self.cells.retain(|_, _| {
            removed += 1;
            false
        });
        removed
    }
}

impl CellStore for MemoryCellStore {
    fn upsert(
        &self,
        x: i32,
        y: i32,
        color: String,
        writer_id: Option<String>,
    ) -> BoxFuture<'static, StorageResult<CellEntity>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.upsert_cell(x, y, color, writer_id)) })
    }

    fn load_all(&self) -> BoxFuture<'static, StorageResult<Vec<CellEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .cells
                .iter()
                .map(|entry| entry.value().clone())
                .collect())
        })
    }

    fn clear_all(&self) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.clear_cells()) })
    }

    fn save_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.users.insert(user.user_id.clone(), user);
            Ok(())
        })
    }

    fn mark_user_offline(&self, user_id: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            if let Some(mut user) = store.users.get_mut(&user_id) {
                user.is_online = false;
                user.last_activity = SystemTime::now();
            }
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
