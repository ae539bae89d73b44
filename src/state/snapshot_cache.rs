use std::{
    future::Future,
    time::{Duration, Instant},
};

use indexmap::IndexMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::dao::{
    models::{CellEntity, Coordinate},
    storage::StorageResult,
};

struct CachedSnapshot {
    cells: IndexMap<Coordinate, CellEntity>,
    cached_at: Instant,
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<CachedSnapshot>,
    /// Loads currently running outside the lock.
    refreshes: usize,
    /// Patches applied while a load was running; merged on top of its result.
    pending: IndexMap<Coordinate, CellEntity>,
    /// Bumped by `invalidate`; a load started under an older epoch is served but not kept.
    epoch: u64,
}

/// Read-through, write-through cache of the full grid served to joining connections.
///
/// Store loads run without holding the lock, so committed writes keep flowing while a refresh
/// is slow. Patches that land during a load are recorded and replayed on top of its result,
/// so a refresh never resurrects an overwritten color.
pub struct SnapshotCache {
    ttl: Duration,
    inner: Mutex<CacheState>,
}

impl SnapshotCache {
    /// Empty cache whose entries stay fresh for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(CacheState::default()),
        }
    }

    /// Return the cached grid while younger than the TTL, otherwise run `load` and cache its
    /// result. Load errors propagate and leave the previous entry untouched.
    pub async fn get_snapshot<F, Fut>(&self, load: F) -> StorageResult<Vec<CellEntity>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<Vec<CellEntity>>>,
    {
        self.deliver_snapshot(load, |cells| cells).await
    }

    /// Same as [`SnapshotCache::get_snapshot`], but hands the grid to `deliver` while the cache
    /// lock is held.
    ///
    /// Patches take the same lock before their broadcast goes out, so a snapshot enqueued from
    /// `deliver` is ordered consistently with the broadcasts a connection receives: any write
    /// missing from the snapshot is broadcast after it.
    pub async fn deliver_snapshot<F, Fut, D, R>(&self, load: F, deliver: D) -> StorageResult<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<Vec<CellEntity>>>,
        D: FnOnce(Vec<CellEntity>) -> R,
    {
        let epoch = {
            let mut state = self.inner.lock().await;
            if let Some(cached) = state.snapshot.as_ref() {
                if cached.cached_at.elapsed() < self.ttl {
                    return Ok(deliver(cached.cells.values().cloned().collect()));
                }
            }
            state.refreshes += 1;
            state.epoch
        };

        let loaded = load().await;

        let mut state = self.inner.lock().await;
        state.refreshes -= 1;
        let mut cells: IndexMap<Coordinate, CellEntity> = match loaded {
            Ok(loaded) => loaded.into_iter().map(|cell| (cell.coordinate(), cell)).collect(),
            Err(err) => {
                if state.refreshes == 0 {
                    state.pending.clear();
                }
                return Err(err);
            }
        };
        for (coordinate, cell) in &state.pending {
            cells.insert(*coordinate, cell.clone());
        }
        if state.refreshes == 0 {
            state.pending.clear();
        }
        debug!(count = cells.len(), "snapshot cache refreshed");

        let snapshot = cells.values().cloned().collect();
        if state.epoch == epoch {
            state.snapshot = Some(CachedSnapshot {
                cells,
                cached_at: Instant::now(),
            });
        }
        Ok(deliver(snapshot))
    }

    /// Apply a committed write to the cached grid, replacing the cell at the same coordinate or
    /// appending it. A cold cache stays cold: the next refresh reads the write from the store.
    pub async fn patch(&self, cell: CellEntity) {
        let mut state = self.inner.lock().await;
        if state.refreshes > 0 {
            state.pending.insert(cell.coordinate(), cell.clone());
        }
        if let Some(cached) = state.snapshot.as_mut() {
            cached.cells.insert(cell.coordinate(), cell);
        }
    }

    /// Drop the cached grid so the next read goes to the store.
    pub async fn invalidate(&self) {
        let mut state = self.inner.lock().await;
        state.snapshot = None;
        state.pending.clear();
        state.epoch += 1;
    }
}
