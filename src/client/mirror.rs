//! Per-client replica of the grid with optimistic local writes.
//!
//! Each cell the client touched is either `Confirmed` (a color the server committed) or
//! `Hinted` (a local guess waiting for the server). A committed broadcast always replaces the
//! hint, whatever its color; a rejection or a lost connection reverts the hint to the last
//! confirmed color.

use std::collections::HashMap;

use crate::{
    dao::models::Coordinate,
    dto::ws::{PixelDto, PixelUpdateRequest},
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum CellState {
    Confirmed(String),
    Hinted {
        color: String,
        /// Last confirmed color, `None` for a cell never painted.
        previous: Option<String>,
    },
}

impl CellState {
    fn visible(&self) -> &str {
        match self {
            CellState::Confirmed(color) => color,
            CellState::Hinted { color, .. } => color,
        }
    }

    fn confirmed(&self) -> Option<&str> {
        match self {
            CellState::Confirmed(color) => Some(color),
            CellState::Hinted { previous, .. } => previous.as_deref(),
        }
    }
}

/// Change to the visible grid, for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorEvent {
    /// The whole grid was replaced by a server snapshot.
    SnapshotApplied {
        /// Number of painted cells in the snapshot.
        cells: usize,
    },
    /// A local guess is now visible.
    Hinted {
        /// Column.
        x: i32,
        /// Row.
        y: i32,
        /// Guessed color.
        color: String,
    },
    /// The server committed a color, from this client or another one.
    Committed(PixelDto),
    /// A local guess was withdrawn; `color` is what the cell shows again (`None` if unpainted).
    Reverted {
        /// Column.
        x: i32,
        /// Row.
        y: i32,
        /// Color shown again.
        color: Option<String>,
    },
}

/// In-memory replica of the canvas as seen by one client.
#[derive(Debug, Default)]
pub struct ClientMirror {
    cells: HashMap<Coordinate, CellState>,
}

impl ClientMirror {
    /// Empty mirror; nothing is known until the first snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole grid with a server snapshot. Pending hints are dropped: the snapshot
    /// is authoritative and any still-pending write will arrive as a broadcast.
    pub fn apply_snapshot(&mut self, pixels: Vec<PixelDto>) -> MirrorEvent {
        self.cells = pixels
            .into_iter()
            .map(|pixel| ((pixel.x, pixel.y), CellState::Confirmed(pixel.color)))
            .collect();
        MirrorEvent::SnapshotApplied {
            cells: self.cells.len(),
        }
    }

    /// Show `color` at `(x, y)` immediately and build the request to send to the server.
    pub fn submit(
        &mut self,
        x: i32,
        y: i32,
        color: &str,
        user_id: Option<String>,
    ) -> (PixelUpdateRequest, MirrorEvent) {
        let color = color.to_ascii_uppercase();
        let previous = self
            .cells
            .get(&(x, y))
            .and_then(|state| state.confirmed().map(str::to_string));
        self.cells.insert(
            (x, y),
            CellState::Hinted {
                color: color.clone(),
                previous,
            },
        );

        let request = PixelUpdateRequest {
            x,
            y,
            color: color.clone(),
            user_id,
        };
        (request, MirrorEvent::Hinted { x, y, color })
    }

    /// Apply a committed broadcast. Returns `None` when it changes nothing, which is the case
    /// for a duplicate of an already confirmed color.
    pub fn apply_committed(&mut self, pixel: PixelDto) -> Option<MirrorEvent> {
        let next = CellState::Confirmed(pixel.color.clone());
        if self.cells.get(&(pixel.x, pixel.y)) == Some(&next) {
            return None;
        }
        self.cells.insert((pixel.x, pixel.y), next);
        Some(MirrorEvent::Committed(pixel))
    }

    /// Withdraw the local guess at `(x, y)` after the server refused it. A cell that a
    /// broadcast confirmed in the meantime is left alone.
    pub fn apply_rejection(&mut self, x: i32, y: i32) -> Option<MirrorEvent> {
        match self.cells.get(&(x, y)) {
            Some(CellState::Hinted { .. }) => Some(self.revert((x, y))),
            _ => None,
        }
    }

    /// Revert every pending guess: the connection is gone and their outcome is unknown. Confirmed
    /// cells stay as they are until the next snapshot.
    pub fn mark_disconnected(&mut self) -> Vec<MirrorEvent> {
        let hinted: Vec<Coordinate> = self
            .cells
            .iter()
            .filter(|(_, state)| matches!(state, CellState::Hinted { .. }))
            .map(|(coordinate, _)| *coordinate)
            .collect();
        hinted
            .into_iter()
            .map(|coordinate| self.revert(coordinate))
            .collect()
    }

    fn revert(&mut self, coordinate: Coordinate) -> MirrorEvent {
        let previous = self
            .cells
            .remove(&coordinate)
            .and_then(|state| state.confirmed().map(str::to_string));
        if let Some(color) = previous.as_ref() {
            self.cells
                .insert(coordinate, CellState::Confirmed(color.clone()));
        }
        MirrorEvent::Reverted {
            x: coordinate.0,
            y: coordinate.1,
            color: previous,
        }
    }

    /// Visible color of every painted cell, hints included.
    pub fn current_grid(&self) -> HashMap<Coordinate, String> {
        self.cells
            .iter()
            .map(|(coordinate, state)| (*coordinate, state.visible().to_string()))
            .collect()
    }

    /// Color currently shown at `(x, y)`, hinted or confirmed.
    pub fn color_at(&self, x: i32, y: i32) -> Option<&str> {
        self.cells.get(&(x, y)).map(CellState::visible)
    }

    /// Whether `(x, y)` shows a guess not yet confirmed by the server.
    pub fn is_pending(&self, x: i32, y: i32) -> bool {
        matches!(self.cells.get(&(x, y)), Some(CellState::Hinted { .. }))
    }
}
