//! Background disk reads for the volume cache
//!
//! Loads run on a dedicated tokio runtime as blocking tasks. Results come back
//! over a channel and are only ever consumed by the thread that owns the cache,
//! so no world state is touched off that thread.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;

use crate::core::PersistenceError;
use crate::streaming::disk_io::{ColumnData, CubeData, Storage};
use crate::world::{ColumnCoord, CubeCoord};

/// Result of one background load
#[derive(Debug)]
pub enum LoadResult {
    Column {
        coord: ColumnCoord,
        result: Result<Option<ColumnData>, PersistenceError>,
    },
    Cube {
        coord: CubeCoord,
        result: Result<Option<CubeData>, PersistenceError>,
    },
}

/// Run a storage call, turning a panic into an error so every queued load
/// still reports back.
fn catch_load<T>(load: impl FnOnce() -> Result<T, PersistenceError>) -> Result<T, PersistenceError> {
    panic::catch_unwind(AssertUnwindSafe(load)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(PersistenceError::Panicked(message))
    })
}

/// Runs storage reads off the owner thread, at most one in flight per coordinate.
pub struct AsyncLoadExecutor {
    storage: Arc<dyn Storage>,
    runtime: Runtime,
    result_tx: mpsc::UnboundedSender<LoadResult>,
    result_rx: mpsc::UnboundedReceiver<LoadResult>,
    pending_columns: HashSet<ColumnCoord>,
    pending_cubes: HashSet<CubeCoord>,
}

impl AsyncLoadExecutor {
    /// Create an executor with `io_threads` blocking workers
    pub fn new(storage: Arc<dyn Storage>, io_threads: usize) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(io_threads.max(1))
            .thread_name("cubeworld-io")
            .build()?;
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        Ok(Self {
            storage,
            runtime,
            result_tx,
            result_rx,
            pending_columns: HashSet::new(),
            pending_cubes: HashSet::new(),
        })
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Start loading a column. Returns `false` if that column is already in flight.
    pub fn queue_column_load(&mut self, coord: ColumnCoord) -> bool {
        if !self.pending_columns.insert(coord) {
            return false;
        }
        let storage = Arc::clone(&self.storage);
        let tx = self.result_tx.clone();
        self.runtime.spawn_blocking(move || {
            let result = catch_load(|| storage.load_column(coord));
            // Receiver only goes away with the executor itself
            let _ = tx.send(LoadResult::Column { coord, result });
        });
        true
    }

    /// Start loading a cube. Returns `false` if that cube is already in flight.
    pub fn queue_cube_load(&mut self, coord: CubeCoord) -> bool {
        if !self.pending_cubes.insert(coord) {
            return false;
        }
        let storage = Arc::clone(&self.storage);
        let tx = self.result_tx.clone();
        self.runtime.spawn_blocking(move || {
            let result = catch_load(|| storage.load_cube(coord));
            let _ = tx.send(LoadResult::Cube { coord, result });
        });
        true
    }

    pub fn is_column_pending(&self, coord: ColumnCoord) -> bool {
        self.pending_columns.contains(&coord)
    }

    pub fn is_cube_pending(&self, coord: CubeCoord) -> bool {
        self.pending_cubes.contains(&coord)
    }

    /// Whether any cube of the column has a load in flight
    pub fn has_pending_cubes_in(&self, column: ColumnCoord) -> bool {
        self.pending_cubes.iter().any(|c| c.column() == column)
    }

    pub fn pending_count(&self) -> usize {
        self.pending_columns.len() + self.pending_cubes.len()
    }

    fn complete(&mut self, result: &LoadResult) {
        match result {
            LoadResult::Column { coord, .. } => {
                self.pending_columns.remove(coord);
            }
            LoadResult::Cube { coord, .. } => {
                self.pending_cubes.remove(coord);
            }
        }
    }

    /// Collect finished loads without blocking
    pub fn poll(&mut self) -> Vec<LoadResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_rx.try_recv() {
            self.complete(&result);
            results.push(result);
        }
        results
    }

    /// Block until the next load finishes. `None` if nothing is in flight.
    ///
    /// Must not be called from inside an async context.
    pub fn wait_next(&mut self) -> Option<LoadResult> {
        if self.pending_count() == 0 {
            return None;
        }
        let result = self.result_rx.blocking_recv()?;
        self.complete(&result);
        Some(result)
    }
}
