//! Column and cube serialization and disk I/O

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rayon::prelude::*;
use rkyv::{Archive, Deserialize, Serialize};

use crate::core::PersistenceError;
use crate::world::{
    Column, ColumnCoord, Cube, CubeCoord, GenerationStage, TicketSet, BIOME_CELLS, CUBE_VOLUME,
};

/// Serializable column data
#[derive(Archive, Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ColumnData {
    pub x: i32,
    pub z: i32,
    pub biomes: Vec<u8>,
    pub last_save_time: u64,
}

impl ColumnData {
    pub fn coord(&self) -> ColumnCoord {
        ColumnCoord::new(self.x, self.z)
    }

    pub fn from_column(column: &Column) -> Self {
        Self {
            x: column.coord.x,
            z: column.coord.z,
            biomes: column.biomes.clone(),
            last_save_time: column.last_save_time,
        }
    }

    /// Rebuild a column with no cubes attached. Freshly loaded columns are clean.
    pub fn into_column(self) -> Result<Column, PersistenceError> {
        if self.biomes.len() != BIOME_CELLS {
            return Err(PersistenceError::Decode(format!(
                "column {}, {} has {} biome cells, expected {}",
                self.x,
                self.z,
                self.biomes.len(),
                BIOME_CELLS
            )));
        }
        let mut column = Column::new(ColumnCoord::new(self.x, self.z));
        column.biomes = self.biomes;
        column.last_save_time = self.last_save_time;
        column.dirty = false;
        Ok(column)
    }
}

/// Serializable cube data
#[derive(Archive, Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct CubeData {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub blocks: Vec<u16>,
    pub sky_light: Vec<u8>,
    /// [`GenerationStage::index`]
    pub stage: u8,
    pub populated: bool,
    pub fully_populated: bool,
    pub skylight_seeded: bool,
    pub initial_lighting_done: bool,
}

impl CubeData {
    pub fn coord(&self) -> CubeCoord {
        CubeCoord::new(self.x, self.y, self.z)
    }

    pub fn from_cube(cube: &Cube) -> Self {
        Self {
            x: cube.coord.x,
            y: cube.coord.y,
            z: cube.coord.z,
            blocks: cube.blocks.clone(),
            sky_light: cube.sky_light.clone(),
            stage: cube.stage.index() as u8,
            populated: cube.populated,
            fully_populated: cube.fully_populated,
            skylight_seeded: cube.skylight_seeded,
            initial_lighting_done: cube.initial_lighting_done,
        }
    }

    /// Rebuild a cube. Tickets are never persisted, so the cube starts unpinned.
    pub fn into_cube(self) -> Result<Cube, PersistenceError> {
        let coord = self.coord();
        if self.blocks.len() != CUBE_VOLUME || self.sky_light.len() != CUBE_VOLUME {
            return Err(PersistenceError::Decode(format!("cube {:?} has a truncated payload", coord)));
        }
        let stage = GenerationStage::from_index(self.stage as usize)
            .ok_or_else(|| PersistenceError::Decode(format!("cube {:?} has unknown stage {}", coord, self.stage)))?;

        Ok(Cube {
            coord,
            blocks: self.blocks,
            sky_light: self.sky_light,
            stage,
            populated: self.populated,
            fully_populated: self.fully_populated,
            skylight_seeded: self.skylight_seeded,
            initial_lighting_done: self.initial_lighting_done,
            dirty: false,
            tickets: TicketSet::new(coord),
        })
    }
}

/// Blocking persistence backend.
///
/// Called directly on the owner thread for synchronous requests and from the
/// I/O worker threads for asynchronous ones.
pub trait Storage: Send + Sync {
    fn load_column(&self, coord: ColumnCoord) -> Result<Option<ColumnData>, PersistenceError>;

    fn load_cube(&self, coord: CubeCoord) -> Result<Option<CubeData>, PersistenceError>;

    fn save_column(&self, data: ColumnData) -> Result<(), PersistenceError>;

    fn save_cube(&self, data: CubeData) -> Result<(), PersistenceError>;

    /// Block until every buffered write has reached the backend
    fn flush(&self) -> Result<(), PersistenceError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// --- Record encoding ---

/// Serialize and LZ4-compress a column record
pub fn compress_column(data: &ColumnData) -> Result<Vec<u8>, PersistenceError> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(data).map_err(|e| PersistenceError::Encode(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

/// Decompress and deserialize a column record
pub fn decompress_column(data: &[u8]) -> Result<ColumnData, PersistenceError> {
    let bytes = decompress(data)?;
    rkyv::from_bytes::<ColumnData, rkyv::rancor::Error>(&bytes).map_err(|e| PersistenceError::Decode(e.to_string()))
}

/// Serialize and LZ4-compress a cube record
pub fn compress_cube(data: &CubeData) -> Result<Vec<u8>, PersistenceError> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(data).map_err(|e| PersistenceError::Encode(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

/// Decompress and deserialize a cube record
pub fn decompress_cube(data: &[u8]) -> Result<CubeData, PersistenceError> {
    let bytes = decompress(data)?;
    rkyv::from_bytes::<CubeData, rkyv::rancor::Error>(&bytes).map_err(|e| PersistenceError::Decode(e.to_string()))
}

/// Decompress into an aligned buffer, as rkyv validation requires
fn decompress(data: &[u8]) -> Result<rkyv::util::AlignedVec, PersistenceError> {
    let raw = lz4_flex::decompress_size_prepended(data).map_err(|e| PersistenceError::Compression(e.to_string()))?;
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(raw.len());
    aligned.extend_from_slice(&raw);
    Ok(aligned)
}

/// File path for a column record: `base_dir/columns/column_{x}_{z}.rkc`
pub fn column_path(base_dir: &Path, coord: ColumnCoord) -> PathBuf {
    base_dir
        .join("columns")
        .join(format!("column_{}_{}.rkc", coord.x, coord.z))
}

/// File path for a cube record. Cubes are grouped by Y to keep directories small:
/// `base_dir/cubes/y_{y}/cube_{x}_{y}_{z}.rkc`
pub fn cube_path(base_dir: &Path, coord: CubeCoord) -> PathBuf {
    base_dir
        .join("cubes")
        .join(format!("y_{}", coord.y))
        .join(format!("cube_{}_{}_{}.rkc", coord.x, coord.y, coord.z))
}

fn read_file(path: &Path) -> Result<Option<Vec<u8>>, PersistenceError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write through a sibling temp file and rename it into place, so readers
/// see either the old record or the new one, never a partial file.
fn write_file(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let io_err = |source: std::io::Error| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension("rkc.tmp");
    std::fs::write(&tmp, bytes).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

/// One compressed file per column and per cube under a base directory.
///
/// Saves are compressed immediately but only written out on [`flush`](Storage::flush);
/// loads see buffered records before they reach disk. A record leaves the
/// buffer only after its file has been written.
pub struct FileStorage {
    base_dir: PathBuf,
    pending_writes: Mutex<HashMap<PathBuf, Arc<[u8]>>>,
}

impl FileStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            pending_writes: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Number of records waiting for the next flush
    pub fn pending_write_count(&self) -> usize {
        lock(&self.pending_writes).len()
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, PersistenceError> {
        if let Some(bytes) = lock(&self.pending_writes).get(path) {
            return Ok(Some(bytes.to_vec()));
        }
        read_file(path)
    }
}

impl Storage for FileStorage {
    fn load_column(&self, coord: ColumnCoord) -> Result<Option<ColumnData>, PersistenceError> {
        let Some(bytes) = self.read(&column_path(&self.base_dir, coord))? else {
            return Ok(None);
        };
        let data = decompress_column(&bytes)?;
        if data.coord() != coord {
            return Err(PersistenceError::CoordinateMismatch {
                expected: coord.cube(0),
                found: data.coord().cube(0),
            });
        }
        Ok(Some(data))
    }

    fn load_cube(&self, coord: CubeCoord) -> Result<Option<CubeData>, PersistenceError> {
        let Some(bytes) = self.read(&cube_path(&self.base_dir, coord))? else {
            return Ok(None);
        };
        let data = decompress_cube(&bytes)?;
        if data.coord() != coord {
            return Err(PersistenceError::CoordinateMismatch {
                expected: coord,
                found: data.coord(),
            });
        }
        Ok(Some(data))
    }

    fn save_column(&self, data: ColumnData) -> Result<(), PersistenceError> {
        let path = column_path(&self.base_dir, data.coord());
        let bytes = compress_column(&data)?;
        lock(&self.pending_writes).insert(path, Arc::from(bytes));
        Ok(())
    }

    fn save_cube(&self, data: CubeData) -> Result<(), PersistenceError> {
        let path = cube_path(&self.base_dir, data.coord());
        let bytes = compress_cube(&data)?;
        lock(&self.pending_writes).insert(path, Arc::from(bytes));
        Ok(())
    }

    fn flush(&self) -> Result<(), PersistenceError> {
        let writes: Vec<(PathBuf, Arc<[u8]>)> = lock(&self.pending_writes)
            .iter()
            .map(|(path, bytes)| (path.clone(), Arc::clone(bytes)))
            .collect();
        if writes.is_empty() {
            return Ok(());
        }

        let results: Vec<(PathBuf, Arc<[u8]>, Result<(), PersistenceError>)> = writes
            .into_par_iter()
            .map(|(path, bytes)| {
                let result = write_file(&path, &bytes);
                (path, bytes, result)
            })
            .collect();

        let mut written = 0;
        let mut first_error = None;
        let mut pending = lock(&self.pending_writes);
        for (path, bytes, result) in results {
            match result {
                Ok(()) => {
                    // A record re-saved during the write stays for the next flush
                    if pending.get(&path).is_some_and(|current| Arc::ptr_eq(current, &bytes)) {
                        pending.remove(&path);
                    }
                    written += 1;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        drop(pending);

        log::debug!("Flushed {} records to {}", written, self.base_dir.display());
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Call counts for [`MemoryStorage`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageCounters {
    pub column_loads: usize,
    pub cube_loads: usize,
    pub column_saves: usize,
    pub cube_saves: usize,
    pub flushes: usize,
}

/// Storage kept entirely in memory. Counts every call, for tests and tools.
#[derive(Default)]
pub struct MemoryStorage {
    columns: Mutex<HashMap<ColumnCoord, ColumnData>>,
    cubes: Mutex<HashMap<CubeCoord, CubeData>>,
    column_loads: AtomicUsize,
    cube_loads: AtomicUsize,
    column_saves: AtomicUsize,
    cube_saves: AtomicUsize,
    flushes: AtomicUsize,
    load_delay: Mutex<Duration>,
    fail_loads: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every load sleep first, to simulate slow disks
    pub fn set_load_delay(&self, delay: Duration) {
        *lock(&self.load_delay) = delay;
    }

    /// Make every load fail with an I/O error
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn counters(&self) -> StorageCounters {
        StorageCounters {
            column_loads: self.column_loads.load(Ordering::SeqCst),
            cube_loads: self.cube_loads.load(Ordering::SeqCst),
            column_saves: self.column_saves.load(Ordering::SeqCst),
            cube_saves: self.cube_saves.load(Ordering::SeqCst),
            flushes: self.flushes.load(Ordering::SeqCst),
        }
    }

    pub fn column_count(&self) -> usize {
        lock(&self.columns).len()
    }

    pub fn cube_count(&self) -> usize {
        lock(&self.cubes).len()
    }

    pub fn stored_cube(&self, coord: CubeCoord) -> Option<CubeData> {
        lock(&self.cubes).get(&coord).cloned()
    }

    pub fn stored_column(&self, coord: ColumnCoord) -> Option<ColumnData> {
        lock(&self.columns).get(&coord).cloned()
    }

    fn before_load(&self) -> Result<(), PersistenceError> {
        let delay = *lock(&self.load_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io {
                path: PathBuf::from("<memory>"),
                source: std::io::Error::other("simulated load failure"),
            });
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn load_column(&self, coord: ColumnCoord) -> Result<Option<ColumnData>, PersistenceError> {
        self.column_loads.fetch_add(1, Ordering::SeqCst);
        self.before_load()?;
        Ok(lock(&self.columns).get(&coord).cloned())
    }

    fn load_cube(&self, coord: CubeCoord) -> Result<Option<CubeData>, PersistenceError> {
        self.cube_loads.fetch_add(1, Ordering::SeqCst);
        self.before_load()?;
        Ok(lock(&self.cubes).get(&coord).cloned())
    }

    fn save_column(&self, data: ColumnData) -> Result<(), PersistenceError> {
        self.column_saves.fetch_add(1, Ordering::SeqCst);
        lock(&self.columns).insert(data.coord(), data);
        Ok(())
    }

    fn save_cube(&self, data: CubeData) -> Result<(), PersistenceError> {
        self.cube_saves.fetch_add(1, Ordering::SeqCst);
        lock(&self.cubes).insert(data.coord(), data);
        Ok(())
    }

    fn flush(&self) -> Result<(), PersistenceError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::CubePrimer;

    fn sample_cube(coord: CubeCoord) -> Cube {
        let mut primer = CubePrimer::new();
        primer.set_block(1, 2, 3, 7);
        let mut cube = Cube::from_primer(coord, primer);
        cube.set_sky_light(4, 5, 6, 9);
        cube.advance_stage(GenerationStage::Lighting);
        cube.set_populated(true);
        cube
    }

    #[test]
    fn test_paths() {
        let base = Path::new("/tmp/world");
        assert_eq!(
            column_path(base, ColumnCoord::new(5, -3)),
            PathBuf::from("/tmp/world/columns/column_5_-3.rkc")
        );
        assert_eq!(
            cube_path(base, CubeCoord::new(5, 10, -3)),
            PathBuf::from("/tmp/world/cubes/y_10/cube_5_10_-3.rkc")
        );
    }

    #[test]
    fn test_cube_record_keeps_state() {
        let cube = sample_cube(CubeCoord::new(1, -2, 3));
        let data = CubeData::from_cube(&cube);
        let restored = decompress_cube(&compress_cube(&data).unwrap()).unwrap().into_cube().unwrap();

        assert_eq!(restored.coord(), cube.coord());
        assert_eq!(restored.block(1, 2, 3), 7);
        assert_eq!(restored.sky_light(4, 5, 6), 9);
        assert_eq!(restored.stage(), GenerationStage::Lighting);
        assert!(restored.is_populated());
        assert!(!restored.is_fully_populated());
        assert!(!restored.needs_saving());
        assert_eq!(restored.tickets().count(), 0);
    }

    #[test]
    fn test_column_record_keeps_biomes() {
        let mut column = Column::new(ColumnCoord::new(-4, 9));
        column.set_biome(3, 7, 2);
        column.mark_saved(55);
        let data = ColumnData::from_column(&column);
        let restored = decompress_column(&compress_column(&data).unwrap())
            .unwrap()
            .into_column()
            .unwrap();

        assert_eq!(restored.coord(), column.coord());
        assert_eq!(restored.biome(3, 7), 2);
        assert_eq!(restored.last_save_time(), 55);
        assert!(!restored.has_loaded_cubes());
    }

    #[test]
    fn test_truncated_cube_rejected() {
        let mut data = CubeData::from_cube(&sample_cube(CubeCoord::new(0, 0, 0)));
        data.blocks.truncate(10);
        assert!(matches!(data.into_cube(), Err(PersistenceError::Decode(_))));
    }

    #[test]
    fn test_garbage_fails_decompression() {
        assert!(decompress_cube(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_file_storage_buffers_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let coord = CubeCoord::new(2, 3, 4);
        storage.save_cube(CubeData::from_cube(&sample_cube(coord))).unwrap();

        // Visible to loads before it hits disk
        assert_eq!(storage.pending_write_count(), 1);
        assert!(!cube_path(dir.path(), coord).exists());
        assert!(storage.load_cube(coord).unwrap().is_some());

        storage.flush().unwrap();
        assert_eq!(storage.pending_write_count(), 0);
        assert!(cube_path(dir.path(), coord).exists());

        let reopened = FileStorage::new(dir.path());
        let data = reopened.load_cube(coord).unwrap().unwrap();
        assert_eq!(data.coord(), coord);
        assert_eq!(data.blocks[crate::world::local_index(1, 2, 3)], 7);
    }

    #[test]
    fn test_file_storage_loads_stay_visible_during_flush() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStorage::new(dir.path()));
        let coords: Vec<CubeCoord> = (0..64).map(|i| CubeCoord::new(i % 8, i / 8, 0)).collect();
        for &coord in &coords {
            storage.save_cube(CubeData::from_cube(&sample_cube(coord))).unwrap();
        }

        let reader = {
            let storage = Arc::clone(&storage);
            let coords = coords.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    for &coord in &coords {
                        assert_eq!(storage.load_cube(coord).unwrap().unwrap().coord(), coord);
                    }
                }
            })
        };
        storage.flush().unwrap();
        reader.join().unwrap();

        assert_eq!(storage.pending_write_count(), 0);
        for &coord in &coords {
            assert!(storage.load_cube(coord).unwrap().is_some());
            assert!(!cube_path(dir.path(), coord).with_extension("rkc.tmp").exists());
        }
    }

    #[test]
    fn test_file_storage_keeps_record_resaved_during_flush() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let coord = CubeCoord::new(0, 0, 0);
        storage.save_cube(CubeData::from_cube(&sample_cube(coord))).unwrap();
        storage.flush().unwrap();

        let mut newer = sample_cube(coord);
        newer.set_block(0, 0, 0, 11);
        storage.save_cube(CubeData::from_cube(&newer)).unwrap();
        assert_eq!(storage.pending_write_count(), 1);
        assert_eq!(storage.load_cube(coord).unwrap().unwrap().blocks[0], 11);

        storage.flush().unwrap();
        let reopened = FileStorage::new(dir.path());
        assert_eq!(reopened.load_cube(coord).unwrap().unwrap().blocks[0], 11);
    }

    #[test]
    fn test_file_storage_columns() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let coord = ColumnCoord::new(7, -1);
        assert!(storage.load_column(coord).unwrap().is_none());

        storage.save_column(ColumnData::from_column(&Column::new(coord))).unwrap();
        storage.flush().unwrap();
        assert!(column_path(dir.path(), coord).exists());
        assert_eq!(FileStorage::new(dir.path()).load_column(coord).unwrap().unwrap().coord(), coord);
    }

    #[test]
    fn test_file_storage_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let coord = CubeCoord::new(0, 0, 0);
        assert!(storage.load_cube(coord).unwrap().is_none());

        write_file(&cube_path(dir.path(), coord), b"not a record").unwrap();
        assert!(storage.load_cube(coord).is_err());
    }

    #[test]
    fn test_file_storage_detects_misplaced_record() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let stored = CubeCoord::new(1, 1, 1);
        let bytes = compress_cube(&CubeData::from_cube(&sample_cube(stored))).unwrap();
        let wrong = CubeCoord::new(2, 2, 2);
        write_file(&cube_path(dir.path(), wrong), &bytes).unwrap();

        assert!(matches!(
            storage.load_cube(wrong),
            Err(PersistenceError::CoordinateMismatch { .. })
        ));
    }

    #[test]
    fn test_memory_storage_counts_calls() {
        let storage = MemoryStorage::new();
        let coord = CubeCoord::new(0, 1, 0);
        assert!(storage.load_cube(coord).unwrap().is_none());
        storage.save_cube(CubeData::from_cube(&sample_cube(coord))).unwrap();
        assert!(storage.load_cube(coord).unwrap().is_some());
        storage.flush().unwrap();

        let counters = storage.counters();
        assert_eq!(counters.cube_loads, 2);
        assert_eq!(counters.cube_saves, 1);
        assert_eq!(counters.flushes, 1);
        assert_eq!(storage.cube_count(), 1);
    }

    #[test]
    fn test_memory_storage_simulated_failure() {
        let storage = MemoryStorage::new();
        storage.set_fail_loads(true);
        assert!(storage.load_column(ColumnCoord::new(0, 0)).is_err());
        storage.set_fail_loads(false);
        assert!(storage.load_column(ColumnCoord::new(0, 0)).unwrap().is_none());
    }
}
