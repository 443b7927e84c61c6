//! Resident columns and cubes, resolved on demand at a requested effort tier
//!
//! The cache is owned by a single thread. Only disk reads leave that thread
//! (through [`AsyncLoadExecutor`]); their completions are delivered back on
//! the owner thread by [`VolumeCache::poll_async`] or [`VolumeCache::wait_async`].

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::core::Error;
use crate::generation::generator::{CreatureType, SpawnEntry, TerrainGenerator};
use crate::lighting::LightingProcessor;
use crate::streaming::async_loader::{AsyncLoadExecutor, LoadResult};
use crate::streaming::config::CacheConfig;
use crate::streaming::disk_io::{ColumnData, CubeData, Storage};
use crate::streaming::requirement::Requirement;
use crate::world::{BlockPos, Column, ColumnCoord, Cube, CubeAccess, CubeCoord, CubeNeighborhood, Ticket};

/// Completion for [`VolumeCache::async_get_column`]. Receives the column's
/// coordinate if it is resident, `None` if the tier was not enough.
pub type ColumnCallback = Box<dyn FnOnce(&mut VolumeCache, Option<ColumnCoord>)>;

/// Completion for [`VolumeCache::async_get_cube`]
pub type CubeCallback = Box<dyn FnOnce(&mut VolumeCache, Option<CubeCoord>)>;

/// Half-width of the neighborhood resolved before the first sky light diffusion
const LIGHT_RADIUS: i32 = 2;

/// What one sweep removed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub cubes_unloaded: usize,
    pub columns_unloaded: usize,
}

/// Loads, generates, populates, lights, saves and evicts cubes and columns.
pub struct VolumeCache {
    columns: HashMap<ColumnCoord, Column>,
    storage: Arc<dyn Storage>,
    generator: Rc<dyn TerrainGenerator>,
    lighting: Rc<dyn LightingProcessor>,
    executor: AsyncLoadExecutor,
    column_waiters: HashMap<ColumnCoord, Vec<(Requirement, ColumnCallback)>>,
    cube_waiters: HashMap<CubeCoord, Vec<(Requirement, CubeCallback)>>,
    /// Cubes that became resident below the terminal stage since the last take
    pending_generation: Vec<CubeCoord>,
    world_time: u64,
    config: CacheConfig,
}

impl VolumeCache {
    pub fn new(
        storage: Arc<dyn Storage>,
        generator: Rc<dyn TerrainGenerator>,
        lighting: Rc<dyn LightingProcessor>,
        config: CacheConfig,
    ) -> Result<Self, Error> {
        config.validate()?;
        let executor = AsyncLoadExecutor::new(Arc::clone(&storage), config.io_threads)?;

        Ok(Self {
            columns: HashMap::new(),
            storage,
            generator,
            lighting,
            executor,
            column_waiters: HashMap::new(),
            cube_waiters: HashMap::new(),
            pending_generation: Vec::new(),
            world_time: 0,
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn world_time(&self) -> u64 {
        self.world_time
    }

    /// Advance the clock used for column save times
    pub fn advance_world_time(&mut self) -> u64 {
        self.world_time += 1;
        self.world_time
    }

    // --- Memory-only lookups ---

    pub fn loaded_column(&self, coord: ColumnCoord) -> Option<&Column> {
        self.columns.get(&coord)
    }

    pub fn loaded_column_mut(&mut self, coord: ColumnCoord) -> Option<&mut Column> {
        self.columns.get_mut(&coord)
    }

    pub fn loaded_cube(&self, coord: CubeCoord) -> Option<&Cube> {
        self.columns.get(&coord.column()).and_then(|c| c.cube(coord.y))
    }

    pub fn loaded_cube_mut(&mut self, coord: CubeCoord) -> Option<&mut Cube> {
        self.columns.get_mut(&coord.column()).and_then(|c| c.cube_mut(coord.y))
    }

    pub fn is_column_loaded(&self, coord: ColumnCoord) -> bool {
        self.columns.contains_key(&coord)
    }

    pub fn is_cube_loaded(&self, coord: CubeCoord) -> bool {
        self.loaded_cube(coord).is_some()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn cube_count(&self) -> usize {
        self.columns.values().map(|c| c.loaded_cube_count()).sum()
    }

    /// Pin a resident cube
    pub fn acquire_ticket(&self, coord: CubeCoord) -> Option<Ticket> {
        self.loaded_cube(coord).map(|c| c.acquire_ticket())
    }

    // --- Columns ---

    /// Resolve a column synchronously at `req`
    pub fn get_column(&mut self, coord: ColumnCoord, req: Requirement) -> Option<&mut Column> {
        if self.resolve_column(coord, req) {
            self.columns.get_mut(&coord)
        } else {
            None
        }
    }

    /// Resolve a column with the disk read on a background thread.
    ///
    /// `callback` runs exactly once on the owner thread: immediately if no
    /// read is needed, otherwise from [`poll_async`](Self::poll_async) or
    /// [`wait_async`](Self::wait_async). Concurrent requests for the same
    /// column share one read.
    pub fn async_get_column(
        &mut self,
        coord: ColumnCoord,
        req: Requirement,
        callback: impl FnOnce(&mut VolumeCache, Option<ColumnCoord>) + 'static,
    ) {
        if self.is_column_loaded(coord) || !req.allows_io() {
            let resident = self.is_column_loaded(coord).then_some(coord);
            callback(self, resident);
            return;
        }

        self.column_waiters
            .entry(coord)
            .or_default()
            .push((req, Box::new(callback)));
        if self.executor.queue_column_load(coord) {
            log::trace!("Queued async load of column {:?}", coord);
        }
    }

    fn resolve_column(&mut self, coord: ColumnCoord, req: Requirement) -> bool {
        if self.is_column_loaded(coord) {
            return true;
        }
        if !req.allows_io() {
            return false;
        }

        // The in-flight read counts as this request's read
        if self.executor.is_column_pending(coord) {
            self.wait_for_column(coord);
            return self.post_process_column(coord, None, req);
        }

        let loaded = match self.storage.load_column(coord) {
            Ok(data) => data.and_then(|d| Self::decode_column(coord, d)),
            Err(e) => {
                log::error!("Failed to load column {:?}: {}", coord, e);
                None
            }
        };
        self.post_process_column(coord, loaded, req)
    }

    fn decode_column(coord: ColumnCoord, data: ColumnData) -> Option<Column> {
        match data.into_column() {
            Ok(column) => Some(column),
            Err(e) => {
                log::error!("Discarding unreadable column {:?}: {}", coord, e);
                None
            }
        }
    }

    /// Register a freshly read column, or generate one if nothing was stored
    /// and `req` allows it. Returns whether the column is now resident.
    fn post_process_column(&mut self, coord: ColumnCoord, loaded: Option<Column>, req: Requirement) -> bool {
        if self.is_column_loaded(coord) {
            if loaded.is_some() {
                log::warn!("Column {:?} loaded while already resident, keeping the resident one", coord);
            }
            return true;
        }

        let mut column = match loaded {
            Some(column) => column,
            None if !req.allows_generation() => return false,
            None => {
                let mut column = Column::new(coord);
                if let Err(e) = self.generator.generate_column(&mut column) {
                    log::error!("Failed to generate column {:?}: {}", coord, e);
                    return false;
                }
                column
            }
        };

        column.on_load(self.world_time);
        self.columns.insert(coord, column);
        true
    }

    // --- Cubes ---

    /// Resolve a cube synchronously at `req`
    pub fn get_cube(&mut self, coord: CubeCoord, req: Requirement) -> Option<&mut Cube> {
        if self.resolve_cube(coord, req) {
            self.loaded_cube_mut(coord)
        } else {
            None
        }
    }

    /// Resolve a cube with disk reads on a background thread. Generation,
    /// population and lighting, if `req` asks for them, run inside the
    /// completion on the owner thread.
    pub fn async_get_cube(
        &mut self,
        coord: CubeCoord,
        req: Requirement,
        callback: impl FnOnce(&mut VolumeCache, Option<CubeCoord>) + 'static,
    ) {
        if !coord.is_addressable() {
            log::warn!("Refusing cube {:?}: outside the addressable world", coord);
            callback(self, None);
            return;
        }
        let resident = self.is_cube_loaded(coord);
        if !req.allows_io() || (resident && req <= Requirement::Generate) {
            callback(self, resident.then_some(coord));
            return;
        }
        if resident {
            let done = self.post_cube_load_attempt(coord, req);
            callback(self, done.then_some(coord));
            return;
        }

        self.async_get_column(coord.column(), req.column_requirement(), move |cache, column| {
            if column.is_none() {
                callback(cache, None);
                return;
            }
            cache.queue_cube(coord, req, Box::new(callback));
        });
    }

    /// Column of `coord` is resident; read the cube in the background
    fn queue_cube(&mut self, coord: CubeCoord, req: Requirement, callback: CubeCallback) {
        if self.is_cube_loaded(coord) {
            let done = self.post_cube_load_attempt(coord, req);
            callback(self, done.then_some(coord));
            return;
        }

        self.cube_waiters.entry(coord).or_default().push((req, callback));
        if self.executor.queue_cube_load(coord) {
            log::trace!("Queued async load of cube {:?}", coord);
        }
    }

    fn resolve_cube(&mut self, coord: CubeCoord, req: Requirement) -> bool {
        if !coord.is_addressable() {
            log::warn!("Refusing cube {:?}: outside the addressable world", coord);
            return false;
        }
        let resident = self.is_cube_loaded(coord);
        if !req.allows_io() || (resident && req <= Requirement::Generate) {
            return resident;
        }

        if !self.resolve_column(coord.column(), req.column_requirement()) {
            return resident;
        }

        if !self.is_cube_loaded(coord) {
            if self.executor.is_cube_pending(coord) {
                self.wait_for_cube(coord);
            } else {
                match self.storage.load_cube(coord) {
                    Ok(Some(data)) => self.on_cube_loaded(coord, data),
                    Ok(None) => {}
                    Err(e) => log::error!("Failed to load cube {:?}: {}", coord, e),
                }
            }
        }

        self.post_cube_load_attempt(coord, req)
    }

    /// Attach a cube read from storage to its (resident) column
    fn on_cube_loaded(&mut self, coord: CubeCoord, data: CubeData) {
        let cube = match data.into_cube() {
            Ok(cube) => cube,
            Err(e) => {
                log::error!("Discarding unreadable cube {:?}: {}", coord, e);
                return;
            }
        };
        self.attach_cube(cube);
    }

    fn attach_cube(&mut self, cube: Cube) {
        let coord = cube.coord();
        let Some(column) = self.columns.get_mut(&coord.column()) else {
            log::warn!("Dropping cube {:?}: its column is not resident", coord);
            return;
        };
        if column.has_cube(coord.y) {
            log::warn!("Cube {:?} loaded while already resident, keeping the resident one", coord);
            return;
        }

        let incomplete = !cube.is_fully_generated();
        column.add_cube(cube);
        if incomplete {
            self.pending_generation.push(coord);
        }
    }

    /// Bring a cube whose column is resident up to `req`. Returns whether the
    /// cube is resident and satisfies `req`.
    fn post_cube_load_attempt(&mut self, coord: CubeCoord, req: Requirement) -> bool {
        let resident = self.is_cube_loaded(coord);
        if req <= Requirement::Load || (req == Requirement::Generate && resident) {
            return resident;
        }

        if !resident {
            if !self.generate_cube(coord) {
                return false;
            }
            if req == Requirement::Generate {
                return true;
            }
        }

        let fully_populated = self.loaded_cube(coord).is_some_and(|c| c.is_fully_populated());
        if !fully_populated && !self.populate_cube(coord) {
            return false;
        }
        if req == Requirement::Populate {
            return true;
        }

        let lit = self.loaded_cube(coord).is_some_and(|c| c.is_initial_lighting_done());
        if !lit {
            self.calculate_diffuse_skylight(coord);
        }
        self.loaded_cube(coord).is_some_and(|c| c.is_initial_lighting_done())
    }

    /// Raw terrain plus seeded sky light. The column must be resident.
    fn generate_cube(&mut self, coord: CubeCoord) -> bool {
        let primer = match self.generator.generate_cube(coord) {
            Ok(primer) => primer,
            Err(e) => {
                log::error!("Failed to generate cube {:?}: {}", coord, e);
                return false;
            }
        };
        let mut cube = Cube::from_primer(coord, primer);
        self.lighting.initialize_skylight(&mut cube);
        self.attach_cube(cube);
        self.is_cube_loaded(coord)
    }

    /// Populate every cube in the generator's footprint that is not yet
    /// populated, generating missing ones. Returns whether all succeeded.
    fn populate_cube(&mut self, coord: CubeCoord) -> bool {
        let Some(cube) = self.loaded_cube(coord) else {
            return false;
        };
        let footprint = self.generator.population_footprint(cube);
        let generator = Rc::clone(&self.generator);

        let mut complete = true;
        for offset in footprint {
            let target = coord.offset(offset.x, offset.y, offset.z);
            if !self.resolve_cube(target, Requirement::Generate) {
                log::warn!("Cube {:?} unavailable for population of {:?}", target, coord);
                complete = false;
                continue;
            }
            let Some(cube) = self.loaded_cube_mut(target) else {
                continue;
            };
            if cube.is_populated() {
                continue;
            }
            match generator.populate(cube) {
                Ok(()) => cube.set_populated(true),
                Err(e) => {
                    log::error!("Failed to populate cube {:?}: {}", target, e);
                    complete = false;
                }
            }
        }

        if complete {
            if let Some(cube) = self.loaded_cube_mut(coord) {
                cube.set_fully_populated(true);
            }
        }
        complete
    }

    /// Resolve the 5x5x5 neighborhood at `Generate`, then diffuse sky light
    /// into the center cube.
    fn calculate_diffuse_skylight(&mut self, coord: CubeCoord) {
        for dx in -LIGHT_RADIUS..=LIGHT_RADIUS {
            for dz in -LIGHT_RADIUS..=LIGHT_RADIUS {
                for dy in (-LIGHT_RADIUS..=LIGHT_RADIUS).rev() {
                    if dx != 0 || dy != 0 || dz != 0 {
                        self.resolve_cube(coord.offset(dx, dy, dz), Requirement::Generate);
                    }
                }
            }
        }

        let lighting = Rc::clone(&self.lighting);
        self.with_neighborhood(coord, &mut |cube, neighbors| {
            lighting.diffuse_skylight(cube, neighbors);
            cube.set_initial_lighting_done(true);
        });
    }

    // --- Async completions ---

    /// Deliver every finished background load. Returns how many were handled.
    pub fn poll_async(&mut self) -> usize {
        let results = self.executor.poll();
        let count = results.len();
        for result in results {
            self.dispatch(result);
        }
        count
    }

    /// Block for the next finished load and deliver it. `false` if none in flight.
    pub fn wait_async(&mut self) -> bool {
        match self.executor.wait_next() {
            Some(result) => {
                self.dispatch(result);
                true
            }
            None => false,
        }
    }

    /// Deliver loads until nothing is in flight, including loads queued by
    /// the completions themselves.
    pub fn wait_idle(&mut self) {
        while self.wait_async() {}
    }

    pub fn pending_async_loads(&self) -> usize {
        self.executor.pending_count()
    }

    fn wait_for_column(&mut self, coord: ColumnCoord) {
        while self.executor.is_column_pending(coord) {
            if !self.wait_async() {
                break;
            }
        }
    }

    fn wait_for_cube(&mut self, coord: CubeCoord) {
        while self.executor.is_cube_pending(coord) {
            if !self.wait_async() {
                break;
            }
        }
    }

    fn dispatch(&mut self, result: LoadResult) {
        match result {
            LoadResult::Column { coord, result } => {
                let loaded = match result {
                    Ok(data) => data.and_then(|d| Self::decode_column(coord, d)),
                    Err(e) => {
                        log::error!("Failed to load column {:?}: {}", coord, e);
                        None
                    }
                };
                self.complete_column_load(coord, loaded);
            }
            LoadResult::Cube { coord, result } => {
                let loaded = match result {
                    Ok(data) => data,
                    Err(e) => {
                        log::error!("Failed to load cube {:?}: {}", coord, e);
                        None
                    }
                };
                self.complete_cube_load(coord, loaded);
            }
        }
    }

    fn complete_column_load(&mut self, coord: ColumnCoord, mut loaded: Option<Column>) {
        let waiters = self.column_waiters.remove(&coord).unwrap_or_default();
        if waiters.is_empty() {
            self.post_process_column(coord, loaded, Requirement::Load);
            return;
        }
        for (req, callback) in waiters {
            let resident = self.post_process_column(coord, loaded.take(), req);
            callback(self, resident.then_some(coord));
        }
    }

    fn complete_cube_load(&mut self, coord: CubeCoord, loaded: Option<CubeData>) {
        let waiters = self.cube_waiters.remove(&coord).unwrap_or_default();
        let column_req = waiters
            .iter()
            .map(|(req, _)| req.column_requirement())
            .max()
            .unwrap_or(Requirement::Load);

        if !self.resolve_column(coord.column(), column_req) {
            log::warn!("Column of cube {:?} is gone, dropping loaded cube", coord);
            for (_, callback) in waiters {
                callback(self, None);
            }
            return;
        }

        if let Some(data) = loaded {
            self.on_cube_loaded(coord, data);
        }
        for (req, callback) in waiters {
            let done = self.post_cube_load_attempt(coord, req);
            callback(self, done.then_some(coord));
        }
    }

    /// Cubes that became resident below the terminal stage since the last call
    pub fn take_pending_generation(&mut self) -> Vec<CubeCoord> {
        let pending = std::mem::take(&mut self.pending_generation);
        pending
            .into_iter()
            .filter(|c| self.loaded_cube(*c).is_some_and(|cube| !cube.is_fully_generated()))
            .collect()
    }

    // --- Persistence and eviction ---

    fn save_cube(storage: &dyn Storage, cube: &mut Cube) {
        match storage.save_cube(CubeData::from_cube(cube)) {
            Ok(()) => cube.mark_saved(),
            Err(e) => log::error!("Failed to save cube {:?}: {}", cube.coord(), e),
        }
    }

    fn save_column(storage: &dyn Storage, column: &mut Column, world_time: u64) {
        match storage.save_column(ColumnData::from_column(column)) {
            Ok(()) => column.mark_saved(world_time),
            Err(e) => log::error!("Failed to save column {:?}: {}", column.coord(), e),
        }
    }

    /// Persist every dirty cube, then every dirty column. Failures are logged.
    pub fn save_all(&mut self) -> bool {
        let storage = Arc::clone(&self.storage);
        let mut cubes = 0;
        for column in self.columns.values_mut() {
            for cube in column.loaded_cubes_mut().filter(|c| c.needs_saving()) {
                Self::save_cube(storage.as_ref(), cube);
                cubes += 1;
            }
        }
        let mut columns = 0;
        for column in self.columns.values_mut().filter(|c| c.needs_saving()) {
            Self::save_column(storage.as_ref(), column, self.world_time);
            columns += 1;
        }
        log::debug!("Saved {} cubes and {} columns", cubes, columns);
        true
    }

    /// Unload every cube without tickets, then every column left without
    /// cubes. Dirty data is saved on the way out.
    pub fn sweep_unused(&mut self) -> SweepStats {
        let storage = Arc::clone(&self.storage);
        let mut stats = SweepStats::default();

        for column in self.columns.values_mut() {
            let unpinned: Vec<i32> = column
                .loaded_cubes()
                .filter(|c| c.tickets().can_unload())
                .map(|c| c.y())
                .collect();
            for y in unpinned {
                if let Some(mut cube) = column.remove_cube(y) {
                    if cube.needs_saving() {
                        Self::save_cube(storage.as_ref(), &mut cube);
                    }
                    stats.cubes_unloaded += 1;
                }
            }
        }

        let empty: Vec<ColumnCoord> = self
            .columns
            .values()
            .filter(|c| !c.has_loaded_cubes())
            .map(|c| c.coord())
            .filter(|&c| !self.executor.has_pending_cubes_in(c))
            .collect();
        for coord in empty {
            if let Some(mut column) = self.columns.remove(&coord) {
                column.on_unload();
                if column.needs_saving() {
                    Self::save_column(storage.as_ref(), &mut column, self.world_time);
                }
                stats.columns_unloaded += 1;
            }
        }

        if stats.cubes_unloaded > 0 || stats.columns_unloaded > 0 {
            log::debug!(
                "Swept {} cubes and {} columns, {}",
                stats.cubes_unloaded,
                stats.columns_unloaded,
                self
            );
        }
        stats
    }

    /// Block until the storage has written everything buffered
    pub fn flush(&mut self) {
        if let Err(e) = self.storage.flush() {
            log::error!("Failed to flush storage: {}", e);
        }
    }

    // --- Generator pass-throughs ---

    pub fn closest_structure(&self, name: &str, pos: BlockPos) -> Option<BlockPos> {
        self.generator.closest_structure(name, pos)
    }

    pub fn possible_creatures(&self, kind: CreatureType, pos: BlockPos) -> Vec<SpawnEntry> {
        self.generator.possible_creatures(kind, pos)
    }

    /// Multi-line listing of every resident column and its cubes
    pub fn dump_loaded_cubes(&self) -> String {
        let mut coords: Vec<&ColumnCoord> = self.columns.keys().collect();
        coords.sort();

        let mut out = String::from("\n");
        for coord in coords {
            let column = &self.columns[coord];
            let cubes: Vec<String> = column.loaded_cubes().map(|c| format!("Cube[{}]", c.y())).collect();
            out.push_str(&format!("Column[{}, {}] {{{}}}\n", coord.x, coord.z, cubes.join(", ")));
        }
        out
    }
}

impl fmt::Display for VolumeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolumeCache: {} columns, {} cubes", self.column_count(), self.cube_count())
    }
}

impl CubeAccess for VolumeCache {
    fn loaded_cube(&self, coord: CubeCoord) -> Option<&Cube> {
        VolumeCache::loaded_cube(self, coord)
    }

    fn loaded_cube_mut(&mut self, coord: CubeCoord) -> Option<&mut Cube> {
        VolumeCache::loaded_cube_mut(self, coord)
    }

    fn with_neighborhood(
        &mut self,
        coord: CubeCoord,
        f: &mut dyn FnMut(&mut Cube, &CubeNeighborhood<'_>),
    ) -> bool {
        let Some(mut center) = self
            .columns
            .get_mut(&coord.column())
            .and_then(|c| c.remove_cube(coord.y))
        else {
            return false;
        };
        {
            let columns = &self.columns;
            let neighborhood =
                CubeNeighborhood::collect(coord, |c| columns.get(&c.column()).and_then(|col| col.cube(c.y)));
            f(&mut center, &neighborhood);
        }
        if let Some(column) = self.columns.get_mut(&coord.column()) {
            column.add_cube(center);
        }
        true
    }
}
