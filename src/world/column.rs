//! Columns - vertical stacks of cubes sharing an (x, z) coordinate

use std::collections::BTreeMap;
use std::fmt;

use crate::world::{ColumnCoord, Cube, CUBE_SIZE};

/// Biome ids per column cell
pub const BIOME_CELLS: usize = CUBE_SIZE * CUBE_SIZE;

/// A resident column and the cubes currently loaded in it.
pub struct Column {
    pub(crate) coord: ColumnCoord,
    pub(crate) cubes: BTreeMap<i32, Cube>,
    pub(crate) biomes: Vec<u8>,
    pub(crate) last_save_time: u64,
    pub(crate) unloaded: bool,
    pub(crate) dirty: bool,
}

impl Column {
    /// Empty column with no cubes loaded. New columns start dirty.
    pub fn new(coord: ColumnCoord) -> Self {
        Self {
            coord,
            cubes: BTreeMap::new(),
            biomes: vec![0; BIOME_CELLS],
            last_save_time: 0,
            unloaded: false,
            dirty: true,
        }
    }

    pub fn coord(&self) -> ColumnCoord {
        self.coord
    }

    pub fn x(&self) -> i32 {
        self.coord.x
    }

    pub fn z(&self) -> i32 {
        self.coord.z
    }

    // --- Cubes ---

    /// Attach a cube. The cube must belong to this column. Returns the cube
    /// previously stored at that height, if any.
    pub fn add_cube(&mut self, cube: Cube) -> Option<Cube> {
        debug_assert_eq!(cube.column(), self.coord, "cube attached to the wrong column");
        self.cubes.insert(cube.y(), cube)
    }

    /// Detach the cube at `y`
    pub fn remove_cube(&mut self, y: i32) -> Option<Cube> {
        self.cubes.remove(&y)
    }

    pub fn cube(&self, y: i32) -> Option<&Cube> {
        self.cubes.get(&y)
    }

    pub fn cube_mut(&mut self, y: i32) -> Option<&mut Cube> {
        self.cubes.get_mut(&y)
    }

    pub fn has_cube(&self, y: i32) -> bool {
        self.cubes.contains_key(&y)
    }

    pub fn has_loaded_cubes(&self) -> bool {
        !self.cubes.is_empty()
    }

    /// Loaded cubes, bottom to top
    pub fn loaded_cubes(&self) -> impl Iterator<Item = &Cube> {
        self.cubes.values()
    }

    pub fn loaded_cubes_mut(&mut self) -> impl Iterator<Item = &mut Cube> {
        self.cubes.values_mut()
    }

    pub fn loaded_cube_count(&self) -> usize {
        self.cubes.len()
    }

    // --- Biomes ---

    pub fn biome(&self, x: usize, z: usize) -> u8 {
        self.biomes[z * CUBE_SIZE + x]
    }

    pub fn set_biome(&mut self, x: usize, z: usize, biome: u8) {
        self.biomes[z * CUBE_SIZE + x] = biome;
        self.dirty = true;
    }

    // --- Lifecycle / persistence ---

    pub fn last_save_time(&self) -> u64 {
        self.last_save_time
    }

    pub fn set_last_save_time(&mut self, time: u64) {
        self.last_save_time = time;
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded
    }

    pub(crate) fn on_load(&mut self, world_time: u64) {
        self.unloaded = false;
        self.last_save_time = world_time;
    }

    pub(crate) fn on_unload(&mut self) {
        self.unloaded = true;
    }

    pub fn needs_saving(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_saved(&mut self, world_time: u64) {
        self.dirty = false;
        self.last_save_time = world_time;
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("coord", &self.coord)
            .field("cubes", &self.cubes.keys().collect::<Vec<_>>())
            .field("unloaded", &self.unloaded)
            .field("dirty", &self.dirty)
            .finish()
    }
}
