//! Cubes - fixed-size voxel volumes, the unit of storage and generation

use std::fmt;

use crate::world::{ColumnCoord, CubeCoord, GenerationStage, Ticket, TicketSet};

/// Cube edge length in blocks
pub const CUBE_SIZE: usize = 16;

/// Blocks per cube
pub const CUBE_VOLUME: usize = CUBE_SIZE * CUBE_SIZE * CUBE_SIZE;

/// Block id of empty space
pub const AIR: u16 = 0;

/// Full sky light level
pub const MAX_LIGHT: u8 = 15;

/// Index into a cube's block arrays (x fastest, then z, then y)
#[inline]
pub fn local_index(x: usize, y: usize, z: usize) -> usize {
    debug_assert!(x < CUBE_SIZE && y < CUBE_SIZE && z < CUBE_SIZE);
    (y * CUBE_SIZE + z) * CUBE_SIZE + x
}

/// Raw terrain produced by a generator, before it becomes a [`Cube`]
#[derive(Clone)]
pub struct CubePrimer {
    blocks: Vec<u16>,
}

impl CubePrimer {
    /// All-air primer
    pub fn new() -> Self {
        Self {
            blocks: vec![AIR; CUBE_VOLUME],
        }
    }

    pub fn set_block(&mut self, x: usize, y: usize, z: usize, block: u16) {
        self.blocks[local_index(x, y, z)] = block;
    }

    pub fn block(&self, x: usize, y: usize, z: usize) -> u16 {
        self.blocks[local_index(x, y, z)]
    }
}

impl Default for CubePrimer {
    fn default() -> Self {
        Self::new()
    }
}

/// A resident cube.
///
/// Owned by its [`Column`](crate::world::Column); refers back to the column by
/// coordinate only.
pub struct Cube {
    pub(crate) coord: CubeCoord,
    pub(crate) blocks: Vec<u16>,
    pub(crate) sky_light: Vec<u8>,
    pub(crate) stage: GenerationStage,
    pub(crate) populated: bool,
    pub(crate) fully_populated: bool,
    pub(crate) skylight_seeded: bool,
    pub(crate) initial_lighting_done: bool,
    pub(crate) dirty: bool,
    pub(crate) tickets: TicketSet,
}

impl Cube {
    /// Fresh cube from generator output. Starts at [`GenerationStage::Terrain`] and dirty.
    pub fn from_primer(coord: CubeCoord, primer: CubePrimer) -> Self {
        Self {
            coord,
            blocks: primer.blocks,
            sky_light: vec![0; CUBE_VOLUME],
            stage: GenerationStage::Terrain,
            populated: false,
            fully_populated: false,
            skylight_seeded: false,
            initial_lighting_done: false,
            dirty: true,
            tickets: TicketSet::new(coord),
        }
    }

    pub fn coord(&self) -> CubeCoord {
        self.coord
    }

    /// Column this cube belongs to
    pub fn column(&self) -> ColumnCoord {
        self.coord.column()
    }

    pub fn y(&self) -> i32 {
        self.coord.y
    }

    pub fn address(&self) -> u64 {
        self.coord.address()
    }

    // --- Generation state ---

    pub fn stage(&self) -> GenerationStage {
        self.stage
    }

    /// Move to `stage` if it is later than the current one. Returns whether
    /// the stage changed; a cube's stage never goes backwards.
    pub fn advance_stage(&mut self, stage: GenerationStage) -> bool {
        if stage > self.stage {
            self.stage = stage;
            self.dirty = true;
            true
        } else {
            false
        }
    }

    pub fn is_fully_generated(&self) -> bool {
        self.stage.is_last_stage()
    }

    /// Population has been applied to this cube
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn set_populated(&mut self, populated: bool) {
        self.populated = populated;
        self.dirty = true;
    }

    /// Every cube in this cube's population footprint has been populated
    pub fn is_fully_populated(&self) -> bool {
        self.fully_populated
    }

    pub fn set_fully_populated(&mut self, fully_populated: bool) {
        self.fully_populated = fully_populated;
        self.dirty = true;
    }

    pub fn is_skylight_seeded(&self) -> bool {
        self.skylight_seeded
    }

    pub fn set_skylight_seeded(&mut self, seeded: bool) {
        self.skylight_seeded = seeded;
    }

    pub fn is_initial_lighting_done(&self) -> bool {
        self.initial_lighting_done
    }

    pub fn set_initial_lighting_done(&mut self, done: bool) {
        self.initial_lighting_done = done;
        self.dirty = true;
    }

    // --- Voxel payload ---

    pub fn block(&self, x: usize, y: usize, z: usize) -> u16 {
        self.blocks[local_index(x, y, z)]
    }

    pub fn set_block(&mut self, x: usize, y: usize, z: usize, block: u16) {
        self.blocks[local_index(x, y, z)] = block;
        self.dirty = true;
    }

    pub fn is_opaque(&self, x: usize, y: usize, z: usize) -> bool {
        self.block(x, y, z) != AIR
    }

    pub fn sky_light(&self, x: usize, y: usize, z: usize) -> u8 {
        self.sky_light[local_index(x, y, z)]
    }

    pub fn set_sky_light(&mut self, x: usize, y: usize, z: usize, level: u8) {
        self.sky_light[local_index(x, y, z)] = level.min(MAX_LIGHT);
        self.dirty = true;
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|&b| b == AIR)
    }

    // --- Persistence ---

    pub fn needs_saving(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    // --- Tickets ---

    pub fn tickets(&self) -> &TicketSet {
        &self.tickets
    }

    /// Pin this cube in memory until the returned ticket is dropped
    pub fn acquire_ticket(&self) -> Ticket {
        self.tickets.acquire()
    }
}

impl fmt::Debug for Cube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cube")
            .field("coord", &self.coord)
            .field("stage", &self.stage)
            .field("populated", &self.populated)
            .field("fully_populated", &self.fully_populated)
            .field("initial_lighting_done", &self.initial_lighting_done)
            .field("dirty", &self.dirty)
            .field("tickets", &self.tickets.count())
            .finish()
    }
}

/// Read-only view of the cubes around a center cube, within `RADIUS` in each axis.
///
/// The center slot is always empty: the center cube is handed out mutably alongside.
pub struct CubeNeighborhood<'a> {
    center: CubeCoord,
    cubes: Vec<Option<&'a Cube>>,
}

impl<'a> CubeNeighborhood<'a> {
    pub const RADIUS: i32 = 2;
    const SIDE: i32 = Self::RADIUS * 2 + 1;

    /// Collect neighbors through `lookup`; `lookup` is never asked for the center.
    pub fn collect(center: CubeCoord, mut lookup: impl FnMut(CubeCoord) -> Option<&'a Cube>) -> Self {
        let side = Self::SIDE as usize;
        let mut cubes = Vec::with_capacity(side * side * side);
        for dy in -Self::RADIUS..=Self::RADIUS {
            for dz in -Self::RADIUS..=Self::RADIUS {
                for dx in -Self::RADIUS..=Self::RADIUS {
                    if dx == 0 && dy == 0 && dz == 0 {
                        cubes.push(None);
                    } else {
                        cubes.push(lookup(center.offset(dx, dy, dz)));
                    }
                }
            }
        }
        Self { center, cubes }
    }

    pub fn center(&self) -> CubeCoord {
        self.center
    }

    /// Neighbor at a relative offset, if resident and within radius
    pub fn get(&self, dx: i32, dy: i32, dz: i32) -> Option<&'a Cube> {
        let r = Self::RADIUS;
        if dx.abs() > r || dy.abs() > r || dz.abs() > r {
            return None;
        }
        let side = Self::SIDE;
        let index = ((dy + r) * side + (dz + r)) * side + (dx + r);
        self.cubes[index as usize]
    }

    /// Number of resident neighbors
    pub fn len(&self) -> usize {
        self.cubes.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cube(x: i32, y: i32, z: i32) -> Cube {
        Cube::from_primer(CubeCoord::new(x, y, z), CubePrimer::new())
    }

    #[test]
    fn test_new_cube_state() {
        let cube = make_cube(1, 2, 3);
        assert_eq!(cube.stage(), GenerationStage::Terrain);
        assert!(!cube.is_populated());
        assert!(!cube.is_initial_lighting_done());
        assert!(cube.needs_saving());
        assert!(cube.is_empty());
        assert_eq!(cube.column(), ColumnCoord::new(1, 3));
    }

    #[test]
    fn test_stage_never_regresses() {
        let mut cube = make_cube(0, 0, 0);
        assert!(cube.advance_stage(GenerationStage::Lighting));
        assert!(!cube.advance_stage(GenerationStage::Features));
        assert_eq!(cube.stage(), GenerationStage::Lighting);
        assert!(cube.advance_stage(GenerationStage::Live));
        assert!(cube.is_fully_generated());
    }

    #[test]
    fn test_block_access_marks_dirty() {
        let mut cube = make_cube(0, 0, 0);
        cube.mark_saved();
        cube.set_block(1, 2, 3, 7);
        assert_eq!(cube.block(1, 2, 3), 7);
        assert!(cube.is_opaque(1, 2, 3));
        assert!(cube.needs_saving());
    }

    #[test]
    fn test_sky_light_clamped() {
        let mut cube = make_cube(0, 0, 0);
        cube.set_sky_light(0, 0, 0, 200);
        assert_eq!(cube.sky_light(0, 0, 0), MAX_LIGHT);
    }

    #[test]
    fn test_neighborhood_lookup() {
        let above = make_cube(0, 1, 0);
        let far = make_cube(2, -2, 2);
        let nb = CubeNeighborhood::collect(CubeCoord::new(0, 0, 0), |c| {
            if c == above.coord() {
                Some(&above)
            } else if c == far.coord() {
                Some(&far)
            } else {
                None
            }
        });
        assert_eq!(nb.len(), 2);
        assert_eq!(nb.get(0, 1, 0).map(|c| c.coord()), Some(above.coord()));
        assert_eq!(nb.get(2, -2, 2).map(|c| c.coord()), Some(far.coord()));
        assert!(nb.get(0, 0, 0).is_none());
        assert!(nb.get(3, 0, 0).is_none());
    }
}
