//! Terrain generator interface and the default noise-based generator

use glam::IVec3;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use crate::core::GenerationError;
use crate::world::{BlockPos, Column, Cube, CubeCoord, CubePrimer, AIR, CUBE_SIZE};

/// Block ids used by [`NoiseTerrainGenerator`]
pub mod blocks {
    pub const STONE: u16 = 1;
    pub const DIRT: u16 = 2;
    pub const GRASS: u16 = 3;
    pub const WATER: u16 = 4;
    pub const ORE: u16 = 5;
}

/// Biome ids used by [`NoiseTerrainGenerator`]
pub mod biomes {
    pub const OCEAN: u8 = 0;
    pub const PLAINS: u8 = 1;
    pub const HILLS: u8 = 2;
}

/// Mob categories for spawn queries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CreatureType {
    Monster,
    Creature,
    Ambient,
    WaterCreature,
}

/// A creature that may spawn at a position
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnEntry {
    pub name: String,
    pub weight: u32,
    pub min_group: u32,
    pub max_group: u32,
}

impl SpawnEntry {
    pub fn new(name: &str, weight: u32, min_group: u32, max_group: u32) -> Self {
        Self {
            name: name.to_string(),
            weight,
            min_group,
            max_group,
        }
    }
}

/// Source of raw terrain and population for the cache.
pub trait TerrainGenerator {
    /// Raw terrain for one cube
    fn generate_cube(&self, coord: CubeCoord) -> Result<CubePrimer, GenerationError>;

    /// Fill column-level data (biomes) for a freshly created column
    fn generate_column(&self, column: &mut Column) -> Result<(), GenerationError>;

    /// Relative offsets of every cube that must be populated before `cube`
    /// counts as fully populated. Includes `(0, 0, 0)` if the cube itself is populated.
    fn population_footprint(&self, cube: &Cube) -> Vec<IVec3>;

    /// Decorate a cube (ores, plants, structures)
    fn populate(&self, cube: &mut Cube) -> Result<(), GenerationError>;

    fn closest_structure(&self, name: &str, pos: BlockPos) -> Option<BlockPos>;

    fn possible_creatures(&self, kind: CreatureType, pos: BlockPos) -> Vec<SpawnEntry>;
}

/// Parameters controlling terrain generation
#[derive(Clone, Debug)]
pub struct TerrainParams {
    pub seed: u32,
    pub scale: f32,        // Horizontal scale in blocks (larger = smoother)
    pub height_scale: f32, // Height range in blocks
    pub octaves: u32,
    pub persistence: f32,
    pub lacunarity: f32,
    pub sea_level: i32,
    /// Ore veins placed per populated cube
    pub ores_per_cube: u32,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            scale: 200.0,
            height_scale: 96.0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            sea_level: 32,
            ores_per_cube: 6,
        }
    }
}

/// Spacing, in blocks, of the stronghold lattice
const STRONGHOLD_SPACING: i32 = 1024;

/// Height-map terrain using fractal Brownian motion
pub struct NoiseTerrainGenerator {
    params: TerrainParams,
    noise: Fbm<Perlin>,
}

impl NoiseTerrainGenerator {
    pub fn new(params: TerrainParams) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence as f64)
            .set_lacunarity(params.lacunarity as f64);

        Self { params, noise }
    }

    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Surface height (in blocks) at a block column
    pub fn height_at(&self, x: i32, z: i32) -> i32 {
        let nx = x as f64 / self.params.scale as f64;
        let nz = z as f64 / self.params.scale as f64;
        let normalized = (self.noise.get([nx, nz]) + 1.0) / 2.0;
        (normalized * self.params.height_scale as f64).floor() as i32
    }

    fn block_at(&self, by: i32, surface: i32) -> u16 {
        if by < surface - 3 {
            blocks::STONE
        } else if by < surface {
            blocks::DIRT
        } else if by == surface {
            if surface < self.params.sea_level { blocks::DIRT } else { blocks::GRASS }
        } else if by <= self.params.sea_level {
            blocks::WATER
        } else {
            AIR
        }
    }
}

impl TerrainGenerator for NoiseTerrainGenerator {
    fn generate_cube(&self, coord: CubeCoord) -> Result<CubePrimer, GenerationError> {
        let origin = coord.min_block();
        let mut primer = CubePrimer::new();
        for lz in 0..CUBE_SIZE {
            for lx in 0..CUBE_SIZE {
                let surface = self.height_at(origin.x + lx as i32, origin.z + lz as i32);
                for ly in 0..CUBE_SIZE {
                    let block = self.block_at(origin.y + ly as i32, surface);
                    if block != AIR {
                        primer.set_block(lx, ly, lz, block);
                    }
                }
            }
        }
        Ok(primer)
    }

    fn generate_column(&self, column: &mut Column) -> Result<(), GenerationError> {
        let origin_x = column.x() * CUBE_SIZE as i32;
        let origin_z = column.z() * CUBE_SIZE as i32;
        for lz in 0..CUBE_SIZE {
            for lx in 0..CUBE_SIZE {
                let h = self.height_at(origin_x + lx as i32, origin_z + lz as i32);
                let biome = if h < self.params.sea_level {
                    biomes::OCEAN
                } else if h < self.params.sea_level + 12 {
                    biomes::PLAINS
                } else {
                    biomes::HILLS
                };
                column.set_biome(lx, lz, biome);
            }
        }
        Ok(())
    }

    fn population_footprint(&self, _cube: &Cube) -> Vec<IVec3> {
        let mut offsets = Vec::with_capacity(27);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    offsets.push(IVec3::new(dx, dy, dz));
                }
            }
        }
        offsets
    }

    fn populate(&self, cube: &mut Cube) -> Result<(), GenerationError> {
        let c = cube.coord();
        let mut state = hash3(self.params.seed as u64, c.x, c.y, c.z);
        for _ in 0..self.params.ores_per_cube {
            state = split_mix(state);
            let x = (state & 0xf) as usize;
            let y = ((state >> 4) & 0xf) as usize;
            let z = ((state >> 8) & 0xf) as usize;
            if cube.block(x, y, z) == blocks::STONE {
                cube.set_block(x, y, z, blocks::ORE);
            }
        }
        Ok(())
    }

    fn closest_structure(&self, name: &str, pos: BlockPos) -> Option<BlockPos> {
        if name != "Stronghold" {
            return None;
        }
        let cell_x = pos.x.div_euclid(STRONGHOLD_SPACING);
        let cell_z = pos.z.div_euclid(STRONGHOLD_SPACING);
        let mut best: Option<(i64, BlockPos)> = None;
        for cx in cell_x - 1..=cell_x + 1 {
            for cz in cell_z - 1..=cell_z + 1 {
                let h = hash3(self.params.seed as u64, cx, 0, cz);
                let jitter_x = (h % STRONGHOLD_SPACING as u64) as i32;
                let jitter_z = ((h >> 32) % STRONGHOLD_SPACING as u64) as i32;
                let candidate = IVec3::new(
                    cx * STRONGHOLD_SPACING + jitter_x,
                    self.params.sea_level - 24,
                    cz * STRONGHOLD_SPACING + jitter_z,
                );
                let d = candidate - pos;
                let dist = d.x as i64 * d.x as i64 + d.z as i64 * d.z as i64;
                if best.is_none_or(|(b, _)| dist < b) {
                    best = Some((dist, candidate));
                }
            }
        }
        best.map(|(_, p)| p)
    }

    fn possible_creatures(&self, kind: CreatureType, pos: BlockPos) -> Vec<SpawnEntry> {
        let sea = self.params.sea_level;
        match kind {
            CreatureType::Monster => vec![
                SpawnEntry::new("zombie", 100, 4, 4),
                SpawnEntry::new("skeleton", 100, 4, 4),
            ],
            CreatureType::Creature if pos.y > sea => vec![
                SpawnEntry::new("sheep", 12, 4, 4),
                SpawnEntry::new("cow", 8, 4, 4),
            ],
            CreatureType::Ambient if pos.y < sea => vec![SpawnEntry::new("bat", 10, 8, 8)],
            CreatureType::WaterCreature if pos.y <= sea => vec![SpawnEntry::new("squid", 10, 4, 4)],
            _ => Vec::new(),
        }
    }
}

fn split_mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn hash3(seed: u64, x: i32, y: i32, z: i32) -> u64 {
    let mut h = split_mix(seed);
    h = split_mix(h ^ x as u32 as u64);
    h = split_mix(h ^ y as u32 as u64);
    split_mix(h ^ z as u32 as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::ColumnCoord;

    fn generator() -> NoiseTerrainGenerator {
        NoiseTerrainGenerator::new(TerrainParams::default())
    }

    #[test]
    fn test_deep_cube_is_solid_stone() {
        let primer = generator().generate_cube(CubeCoord::new(0, -10, 0)).unwrap();
        for y in 0..CUBE_SIZE {
            assert_eq!(primer.block(3, y, 5), blocks::STONE);
        }
    }

    #[test]
    fn test_high_cube_is_air() {
        let primer = generator().generate_cube(CubeCoord::new(0, 20, 0)).unwrap();
        assert_eq!(primer.block(0, 0, 0), AIR);
        assert_eq!(primer.block(15, 15, 15), AIR);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = generator().generate_cube(CubeCoord::new(3, 2, -4)).unwrap();
        let b = generator().generate_cube(CubeCoord::new(3, 2, -4)).unwrap();
        for y in 0..CUBE_SIZE {
            assert_eq!(a.block(7, y, 9), b.block(7, y, 9));
        }
    }

    #[test]
    fn test_footprint_covers_neighbours() {
        let cube = Cube::from_primer(CubeCoord::new(0, 0, 0), CubePrimer::new());
        let footprint = generator().population_footprint(&cube);
        assert_eq!(footprint.len(), 27);
        assert!(footprint.contains(&IVec3::ZERO));
        assert!(footprint.contains(&IVec3::new(-1, 1, -1)));
    }

    #[test]
    fn test_populate_places_ore_in_stone() {
        let generator = generator();
        let coord = CubeCoord::new(0, -10, 0);
        let mut cube = Cube::from_primer(coord, generator.generate_cube(coord).unwrap());
        generator.populate(&mut cube).unwrap();
        let mut ores = 0;
        for y in 0..CUBE_SIZE {
            for z in 0..CUBE_SIZE {
                for x in 0..CUBE_SIZE {
                    if cube.block(x, y, z) == blocks::ORE {
                        ores += 1;
                    }
                }
            }
        }
        assert!(ores > 0);
    }

    #[test]
    fn test_generate_column_biomes() {
        let mut column = Column::new(ColumnCoord::new(0, 0));
        generator().generate_column(&mut column).unwrap();
        let b = column.biome(0, 0);
        assert!(b == biomes::OCEAN || b == biomes::PLAINS || b == biomes::HILLS);
    }

    #[test]
    fn test_closest_structure() {
        let generator = generator();
        assert!(generator.closest_structure("Village", IVec3::ZERO).is_none());
        let pos = generator.closest_structure("Stronghold", IVec3::ZERO).unwrap();
        assert!(pos.x.abs() < 2 * STRONGHOLD_SPACING);
        assert!(pos.z.abs() < 2 * STRONGHOLD_SPACING);
    }

    #[test]
    fn test_possible_creatures() {
        let generator = generator();
        let high = IVec3::new(0, 100, 0);
        let deep = IVec3::new(0, -20, 0);
        assert_eq!(generator.possible_creatures(CreatureType::Monster, high).len(), 2);
        assert!(!generator.possible_creatures(CreatureType::Creature, high).is_empty());
        assert!(generator.possible_creatures(CreatureType::Creature, deep).is_empty());
        assert!(!generator.possible_creatures(CreatureType::WaterCreature, deep).is_empty());
    }
}
