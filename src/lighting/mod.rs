//! Sky light for freshly generated cubes
//!
//! Seeding only looks at the cube itself. Diffusion additionally reads the
//! resident neighbors, so the cache resolves the 5x5x5 neighborhood first.

use crate::world::{local_index, Cube, CubeNeighborhood, CUBE_SIZE, MAX_LIGHT};

/// Computes initial sky light for a cube.
pub trait LightingProcessor {
    /// Seed sky light from the cube's own voxels. No neighbors required.
    fn initialize_skylight(&self, cube: &mut Cube);

    /// Spread and occlude sky light using the resident neighborhood. Does not
    /// mark the cube as initially lit; only the cache does that, once the full
    /// neighborhood has been resolved.
    fn diffuse_skylight(&self, cube: &mut Cube, neighbors: &CubeNeighborhood<'_>);
}

/// Straight-down sunlight with one step of sideways falloff.
#[derive(Clone, Copy, Debug, Default)]
pub struct SkyLightProcessor;

impl SkyLightProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Cap each voxel column by the light leaving the bottom of the cube above.
    fn occlude_from_above(cube: &mut Cube, above: &Cube) {
        for z in 0..CUBE_SIZE {
            for x in 0..CUBE_SIZE {
                let cap = above.sky_light(x, 0, z);
                if cap == MAX_LIGHT {
                    continue;
                }
                for y in (0..CUBE_SIZE).rev() {
                    if cube.is_opaque(x, y, z) {
                        break;
                    }
                    if cube.sky_light(x, y, z) > cap {
                        cube.set_sky_light(x, y, z, cap);
                    }
                }
            }
        }
    }

    /// Light of the horizontal neighbor at `(x + dx, y, z + dz)`, crossing into
    /// the adjacent cube when the offset leaves this one.
    fn side_light(
        snapshot: &[u8],
        neighbors: &CubeNeighborhood<'_>,
        (x, y, z): (usize, usize, usize),
        (dx, dz): (i32, i32),
    ) -> u8 {
        let size = CUBE_SIZE as i32;
        let nx = x as i32 + dx;
        let nz = z as i32 + dz;
        if (0..size).contains(&nx) && (0..size).contains(&nz) {
            return snapshot[local_index(nx as usize, y, nz as usize)];
        }
        let (cx, lx) = (nx.div_euclid(size), nx.rem_euclid(size) as usize);
        let (cz, lz) = (nz.div_euclid(size), nz.rem_euclid(size) as usize);
        neighbors.get(cx, 0, cz).map_or(0, |c| c.sky_light(lx, y, lz))
    }
}

impl LightingProcessor for SkyLightProcessor {
    fn initialize_skylight(&self, cube: &mut Cube) {
        for z in 0..CUBE_SIZE {
            for x in 0..CUBE_SIZE {
                let mut light = MAX_LIGHT;
                for y in (0..CUBE_SIZE).rev() {
                    if cube.is_opaque(x, y, z) {
                        light = 0;
                    }
                    cube.set_sky_light(x, y, z, light);
                }
            }
        }
        cube.set_skylight_seeded(true);
    }

    fn diffuse_skylight(&self, cube: &mut Cube, neighbors: &CubeNeighborhood<'_>) {
        if !cube.is_skylight_seeded() {
            self.initialize_skylight(cube);
        }
        if let Some(above) = neighbors.get(0, 1, 0) {
            Self::occlude_from_above(cube, above);
        }

        let snapshot = cube.sky_light.clone();
        for y in 0..CUBE_SIZE {
            for z in 0..CUBE_SIZE {
                for x in 0..CUBE_SIZE {
                    if cube.is_opaque(x, y, z) {
                        continue;
                    }
                    let brightest = [(-1, 0), (1, 0), (0, -1), (0, 1)]
                        .iter()
                        .map(|&(dx, dz)| Self::side_light(&snapshot, neighbors, (x, y, z), (dx, dz)))
                        .max()
                        .unwrap_or(0);
                    let spread = brightest.saturating_sub(1);
                    if spread > cube.sky_light(x, y, z) {
                        cube.set_sky_light(x, y, z, spread);
                    }
                }
            }
        }
    }
}
