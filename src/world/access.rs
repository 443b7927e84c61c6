//! Resident-cube access used by pipeline stages

use std::collections::HashMap;

use crate::world::{Cube, CubeCoord, CubeNeighborhood};

/// Lookup of resident cubes, implemented by the cache.
///
/// Never loads or generates anything; absent cubes are simply `None`.
pub trait CubeAccess {
    fn loaded_cube(&self, coord: CubeCoord) -> Option<&Cube>;

    fn loaded_cube_mut(&mut self, coord: CubeCoord) -> Option<&mut Cube>;

    /// Run `f` on the cube at `coord` together with its resident neighbors.
    /// Returns `false` without calling `f` if the cube is not resident.
    fn with_neighborhood(
        &mut self,
        coord: CubeCoord,
        f: &mut dyn FnMut(&mut Cube, &CubeNeighborhood<'_>),
    ) -> bool;
}

/// Plain map of cubes. Handy for driving a pipeline without a full cache.
#[derive(Default)]
pub struct CubeMap {
    cubes: HashMap<CubeCoord, Cube>,
}

impl CubeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cube: Cube) -> Option<Cube> {
        self.cubes.insert(cube.coord(), cube)
    }

    pub fn remove(&mut self, coord: CubeCoord) -> Option<Cube> {
        self.cubes.remove(&coord)
    }

    pub fn len(&self) -> usize {
        self.cubes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cubes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cube> {
        self.cubes.values()
    }
}

impl CubeAccess for CubeMap {
    fn loaded_cube(&self, coord: CubeCoord) -> Option<&Cube> {
        self.cubes.get(&coord)
    }

    fn loaded_cube_mut(&mut self, coord: CubeCoord) -> Option<&mut Cube> {
        self.cubes.get_mut(&coord)
    }

    fn with_neighborhood(
        &mut self,
        coord: CubeCoord,
        f: &mut dyn FnMut(&mut Cube, &CubeNeighborhood<'_>),
    ) -> bool {
        let Some(mut center) = self.cubes.remove(&coord) else {
            return false;
        };
        {
            let cubes = &self.cubes;
            let neighborhood = CubeNeighborhood::collect(coord, |c| cubes.get(&c));
            f(&mut center, &neighborhood);
        }
        self.cubes.insert(coord, center);
        true
    }
}
