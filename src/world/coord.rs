//! Cube and column coordinates

use glam::IVec3;

use crate::math::address;

/// Block position in world space
pub type BlockPos = IVec3;

/// Integer coordinate identifying a cube in the world grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CubeCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CubeCoord {
    /// Create a new cube coordinate
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Coordinate of the column this cube stands in
    pub const fn column(&self) -> ColumnCoord {
        ColumnCoord::new(self.x, self.z)
    }

    /// Offset by a relative cube delta
    pub const fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Whether this coordinate fits the packed address layout
    pub fn is_addressable(&self) -> bool {
        address::in_range(self.x, self.y, self.z)
    }

    /// Packed 64-bit address used as queue key
    pub fn address(&self) -> u64 {
        address::encode_address(self.x, self.y, self.z)
    }

    /// Inverse of [`CubeCoord::address`]
    pub fn from_address(address: u64) -> Self {
        let (x, y, z) = address::decode_address(address);
        Self { x, y, z }
    }

    /// Cube containing a block position
    pub fn from_block(pos: BlockPos) -> Self {
        let size = crate::world::CUBE_SIZE as i32;
        Self::new(pos.x.div_euclid(size), pos.y.div_euclid(size), pos.z.div_euclid(size))
    }

    /// Minimum-corner block of this cube
    pub fn min_block(&self) -> BlockPos {
        IVec3::new(self.x, self.y, self.z) * crate::world::CUBE_SIZE as i32
    }
}

/// Integer coordinate identifying a column (vertical stack of cubes)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnCoord {
    pub x: i32,
    pub z: i32,
}

impl ColumnCoord {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Cube at height `y` in this column
    pub const fn cube(&self, y: i32) -> CubeCoord {
        CubeCoord::new(self.x, y, self.z)
    }
}
