//! World data model: coordinates, cubes, columns, generation stages and tickets

pub mod coord;
pub mod stage;
pub mod ticket;
pub mod cube;
pub mod column;
pub mod access;

pub use coord::{BlockPos, ColumnCoord, CubeCoord};
pub use stage::GenerationStage;
pub use ticket::{Ticket, TicketSet};
pub use cube::{
    local_index, Cube, CubeNeighborhood, CubePrimer, AIR, CUBE_SIZE, CUBE_VOLUME, MAX_LIGHT,
};
pub use column::{Column, BIOME_CELLS};
pub use access::{CubeAccess, CubeMap};
