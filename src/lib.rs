//! Cubeworld - a cubic-chunk voxel world with budgeted staged generation

pub mod core;
pub mod math;
pub mod world;
pub mod generation;
pub mod lighting;
pub mod streaming;
pub mod server;
