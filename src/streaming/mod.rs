//! Cube and column residency: storage, background loads and the volume cache

pub mod async_loader;
pub mod cache;
pub mod config;
pub mod disk_io;
pub mod requirement;

pub use async_loader::{AsyncLoadExecutor, LoadResult};
pub use cache::{ColumnCallback, CubeCallback, SweepStats, VolumeCache};
pub use config::CacheConfig;
pub use disk_io::{
    column_path, compress_column, compress_cube, cube_path, decompress_column, decompress_cube, ColumnData,
    CubeData, FileStorage, MemoryStorage, Storage, StorageCounters,
};
pub use requirement::Requirement;
