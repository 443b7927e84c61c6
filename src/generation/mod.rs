//! Staged cube generation
//!
//! Cubes move through [`GenerationStage`](crate::world::GenerationStage)s under
//! a per-tick time budget shared between the stages.

pub mod config;
pub mod generator;
pub mod pipeline;
pub mod queue;
pub mod stages;

pub use config::PipelineConfig;
pub use generator::{CreatureType, NoiseTerrainGenerator, SpawnEntry, TerrainGenerator, TerrainParams};
pub use pipeline::{GenerationPipeline, PipelineBuilder, TickReport};
pub use queue::{CubeFn, CubeProcessor, ProcessingQueue, QueueStats};
pub use stages::{default_pipeline, DiffuseStage, PopulateStage, SkylightSeedStage};
