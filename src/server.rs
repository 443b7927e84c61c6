//! World facade: one cache, one generation pipeline, one owner thread

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{ConfigurationError, Error, types::Result};
use crate::generation::{default_pipeline, GenerationPipeline, NoiseTerrainGenerator, PipelineConfig, TerrainGenerator, TerrainParams};
use crate::lighting::{LightingProcessor, SkyLightProcessor};
use crate::streaming::{CacheConfig, FileStorage, Requirement, Storage, SweepStats, VolumeCache};
use crate::world::{Column, ColumnCoord, Cube, CubeCoord};

/// Everything needed to open a world
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub seed: u32,
    /// Root directory for [`FileStorage`]
    pub storage_dir: PathBuf,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: 12345,
            storage_dir: PathBuf::from("world"),
            pipeline: PipelineConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl WorldConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        self.pipeline.validate()?;
        self.cache.validate()
    }

    /// Save as pretty-printed JSON
    pub fn save_sync(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load and validate a JSON config. Missing fields take their defaults.
    pub fn load_sync(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Drives a [`VolumeCache`] and a [`GenerationPipeline`] from the host tick.
pub struct CubeWorld {
    cache: VolumeCache,
    pipeline: GenerationPipeline,
    ticks: u64,
}

impl CubeWorld {
    /// Noise terrain and sky light over `storage`
    pub fn new(config: &WorldConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        config.validate()?;
        let generator: Rc<dyn TerrainGenerator> = Rc::new(NoiseTerrainGenerator::new(TerrainParams {
            seed: config.seed,
            ..Default::default()
        }));
        let lighting: Rc<dyn LightingProcessor> = Rc::new(SkyLightProcessor::new());

        let pipeline = default_pipeline(config.pipeline.clone(), Rc::clone(&generator), Rc::clone(&lighting))?;
        let cache = VolumeCache::new(storage, generator, lighting, config.cache.clone())?;
        Ok(Self::from_parts(cache, pipeline))
    }

    /// Open the world stored under `config.storage_dir`
    pub fn open(config: &WorldConfig) -> Result<Self> {
        log::info!("Opening world at {} (seed {})", config.storage_dir.display(), config.seed);
        Self::new(config, Arc::new(FileStorage::new(&config.storage_dir)))
    }

    /// Assemble from a custom cache and pipeline
    pub fn from_parts(cache: VolumeCache, pipeline: GenerationPipeline) -> Self {
        Self {
            cache,
            pipeline,
            ticks: 0,
        }
    }

    pub fn cache(&self) -> &VolumeCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut VolumeCache {
        &mut self.cache
    }

    pub fn pipeline(&self) -> &GenerationPipeline {
        &self.pipeline
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn get_column(&mut self, coord: ColumnCoord, req: Requirement) -> Option<&mut Column> {
        self.cache.get_column(coord, req)
    }

    pub fn get_cube(&mut self, coord: CubeCoord, req: Requirement) -> Option<&mut Cube> {
        self.cache.get_cube(coord, req)
    }

    /// Hand every newly resident, incomplete cube to the pipeline
    fn enqueue_generated(&mut self) -> usize {
        let mut queued = 0;
        for coord in self.cache.take_pending_generation() {
            if let Some(cube) = self.cache.loaded_cube(coord) {
                if self.pipeline.generate(cube) {
                    queued += 1;
                }
            }
        }
        queued
    }

    /// One host tick. Returns the number of cubes advanced by the pipeline.
    pub fn tick(&mut self) -> usize {
        self.cache.poll_async();
        self.enqueue_generated();

        let advanced = self.pipeline.tick(&mut self.cache);

        self.ticks += 1;
        self.cache.advance_world_time();
        if self.ticks % self.cache.config().sweep_interval_ticks == 0 {
            let stats = self.sweep_unused();
            if stats.cubes_unloaded > 0 || stats.columns_unloaded > 0 {
                // Evicted records sit in the storage buffer until written out
                self.cache.flush();
            }
        }
        advanced
    }

    pub fn sweep_unused(&mut self) -> SweepStats {
        self.cache.sweep_unused()
    }

    /// Finish all outstanding loads and run every queued cube to completion
    pub fn generate_all(&mut self) -> usize {
        self.cache.wait_idle();
        self.enqueue_generated();
        self.pipeline.generate_all(&mut self.cache)
    }

    pub fn save_all(&mut self) -> bool {
        self.cache.save_all()
    }

    /// Deliver outstanding loads, then write out buffered storage
    pub fn flush(&mut self) {
        self.cache.wait_idle();
        self.cache.flush();
    }

    /// Deliver outstanding loads, save everything and flush storage
    pub fn shutdown(&mut self) {
        self.cache.wait_idle();
        self.save_all();
        self.flush();
        log::info!("World shut down after {} ticks: {}", self.ticks, self.cache);
    }
}
