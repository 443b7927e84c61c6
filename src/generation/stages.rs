//! Default processors for the non-terminal generation stages
//!
//! Each one checks the cube's own flags first, so a cube the cache already
//! forced past a step (population, lighting) is passed through untouched.

use std::rc::Rc;

use crate::core::{ConfigurationError, GenerationError};
use crate::generation::config::PipelineConfig;
use crate::generation::generator::TerrainGenerator;
use crate::generation::pipeline::GenerationPipeline;
use crate::generation::queue::CubeProcessor;
use crate::lighting::LightingProcessor;
use crate::world::{CubeAccess, CubeCoord, GenerationStage};

/// Terrain: seed sky light from the cube's own voxels
pub struct SkylightSeedStage {
    lighting: Rc<dyn LightingProcessor>,
}

impl SkylightSeedStage {
    pub fn new(lighting: Rc<dyn LightingProcessor>) -> Self {
        Self { lighting }
    }
}

impl CubeProcessor for SkylightSeedStage {
    fn process(&mut self, coord: CubeCoord, cubes: &mut dyn CubeAccess) -> Result<(), GenerationError> {
        let cube = cubes
            .loaded_cube_mut(coord)
            .ok_or(GenerationError::CubeNotLoaded(coord))?;
        if !cube.is_skylight_seeded() {
            self.lighting.initialize_skylight(cube);
        }
        Ok(())
    }
}

/// Features: run the generator's population on the cube itself
pub struct PopulateStage {
    generator: Rc<dyn TerrainGenerator>,
}

impl PopulateStage {
    pub fn new(generator: Rc<dyn TerrainGenerator>) -> Self {
        Self { generator }
    }
}

impl CubeProcessor for PopulateStage {
    fn process(&mut self, coord: CubeCoord, cubes: &mut dyn CubeAccess) -> Result<(), GenerationError> {
        let cube = cubes
            .loaded_cube_mut(coord)
            .ok_or(GenerationError::CubeNotLoaded(coord))?;
        if !cube.is_populated() {
            self.generator.populate(cube)?;
            cube.set_populated(true);
        }
        Ok(())
    }
}

/// Lighting: diffuse sky light across whatever neighbors are resident.
///
/// This is a preliminary pass. The cube stays not initially lit, so a later
/// `Light` request still resolves the full neighborhood and diffuses again.
pub struct DiffuseStage {
    lighting: Rc<dyn LightingProcessor>,
}

impl DiffuseStage {
    pub fn new(lighting: Rc<dyn LightingProcessor>) -> Self {
        Self { lighting }
    }
}

impl CubeProcessor for DiffuseStage {
    fn process(&mut self, coord: CubeCoord, cubes: &mut dyn CubeAccess) -> Result<(), GenerationError> {
        let lighting = &self.lighting;
        let found = cubes.with_neighborhood(coord, &mut |cube, neighbors| {
            if !cube.is_initial_lighting_done() {
                lighting.diffuse_skylight(cube, neighbors);
            }
        });
        if found { Ok(()) } else { Err(GenerationError::CubeNotLoaded(coord)) }
    }
}

/// Pipeline with the default processor bound to every stage
pub fn default_pipeline(
    config: PipelineConfig,
    generator: Rc<dyn TerrainGenerator>,
    lighting: Rc<dyn LightingProcessor>,
) -> Result<GenerationPipeline, ConfigurationError> {
    GenerationPipeline::builder(config)
        .stage(GenerationStage::Terrain, SkylightSeedStage::new(lighting.clone()))
        .stage(GenerationStage::Features, PopulateStage::new(generator))
        .stage(GenerationStage::Lighting, DiffuseStage::new(lighting))
        .build()
}
