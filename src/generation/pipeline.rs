//! Time-budgeted generation pipeline.
//!
//! Every non-terminal [`GenerationStage`] owns a [`ProcessingQueue`]. Each tick
//! splits a fixed wall-clock budget across the stages in proportion to their
//! (capped) backlog, works the stages off in pipeline order and promotes every
//! finished cube to the next stage. Cubes reaching the last stage leave the
//! pipeline.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::ConfigurationError;
use crate::generation::config::PipelineConfig;
use crate::generation::queue::{CubeProcessor, ProcessingQueue};
use crate::world::{Cube, CubeAccess, CubeCoord, GenerationStage, Ticket};

/// Collects one processor per stage; [`build`](Self::build) refuses to
/// produce a pipeline with a stage left unbound.
pub struct PipelineBuilder {
    config: PipelineConfig,
    slots: Vec<Option<Box<dyn CubeProcessor>>>,
    error: Option<ConfigurationError>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            slots: (0..GenerationStage::PROCESSED_COUNT).map(|_| None).collect(),
            error: None,
        }
    }

    /// Bind the processor for `stage`
    pub fn stage(mut self, stage: GenerationStage, processor: impl CubeProcessor + 'static) -> Self {
        self.bind(stage, Box::new(processor));
        self
    }

    /// Bind an already boxed processor
    pub fn stage_boxed(mut self, stage: GenerationStage, processor: Box<dyn CubeProcessor>) -> Self {
        self.bind(stage, processor);
        self
    }

    fn bind(&mut self, stage: GenerationStage, processor: Box<dyn CubeProcessor>) {
        if self.error.is_some() {
            return;
        }
        if stage.is_last_stage() {
            self.error = Some(ConfigurationError::TerminalStage(stage));
            return;
        }
        let slot = &mut self.slots[stage.index()];
        if slot.is_some() {
            self.error = Some(ConfigurationError::DuplicateStage(stage));
            return;
        }
        *slot = Some(processor);
    }

    pub fn build(self) -> Result<GenerationPipeline, ConfigurationError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.config.validate()?;

        let mut queues = Vec::with_capacity(self.slots.len());
        for (index, slot) in self.slots.into_iter().enumerate() {
            let stage = GenerationStage::from_index(index)
                .ok_or_else(|| ConfigurationError::Invalid(format!("no stage at index {}", index)))?;
            let processor = slot.ok_or(ConfigurationError::UnboundStage(stage))?;
            queues.push(ProcessingQueue::new(stage.name(), processor, self.config.max_retries));
        }

        Ok(GenerationPipeline {
            config: self.config,
            queues,
            tracked: HashMap::new(),
        })
    }
}

/// Per-tick summary, mostly for logging and tests
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    pub advanced: usize,
    pub stage_budgets: Vec<Duration>,
    pub elapsed: Duration,
}

/// Validated, fully bound generation pipeline
pub struct GenerationPipeline {
    config: PipelineConfig,
    queues: Vec<ProcessingQueue>,
    /// Tickets pinning every cube currently in the pipeline
    tracked: HashMap<u64, Ticket>,
}

impl GenerationPipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Queue a cube at its current stage. No-op for fully generated cubes.
    /// Returns whether the cube was newly queued.
    pub fn generate(&mut self, cube: &Cube) -> bool {
        let stage = cube.stage();
        if stage.is_last_stage() {
            return false;
        }
        if !cube.coord().is_addressable() {
            log::warn!("Not generating cube {:?}: outside the addressable world", cube.coord());
            return false;
        }
        let address = cube.address();
        self.tracked.entry(address).or_insert_with(|| cube.acquire_ticket());
        self.queues[stage.index()].add(address)
    }

    pub fn is_tracked(&self, coord: CubeCoord) -> bool {
        self.tracked.contains_key(&coord.address())
    }

    /// Cubes currently in the pipeline
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Total backlog over all stages
    pub fn pending_count(&self) -> usize {
        self.queues.iter().map(|q| q.pending_count()).sum()
    }

    pub fn stage_pending(&self, stage: GenerationStage) -> usize {
        self.queues.get(stage.index()).map_or(0, |q| q.pending_count())
    }

    /// Share of the tick budget each stage gets right now, in pipeline order.
    pub fn stage_budgets(&self) -> Vec<Duration> {
        let cap = self.config.backlog_cap;
        let backlogs: Vec<usize> = self.queues.iter().map(|q| q.pending_count().min(cap)).collect();
        let total: usize = backlogs.iter().sum();
        let budget = self.config.tick_budget();
        backlogs
            .into_iter()
            .map(|backlog| {
                if total == 0 {
                    Duration::ZERO
                } else {
                    let nanos = budget.as_nanos() * backlog as u128 / total as u128;
                    Duration::from_nanos(nanos as u64)
                }
            })
            .collect()
    }

    /// Run one scheduling round against `cubes`. Returns the number of cubes
    /// advanced to their next stage.
    pub fn tick(&mut self, cubes: &mut dyn CubeAccess) -> usize {
        self.tick_report(cubes).advanced
    }

    /// [`tick`](Self::tick) with timing details
    pub fn tick_report(&mut self, cubes: &mut dyn CubeAccess) -> TickReport {
        let tick_start = Instant::now();
        let budgets = self.stage_budgets();
        let mut advanced = 0;

        for index in 0..self.queues.len() {
            let budget = budgets[index];
            if budget.is_zero() {
                continue;
            }

            let stage_start = Instant::now();
            let processed = self.queues[index].process_until(stage_start + budget, cubes);
            log::debug!(
                "Stage {} processed {} cubes in {:?} of {:?} ({:.0}%)",
                self.queues[index].name(),
                processed,
                stage_start.elapsed(),
                budget,
                100.0 * budget.as_secs_f64() / self.config.tick_budget().as_secs_f64(),
            );

            for address in self.queues[index].take_dropped() {
                self.tracked.remove(&address);
            }

            let finished = self.queues[index].processed_addresses().to_vec();
            let next = GenerationStage::from_index(index + 1).unwrap_or(GenerationStage::Live);
            for address in finished {
                self.promote(address, next, cubes);
                advanced += 1;
            }
        }

        let elapsed = tick_start.elapsed();
        if advanced > 0 {
            log::info!("Generation pipeline advanced {} cubes in {:?}", advanced, elapsed);
            for queue in &self.queues {
                log::debug!("{}", queue.processing_report());
            }
        }

        TickReport {
            advanced,
            stage_budgets: budgets,
            elapsed,
        }
    }

    /// Move a finished cube to `next` and queue it there, or retire it.
    fn promote(&mut self, address: u64, next: GenerationStage, cubes: &mut dyn CubeAccess) {
        let coord = CubeCoord::from_address(address);
        let Some(cube) = cubes.loaded_cube_mut(coord) else {
            log::warn!("Cube {:?} vanished while in the generation pipeline", coord);
            self.tracked.remove(&address);
            return;
        };

        cube.advance_stage(next);
        let stage = cube.stage();
        if stage.is_last_stage() {
            self.tracked.remove(&address);
        } else {
            self.queues[stage.index()].add(address);
        }
    }

    /// Tick until a round makes no progress. For bulk generation (tools,
    /// fixtures), never during live ticking.
    pub fn generate_all(&mut self, cubes: &mut dyn CubeAccess) -> usize {
        let mut total = 0;
        loop {
            let advanced = self.tick(cubes);
            if advanced == 0 {
                return total;
            }
            total += advanced;
        }
    }

    /// Per-stage queue reports
    pub fn reports(&self) -> Vec<String> {
        self.queues.iter().map(|q| q.processing_report()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GenerationError;
    use crate::generation::queue::CubeFn;
    use crate::world::{CubeMap, CubePrimer};

    fn noop(_: &mut Cube) -> Result<(), GenerationError> {
        Ok(())
    }

    fn full_builder(config: PipelineConfig) -> PipelineBuilder {
        GenerationPipeline::builder(config)
            .stage(GenerationStage::Terrain, CubeFn(noop))
            .stage(GenerationStage::Features, CubeFn(noop))
            .stage(GenerationStage::Lighting, CubeFn(noop))
    }

    fn cubes_in_row(n: i32) -> (CubeMap, Vec<CubeCoord>) {
        let mut map = CubeMap::new();
        let mut coords = Vec::new();
        for x in 0..n {
            let c = CubeCoord::new(x, 0, 0);
            map.insert(Cube::from_primer(c, CubePrimer::new()));
            coords.push(c);
        }
        (map, coords)
    }

    #[test]
    fn test_unbound_stage_rejected() {
        let result = GenerationPipeline::builder(PipelineConfig::default())
            .stage(GenerationStage::Terrain, CubeFn(noop))
            .stage(GenerationStage::Lighting, CubeFn(noop))
            .build();
        assert!(matches!(result, Err(ConfigurationError::UnboundStage(GenerationStage::Features))));
    }

    #[test]
    fn test_terminal_stage_rejected() {
        let result = full_builder(PipelineConfig::default())
            .stage(GenerationStage::Live, CubeFn(noop))
            .build();
        assert!(matches!(result, Err(ConfigurationError::TerminalStage(GenerationStage::Live))));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let result = full_builder(PipelineConfig::default())
            .stage(GenerationStage::Terrain, CubeFn(noop))
            .build();
        assert!(matches!(result, Err(ConfigurationError::DuplicateStage(GenerationStage::Terrain))));
    }

    #[test]
    fn test_budget_goes_to_only_busy_stage() {
        let (map, coords) = cubes_in_row(100);
        let mut pipeline = full_builder(PipelineConfig::default()).build().unwrap();
        for c in &coords {
            pipeline.generate(map.loaded_cube(*c).unwrap());
        }

        let budgets = pipeline.stage_budgets();
        assert_eq!(budgets[0], Duration::from_millis(40));
        assert_eq!(budgets[1], Duration::ZERO);
        assert_eq!(budgets[2], Duration::ZERO);
    }

    #[test]
    fn test_budget_proportional_and_capped() {
        let config = PipelineConfig {
            tick_budget_ms: 40,
            backlog_cap: 10,
            max_retries: None,
        };
        let (mut map, coords) = cubes_in_row(40);
        // 30 cubes waiting for terrain, 10 waiting for features
        for c in &coords[30..] {
            map.loaded_cube_mut(*c).unwrap().advance_stage(GenerationStage::Features);
        }
        let mut pipeline = full_builder(config).build().unwrap();
        for c in &coords {
            pipeline.generate(map.loaded_cube(*c).unwrap());
        }
        assert_eq!(pipeline.stage_pending(GenerationStage::Terrain), 30);
        assert_eq!(pipeline.stage_pending(GenerationStage::Features), 10);

        // Terrain backlog is capped at 10, so both stages get half
        let budgets = pipeline.stage_budgets();
        assert_eq!(budgets[0], Duration::from_millis(20));
        assert_eq!(budgets[1], Duration::from_millis(20));
        assert_eq!(budgets[2], Duration::ZERO);
    }

    #[test]
    fn test_empty_pipeline_ticks_to_zero() {
        let (mut map, _) = cubes_in_row(0);
        let mut pipeline = full_builder(PipelineConfig::default()).build().unwrap();
        assert!(pipeline.stage_budgets().iter().all(|b| b.is_zero()));
        assert_eq!(pipeline.tick(&mut map), 0);
    }

    #[test]
    fn test_tick_promotes_to_next_stage() {
        let (mut map, coords) = cubes_in_row(3);
        let mut pipeline = full_builder(PipelineConfig::default()).build().unwrap();
        for c in &coords {
            pipeline.generate(map.loaded_cube(*c).unwrap());
        }

        assert_eq!(pipeline.tick(&mut map), 3);
        for c in &coords {
            assert_eq!(map.loaded_cube(*c).unwrap().stage(), GenerationStage::Features);
        }
        assert_eq!(pipeline.stage_pending(GenerationStage::Features), 3);
    }

    #[test]
    fn test_generate_all_reaches_live() {
        let (mut map, coords) = cubes_in_row(25);
        let mut pipeline = full_builder(PipelineConfig::default()).build().unwrap();
        for c in &coords {
            pipeline.generate(map.loaded_cube(*c).unwrap());
        }
        assert_eq!(pipeline.tracked_count(), 25);

        let total = pipeline.generate_all(&mut map);
        assert_eq!(total, 25 * 3);
        assert_eq!(pipeline.pending_count(), 0);
        assert_eq!(pipeline.tracked_count(), 0);
        for cube in map.iter() {
            assert_eq!(cube.stage(), GenerationStage::Live);
        }
    }

    #[test]
    fn test_stage_is_monotonic_across_ticks() {
        let (mut map, coords) = cubes_in_row(10);
        let mut pipeline = full_builder(PipelineConfig::default()).build().unwrap();
        for c in &coords {
            pipeline.generate(map.loaded_cube(*c).unwrap());
        }
        let mut last: Vec<GenerationStage> = coords.iter().map(|c| map.loaded_cube(*c).unwrap().stage()).collect();
        while pipeline.tick(&mut map) > 0 {
            for (i, c) in coords.iter().enumerate() {
                let stage = map.loaded_cube(*c).unwrap().stage();
                assert!(stage >= last[i]);
                last[i] = stage;
            }
        }
    }

    #[test]
    fn test_generate_ignores_live_cubes_and_duplicates() {
        let (mut map, coords) = cubes_in_row(1);
        let mut pipeline = full_builder(PipelineConfig::default()).build().unwrap();
        assert!(pipeline.generate(map.loaded_cube(coords[0]).unwrap()));
        assert!(!pipeline.generate(map.loaded_cube(coords[0]).unwrap()));
        assert_eq!(pipeline.pending_count(), 1);

        let live = CubeCoord::new(50, 0, 0);
        let mut cube = Cube::from_primer(live, CubePrimer::new());
        cube.advance_stage(GenerationStage::Live);
        map.insert(cube);
        assert!(!pipeline.generate(map.loaded_cube(live).unwrap()));
        assert!(!pipeline.is_tracked(live));
    }

    #[test]
    fn test_generate_refuses_unaddressable_cube() {
        let far = CubeCoord::new(0, crate::math::address::MAX_Y + 1, 0);
        let mut map = CubeMap::new();
        map.insert(Cube::from_primer(far, CubePrimer::new()));
        let mut pipeline = full_builder(PipelineConfig::default()).build().unwrap();

        assert!(!pipeline.generate(map.loaded_cube(far).unwrap()));
        assert_eq!(pipeline.pending_count(), 0);
        assert_eq!(pipeline.tracked_count(), 0);
        assert_eq!(map.loaded_cube(far).unwrap().tickets().count(), 0);
    }

    #[test]
    fn test_tracked_cubes_hold_tickets() {
        let (mut map, coords) = cubes_in_row(1);
        let mut pipeline = full_builder(PipelineConfig::default()).build().unwrap();
        pipeline.generate(map.loaded_cube(coords[0]).unwrap());
        assert_eq!(map.loaded_cube(coords[0]).unwrap().tickets().count(), 1);

        pipeline.generate_all(&mut map);
        assert_eq!(map.loaded_cube(coords[0]).unwrap().tickets().count(), 0);
    }

    #[test]
    fn test_failing_cube_does_not_stall_others() {
        let bad = CubeCoord::new(0, 0, 0);
        let (mut map, coords) = cubes_in_row(5);
        let mut pipeline = GenerationPipeline::builder(PipelineConfig {
            max_retries: Some(3),
            ..Default::default()
        })
        .stage(
            GenerationStage::Terrain,
            CubeFn(move |cube: &mut Cube| -> Result<(), GenerationError> {
                if cube.coord() == bad {
                    Err(GenerationError::failed(cube.coord(), "bad seed"))
                } else {
                    Ok(())
                }
            }),
        )
        .stage(GenerationStage::Features, CubeFn(noop))
        .stage(GenerationStage::Lighting, CubeFn(noop))
        .build()
        .unwrap();
        for c in &coords {
            pipeline.generate(map.loaded_cube(*c).unwrap());
        }

        pipeline.generate_all(&mut map);
        // Every healthy cube finished; the bad one is still retrying or dropped
        for c in &coords[1..] {
            assert_eq!(map.loaded_cube(*c).unwrap().stage(), GenerationStage::Live);
        }
        assert_eq!(map.loaded_cube(bad).unwrap().stage(), GenerationStage::Terrain);
    }

    #[test]
    fn test_cube_ahead_of_queue_skips_stages() {
        let (mut map, coords) = cubes_in_row(1);
        let mut pipeline = full_builder(PipelineConfig::default()).build().unwrap();
        pipeline.generate(map.loaded_cube(coords[0]).unwrap());
        // Something else finished the cube's lighting while it waited
        map.loaded_cube_mut(coords[0]).unwrap().advance_stage(GenerationStage::Lighting);

        assert_eq!(pipeline.tick(&mut map), 1);
        assert_eq!(map.loaded_cube(coords[0]).unwrap().stage(), GenerationStage::Lighting);
        assert_eq!(pipeline.stage_pending(GenerationStage::Lighting), 1);
        assert_eq!(pipeline.stage_pending(GenerationStage::Features), 0);
    }
}
