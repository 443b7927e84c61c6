//! Pipeline scheduling configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ConfigurationError;

/// Scheduling knobs for [`GenerationPipeline`](crate::generation::GenerationPipeline).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Wall-clock budget per tick in milliseconds (a 20 Hz host tick has 50 ms in total).
    pub tick_budget_ms: u64,
    /// Backlog above this many cubes no longer increases a stage's share.
    pub backlog_cap: usize,
    /// Failed attempts after which a cube is dropped from its stage.
    /// `None` keeps retrying forever.
    pub max_retries: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_budget_ms: 40,
            backlog_cap: 500,
            max_retries: None,
        }
    }
}

impl PipelineConfig {
    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_budget_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.tick_budget_ms == 0 {
            return Err(ConfigurationError::Invalid("tick_budget_ms must be positive".into()));
        }
        if self.backlog_cap == 0 {
            return Err(ConfigurationError::Invalid("backlog_cap must be positive".into()));
        }
        Ok(())
    }
}
