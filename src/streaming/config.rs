//! Volume cache configuration

use serde::{Deserialize, Serialize};

use crate::core::ConfigurationError;

/// Settings for [`VolumeCache`](crate::streaming::VolumeCache) and its I/O executor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Blocking worker threads for background disk reads
    pub io_threads: usize,
    /// Ticks between two unused-cube sweeps
    pub sweep_interval_ticks: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            io_threads: 2,
            sweep_interval_ticks: 20,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.io_threads == 0 {
            return Err(ConfigurationError::Invalid("io_threads must be positive".into()));
        }
        if self.sweep_interval_ticks == 0 {
            return Err(ConfigurationError::Invalid("sweep_interval_ticks must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CacheConfig::default();
        assert_eq!(config.io_threads, 2);
        assert_eq!(config.sweep_interval_ticks, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = CacheConfig {
            io_threads: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigurationError::Invalid(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CacheConfig = serde_json::from_str(r#"{ "io_threads": 4 }"#).unwrap();
        assert_eq!(config.io_threads, 4);
        assert_eq!(config.sweep_interval_ticks, 20);
    }
}
