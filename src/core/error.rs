//! Error types for the cube world

use std::path::PathBuf;

use thiserror::Error;

use crate::world::{CubeCoord, GenerationStage};

/// Pipeline or config file set up incorrectly. Only produced at startup.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("generator pipeline stage {0:?} has no processor bound")]
    UnboundStage(GenerationStage),

    #[error("stage {0:?} is terminal and cannot have a processor")]
    TerminalStage(GenerationStage),

    #[error("stage {0:?} was bound twice")]
    DuplicateStage(GenerationStage),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Disk read/write failure. The cache logs these and treats them as a miss
/// (read) or a skipped save (write).
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(String),

    #[error("failed to decode record: {0}")]
    Decode(String),

    #[error("LZ4 decompression failed: {0}")]
    Compression(String),

    #[error("record for {found:?} stored under {expected:?}")]
    CoordinateMismatch { expected: CubeCoord, found: CubeCoord },

    #[error("storage panicked during a background load: {0}")]
    Panicked(String),
}

/// Terrain, population or pipeline stage failure for a single cube.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("cube {0:?} is not loaded")]
    CubeNotLoaded(CubeCoord),

    #[error("generation failed for {coord:?}: {reason}")]
    Failed { coord: CubeCoord, reason: String },
}

impl GenerationError {
    pub fn failed(coord: CubeCoord, reason: impl Into<String>) -> Self {
        Self::Failed {
            coord,
            reason: reason.into(),
        }
    }
}

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file error: {0}")]
    Config(String),
}
