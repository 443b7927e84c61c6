//! Generation stages a cube passes through

use serde::{Deserialize, Serialize};

/// Ordered generation stage. The value is the lowest stage whose work is
/// still outstanding; [`GenerationStage::Live`] means fully generated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GenerationStage {
    Terrain,
    Features,
    Lighting,
    Live,
}

impl GenerationStage {
    /// All stages in pipeline order
    pub const ALL: [GenerationStage; 4] = [
        GenerationStage::Terrain,
        GenerationStage::Features,
        GenerationStage::Lighting,
        GenerationStage::Live,
    ];

    /// Number of stages that own a processing queue
    pub const PROCESSED_COUNT: usize = Self::ALL.len() - 1;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn is_last_stage(self) -> bool {
        self == GenerationStage::Live
    }

    /// Following stage; the last stage maps to itself
    pub fn next(self) -> Self {
        Self::from_index(self.index() + 1).unwrap_or(self)
    }

    pub fn name(self) -> &'static str {
        match self {
            GenerationStage::Terrain => "terrain",
            GenerationStage::Features => "features",
            GenerationStage::Lighting => "lighting",
            GenerationStage::Live => "live",
        }
    }
}
