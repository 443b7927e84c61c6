//! Effort tiers for cube and column requests

use serde::{Deserialize, Serialize};

/// How much work a request may do to produce its result.
///
/// Tiers are ordered: anything guaranteed at a lower tier is also
/// guaranteed at every higher one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Requirement {
    /// Only return what is already in memory
    LoadCached,
    /// Read from disk if absent, never generate
    Load,
    /// Generate raw terrain if nothing is stored
    Generate,
    /// Also force population over the generator's footprint
    Populate,
    /// Also force initial sky light diffusion
    Light,
}

impl Requirement {
    /// Tier the owning column has to reach for a cube request at this tier.
    /// Columns have no population or lighting of their own.
    pub fn column_requirement(self) -> Requirement {
        match self {
            Requirement::LoadCached => Requirement::LoadCached,
            Requirement::Load => Requirement::Load,
            _ => Requirement::Generate,
        }
    }

    /// Whether this tier may run the terrain generator
    pub fn allows_generation(self) -> bool {
        self >= Requirement::Generate
    }

    /// Whether this tier may touch storage
    pub fn allows_io(self) -> bool {
        self != Requirement::LoadCached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_are_ordered() {
        assert!(Requirement::LoadCached < Requirement::Load);
        assert!(Requirement::Load < Requirement::Generate);
        assert!(Requirement::Generate < Requirement::Populate);
        assert!(Requirement::Populate < Requirement::Light);
    }

    #[test]
    fn test_column_requirement() {
        assert_eq!(Requirement::LoadCached.column_requirement(), Requirement::LoadCached);
        assert_eq!(Requirement::Load.column_requirement(), Requirement::Load);
        assert_eq!(Requirement::Populate.column_requirement(), Requirement::Generate);
        assert_eq!(Requirement::Light.column_requirement(), Requirement::Generate);
    }

    #[test]
    fn test_generation_and_io() {
        assert!(!Requirement::Load.allows_generation());
        assert!(Requirement::Generate.allows_generation());
        assert!(!Requirement::LoadCached.allows_io());
        assert!(Requirement::Load.allows_io());
    }
}
