use nalgebra::SVector;
use serde::{Deserialize, Serialize};

/// Number of soft priority tiers the objective is minimized over.
pub const TIER_COUNT: usize = 8;

/// Per-tier objective contributions, index 0 being the most rigid tier.
pub type StrengthVector = SVector<f64, TIER_COUNT>;

/// Coefficients smaller than this are treated as zero.
pub const ZERO_TOLERANCE: f64 = 1.0e-8;

pub fn near_zero(value: f64) -> bool {
    value.abs() < ZERO_TOLERANCE
}

/// Priority tier of a soft relation. Ordered from weakest to most rigid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Strength {
    Low,
    Medium,
    High,
    Highest,
    Equality,
    Barrier,
    Centering,
    Fixed,
}

impl Strength {
    /// All strengths, most rigid first (objective tier order).
    pub const TIERS: [Strength; TIER_COUNT] = [
        Strength::Fixed,
        Strength::Centering,
        Strength::Barrier,
        Strength::Equality,
        Strength::Highest,
        Strength::High,
        Strength::Medium,
        Strength::Low,
    ];

    /// Position of this strength in the objective vector.
    pub fn tier(self) -> usize {
        match self {
            Strength::Fixed => 0,
            Strength::Centering => 1,
            Strength::Barrier => 2,
            Strength::Equality => 3,
            Strength::Highest => 4,
            Strength::High => 5,
            Strength::Medium => 6,
            Strength::Low => 7,
        }
    }

    pub fn from_tier(tier: usize) -> Option<Strength> {
        Self::TIERS.get(tier).copied()
    }

    /// Unit weight at this strength's tier.
    pub fn unit_vector(self) -> StrengthVector {
        let mut weights = StrengthVector::zeros();
        weights[self.tier()] = 1.0;
        weights
    }
}

/// Whether a relation must hold exactly or may be violated at a cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// No error term; holds exactly whenever the system is feasible.
    #[default]
    Required,
    /// Penalized through error variables at the given tier.
    Soft(Strength),
}

impl Priority {
    pub fn is_required(self) -> bool {
        matches!(self, Priority::Required)
    }
}

pub fn is_zero_vector(weights: &StrengthVector) -> bool {
    weights.iter().all(|w| near_zero(*w))
}
