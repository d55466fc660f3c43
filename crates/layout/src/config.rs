//! Configuration for a layout pass.

use anchor_solver::SolverConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Settings shared by both axis tableaux.
    pub solver: SolverConfig,
    /// Solve the horizontal and vertical tableaux on two workers.
    pub parallel_axes: bool,
    /// Keep a `PassTrace` of the last pass.
    pub record_trace: bool,
    /// Keep a `NamingContext` with readable labels for nodes and variables.
    pub debug_names: bool,
}

impl LayoutConfig {
    /// Both axes solved concurrently.
    pub fn parallel() -> Self {
        Self {
            parallel_axes: true,
            ..Self::default()
        }
    }

    /// Trace and readable names, for inspecting a pass.
    pub fn debug() -> Self {
        Self {
            record_trace: true,
            debug_names: true,
            ..Self::default()
        }
    }
}
