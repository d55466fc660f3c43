use anchor_graph::{Axis, GraphError, NodeId};
use anchor_solver::SolverError;

/// Errors from the layout engine.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("relation mixes the {first:?} and {second:?} axes")]
    MixedAxes { first: Axis, second: Axis },

    #[error("node {0:?} was neither resolved by the graph nor given a variable")]
    Unplaced(NodeId),

    #[error("element {index} cannot attach to element {target} on the {axis:?} axis")]
    InvalidAttachment { index: usize, target: usize, axis: Axis },

    #[error("trace serialization failed: {0}")]
    Trace(#[from] serde_json::Error),
}
