//! Barrier aggregation.
//!
//! A barrier follows the outermost of its dependencies: the minimum for a
//! leading barrier and the maximum for a trailing one. It only resolves once
//! every dependency has resolved against the same base, then pushes its
//! value to its opposite node.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::graph::{GraphError, ResolutionGraph};
use crate::node::{BarrierId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarrierSide {
    /// Left or top: follows the smallest dependency.
    Leading,
    /// Right or bottom: follows the largest dependency.
    Trailing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Barrier {
    pub node: NodeId,
    pub side: BarrierSide,
    pub dependencies: Vec<NodeId>,
    /// Added to the aggregated value.
    pub margin: f64,
}

impl Barrier {
    /// Aggregate already-resolved dependency offsets.
    pub fn extreme(&self, offsets: impl IntoIterator<Item = f64>) -> Option<f64> {
        let fold: fn(f64, f64) -> f64 = match self.side {
            BarrierSide::Leading => f64::min,
            BarrierSide::Trailing => f64::max,
        };
        offsets.into_iter().reduce(fold).map(|value| value + self.margin)
    }
}

impl ResolutionGraph {
    /// Resolve a barrier if its gate is open. Returns the nodes it settled.
    pub(crate) fn aggregate(&mut self, id: BarrierId) -> Result<Vec<NodeId>, GraphError> {
        let barrier = self.barrier(id)?.clone();
        let node = self.node(barrier.node)?;
        if node.is_resolved() || node.is_removed() {
            return Ok(Vec::new());
        }

        let mut base = None;
        let mut offsets = Vec::with_capacity(barrier.dependencies.len());
        for (index, dependency) in barrier.dependencies.iter().enumerate() {
            let dependency = self.node(*dependency)?;
            if !dependency.is_resolved() {
                trace!(?id, index, "barrier gate closed");
                return Ok(Vec::new());
            }
            if index > 0 && dependency.resolved_base != base {
                debug!(?id, "barrier dependencies resolve against different bases");
                return Ok(Vec::new());
            }
            base = dependency.resolved_base;
            offsets.push(dependency.resolved_offset);
        }
        let Some(value) = barrier.extreme(offsets) else {
            return Ok(Vec::new());
        };

        debug!(?id, value, side = ?barrier.side, "barrier resolved");
        let mut settled = vec![barrier.node];
        self.settle(barrier.node, base, value)?;
        if let Some(opposite) = self.node(barrier.node)?.opposite {
            let opposite_node = self.node(opposite)?;
            if !opposite_node.is_resolved() && !opposite_node.is_removed() {
                self.settle(opposite, base, value)?;
                settled.push(opposite);
            }
        }
        Ok(settled)
    }
}
