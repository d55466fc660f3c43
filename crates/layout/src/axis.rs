use std::collections::BTreeMap;

use anchor_graph::{Axis, NodeId};
use anchor_solver::{
    LinearSystem, Owner, RelationRequest, RowHandle, SolverConfig, SolverError, SolverResult,
    VariableId,
};

/// The tableau of one axis together with the variables of its nodes.
#[derive(Debug, Clone)]
pub struct AxisSystem {
    axis: Axis,
    system: LinearSystem,
    variables: BTreeMap<NodeId, VariableId>,
}

impl AxisSystem {
    pub fn new(axis: Axis, config: SolverConfig) -> Self {
        Self {
            axis,
            system: LinearSystem::new(config),
            variables: BTreeMap::new(),
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn system(&self) -> &LinearSystem {
        &self.system
    }

    pub fn reset(&mut self, record_events: bool) {
        self.system.reset();
        self.system.record_events(record_events);
        self.variables.clear();
    }

    /// Variable of `node`, created on first use. Owners are declaration
    /// ordinals so that an unchanged scene reuses the same pooled records
    /// pass after pass.
    pub fn declare(&mut self, node: NodeId) -> Result<VariableId, SolverError> {
        if let Some(id) = self.variables.get(&node) {
            return Ok(*id);
        }
        let id = self.system.declare(Owner(self.variables.len() as u64))?;
        self.variables.insert(node, id);
        Ok(id)
    }

    pub fn variable(&self, node: NodeId) -> Option<VariableId> {
        self.variables.get(&node).copied()
    }

    pub fn variables(&self) -> impl Iterator<Item = (NodeId, VariableId)> + '_ {
        self.variables.iter().map(|(node, id)| (*node, *id))
    }

    pub fn add(&mut self, request: &RelationRequest) -> Result<RowHandle, SolverError> {
        self.system.add_relation(request)
    }

    pub fn solve(&mut self) -> Result<SolverResult, SolverError> {
        self.system.solve()
    }

    pub fn value(&self, id: VariableId) -> Result<f64, SolverError> {
        self.system.value(id)
    }
}
