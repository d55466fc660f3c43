use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use tracing::trace;

use crate::row::RowId;
use crate::solver::SolverError;
use crate::strength::{Strength, StrengthVector};

new_key_type! {
    /// Handle to a variable of the current pass. Handles from a previous
    /// pass are rejected after `VariableRegistry::reset`.
    pub struct VariableId;
}

/// Opaque key of whatever owns a variable (usually a widget anchor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Owner(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// A position or size; may take any sign.
    Unrestricted,
    /// A fixed value folded into row constants; never basic.
    Constant,
    /// Non-negative slack of an inequality.
    Slack,
    /// Non-negative deviation of a soft relation.
    Error,
    /// Placeholder; reaching a pivot with one is a caller bug.
    Unknown,
}

impl VariableKind {
    /// Restricted variables must stay non-negative.
    pub fn is_restricted(self) -> bool {
        matches!(self, VariableKind::Slack | VariableKind::Error)
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub kind: VariableKind,
    pub owner: Option<Owner>,
    /// Value at the last solved basis.
    pub value: f64,
    /// Row this variable is basic in, if any.
    pub definition: Option<RowId>,
    pub strength: Option<Strength>,
    /// Rows whose right-hand side references this variable.
    pub client_rows: BTreeSet<RowId>,
    /// Objective weight carried by error variables.
    pub goal: StrengthVector,
}

impl Variable {
    fn new(kind: VariableKind, owner: Option<Owner>) -> Self {
        Self {
            kind,
            owner,
            value: 0.0,
            definition: None,
            strength: None,
            client_rows: BTreeSet::new(),
            goal: StrengthVector::zeros(),
        }
    }

    fn recycle(&mut self) {
        self.value = 0.0;
        self.definition = None;
        self.strength = None;
        self.client_rows.clear();
        self.goal = StrengthVector::zeros();
    }

    pub fn is_basic(&self) -> bool {
        self.definition.is_some()
    }
}

/// Allocates the unknowns of one pass and recycles their records across
/// passes, keyed by kind and owner.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    variables: SlotMap<VariableId, Variable>,
    owned: HashMap<(VariableKind, Owner), VariableId>,
    pool: HashMap<(VariableKind, Option<Owner>), Vec<Variable>>,
    sealed: bool,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variable of `kind` owned by `owner`. Repeated calls within a pass
    /// return the same id.
    pub fn declare(&mut self, kind: VariableKind, owner: Owner) -> Result<VariableId, SolverError> {
        if let Some(id) = self.lookup(kind, owner) {
            return Ok(id);
        }
        let id = self.insert(kind, Some(owner))?;
        self.owned.insert((kind, owner), id);
        Ok(id)
    }

    /// Anonymous variable (slack, error, artificial).
    pub fn allocate(&mut self, kind: VariableKind) -> Result<VariableId, SolverError> {
        self.insert(kind, None)
    }

    pub fn allocate_slack(&mut self) -> Result<VariableId, SolverError> {
        self.allocate(VariableKind::Slack)
    }

    /// Error variable penalized with unit weight at `strength`'s tier.
    pub fn allocate_error(&mut self, strength: Strength) -> Result<VariableId, SolverError> {
        let id = self.allocate(VariableKind::Error)?;
        let variable = &mut self.variables[id];
        variable.strength = Some(strength);
        variable.goal = strength.unit_vector();
        Ok(id)
    }

    pub fn declare_constant(&mut self, value: f64) -> Result<VariableId, SolverError> {
        if !value.is_finite() {
            return Err(SolverError::NonFinite { what: "constant", value });
        }
        let id = self.allocate(VariableKind::Constant)?;
        self.variables[id].value = value;
        Ok(id)
    }

    fn insert(&mut self, kind: VariableKind, owner: Option<Owner>) -> Result<VariableId, SolverError> {
        if self.sealed {
            return Err(SolverError::PassSealed);
        }
        let variable = match self.pool.get_mut(&(kind, owner)).and_then(Vec::pop) {
            Some(mut recycled) => {
                recycled.recycle();
                recycled
            }
            None => Variable::new(kind, owner),
        };
        let id = self.variables.insert(variable);
        trace!(?id, ?kind, ?owner, "variable allocated");
        Ok(id)
    }

    pub fn get(&self, id: VariableId) -> Result<&Variable, SolverError> {
        self.variables.get(id).ok_or(SolverError::UnknownVariable(id))
    }

    pub fn get_mut(&mut self, id: VariableId) -> Result<&mut Variable, SolverError> {
        self.variables.get_mut(id).ok_or(SolverError::UnknownVariable(id))
    }

    pub fn contains(&self, id: VariableId) -> bool {
        self.variables.contains_key(id)
    }

    pub fn kind(&self, id: VariableId) -> Result<VariableKind, SolverError> {
        Ok(self.get(id)?.kind)
    }

    pub fn value(&self, id: VariableId) -> Result<f64, SolverError> {
        Ok(self.get(id)?.value)
    }

    pub fn owner(&self, id: VariableId) -> Option<Owner> {
        self.variables.get(id).and_then(|v| v.owner)
    }

    pub fn lookup(&self, kind: VariableKind, owner: Owner) -> Option<VariableId> {
        self.owned.get(&(kind, owner)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VariableId, &Variable)> {
        self.variables.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (VariableId, &mut Variable)> {
        self.variables.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Number of recycled records waiting for the next pass.
    pub fn pooled(&self) -> usize {
        self.pool.values().map(Vec::len).sum()
    }

    /// Close the pass: no new variables until `reset`.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Invalidate every outstanding id and return the records to the pool.
    pub fn reset(&mut self) {
        for (_, variable) in self.variables.drain() {
            self.pool
                .entry((variable.kind, variable.owner))
                .or_default()
                .push(variable);
        }
        self.owned.clear();
        self.sealed = false;
    }
}
