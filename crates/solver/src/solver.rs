use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use crate::builder::{Equation, RelationRequest, RowBuilder};
use crate::row::{Expression, GoalRow, Row, RowId};
use crate::strength::{near_zero, Priority, Strength, TIER_COUNT, ZERO_TOLERANCE};
use crate::variable::{Owner, Variable, VariableId, VariableKind, VariableRegistry};

/// Tier that conflicting required rows fall back to.
const DEMOTED_STRENGTH: Strength = Strength::Fixed;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("variable {0:?} does not belong to the current pass")]
    UnknownVariable(VariableId),
    #[error("variable {id:?} of kind {kind:?} cannot take part in a pivot")]
    InvalidPivot { id: VariableId, kind: VariableKind },
    #[error("the pass has already been solved; reset before adding variables or rows")]
    PassSealed,
    #[error("the pass has not been solved yet")]
    NotSolved,
    #[error("bias {0} is outside [0, 1]")]
    InvalidBias(f64),
    #[error("{what} must be finite, got {value}")]
    NonFinite { what: &'static str, value: f64 },
}

/// Conditions the solver recovers from. The basis is still usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SolverWarning {
    /// A required row contradicted earlier rows and was kept as a soft row
    /// at the strongest tier instead.
    Demoted { handle: RowHandle },
    /// The pivot budget ran out before the objective was optimal.
    IterationLimit { iterations: usize },
    /// An improving variable had no leaving row at this tier.
    Unbounded { tier: usize },
}

/// Configuration for the tableau solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum number of pivots per pass, both phases included.
    pub max_iterations: usize,
    /// Largest objective value still counted as feasible when looking for
    /// an initial basis with an artificial variable.
    pub tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            tolerance: 1e-8,
        }
    }
}

/// Insertion-order handle of a relation added to the tableau.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowHandle(pub usize);

/// What happened to an inserted relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// Entered the tableau as a row.
    Inserted,
    /// Already implied by earlier rows; nothing was added.
    Redundant,
    /// Required but conflicting; entered as a soft row.
    Demoted,
}

/// Pivot-level trace, recorded only when enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SolverEvent {
    RowInserted {
        handle: RowHandle,
        subject: VariableId,
    },
    ArtificialPhase {
        handle: RowHandle,
        feasible: bool,
    },
    Pivot {
        entering: VariableId,
        leaving: VariableId,
        /// `None` while searching for a feasible basis.
        tier: Option<usize>,
    },
    TierSettled {
        tier: usize,
        value: f64,
    },
    Demoted {
        handle: RowHandle,
    },
}

/// Result of running the tableau solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverResult {
    pub iterations: usize,
    pub rows: usize,
    /// Remaining objective per tier, most rigid first.
    pub objective: [f64; TIER_COUNT],
    pub warnings: Vec<SolverWarning>,
}

impl SolverResult {
    /// True when nothing had to be demoted or cut short.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Feasibility,
    Objective,
}

struct Snapshot {
    registry: VariableRegistry,
    rows: SlotMap<RowId, Row>,
    objective: GoalRow,
}

/// Sparse simplex tableau minimizing a lexicographic, tiered objective.
#[derive(Debug, Clone, Default)]
pub struct LinearSystem {
    config: SolverConfig,
    registry: VariableRegistry,
    rows: SlotMap<RowId, Row>,
    objective: GoalRow,
    artificial: Option<GoalRow>,
    dispositions: Vec<Disposition>,
    warnings: Vec<SolverWarning>,
    events: Option<Vec<SolverEvent>>,
    iterations: usize,
}

impl LinearSystem {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Start or stop collecting `SolverEvent`s.
    pub fn record_events(&mut self, enabled: bool) {
        self.events = enabled.then(Vec::new);
    }

    pub fn events(&self) -> &[SolverEvent] {
        self.events.as_deref().unwrap_or(&[])
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut VariableRegistry {
        &mut self.registry
    }

    /// Drop every row and invalidate every variable id. Pooled records and
    /// arena capacity are kept for the next pass.
    pub fn reset(&mut self) {
        self.registry.reset();
        self.rows.clear();
        self.objective = GoalRow::new();
        self.artificial = None;
        self.dispositions.clear();
        self.warnings.clear();
        if let Some(events) = &mut self.events {
            events.clear();
        }
        self.iterations = 0;
    }

    /// Unrestricted variable owned by `owner`.
    pub fn declare(&mut self, owner: Owner) -> Result<VariableId, SolverError> {
        self.registry.declare(VariableKind::Unrestricted, owner)
    }

    pub fn is_solved(&self) -> bool {
        self.registry.is_sealed()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn disposition(&self, handle: RowHandle) -> Option<Disposition> {
        self.dispositions.get(handle.0).copied()
    }

    pub fn warnings(&self) -> &[SolverWarning] {
        &self.warnings
    }

    /// Value at the solved basis.
    pub fn value(&self, id: VariableId) -> Result<f64, SolverError> {
        if !self.is_solved() {
            return Err(SolverError::NotSolved);
        }
        self.registry.value(id)
    }

    pub fn add_relation(&mut self, request: &RelationRequest) -> Result<RowHandle, SolverError> {
        if self.is_solved() {
            return Err(SolverError::PassSealed);
        }
        let equation = RowBuilder::new(&mut self.registry).build(request)?;
        self.add_equation(equation)
    }

    /// Insert an equation produced by `RowBuilder`.
    pub fn add_equation(&mut self, equation: Equation) -> Result<RowHandle, SolverError> {
        if self.is_solved() {
            return Err(SolverError::PassSealed);
        }
        let handle = RowHandle(self.dispositions.len());
        let expression = self.normalize(&equation.expression)?;
        for marker in &equation.markers {
            let goal = self.registry.get(*marker)?.goal;
            self.objective.add_term(*marker, goal);
        }
        let disposition = self.insert(expression, &equation.markers, equation.priority, handle)?;
        debug!(?handle, ?disposition, priority = ?equation.priority, "relation added");
        self.dispositions.push(disposition);
        Ok(handle)
    }

    /// Drive the tableau to the lexicographic optimum and publish values.
    /// Seals the pass.
    #[instrument(skip(self), fields(rows = self.rows.len(), variables = self.registry.len()))]
    pub fn solve(&mut self) -> Result<SolverResult, SolverError> {
        if self.is_solved() {
            return Err(SolverError::PassSealed);
        }
        self.optimize(Phase::Objective)?;
        self.publish_values();
        self.registry.seal();

        let mut objective = [0.0; TIER_COUNT];
        for (tier, value) in objective.iter_mut().enumerate() {
            *value = self.objective.constant[tier];
        }
        debug!(iterations = self.iterations, warnings = self.warnings.len(), "tableau solved");
        Ok(SolverResult {
            iterations: self.iterations,
            rows: self.rows.len(),
            objective,
            warnings: self.warnings.clone(),
        })
    }

    /// Every restricted basic variable is non-negative and no basic variable
    /// appears on a right-hand side.
    pub fn is_feasible(&self) -> bool {
        self.rows.values().all(|row| {
            let restricted = self
                .registry
                .get(row.basic)
                .map(|v| v.kind.is_restricted())
                .unwrap_or(false);
            let basic_free = row.expression.variables().all(|v| {
                self.registry
                    .get(v)
                    .map(|variable| !variable.is_basic())
                    .unwrap_or(false)
            });
            basic_free && (!restricted || row.constant() >= -ZERO_TOLERANCE)
        })
    }

    // ── Row insertion ────────────────────────────────────────────────────

    /// Fold constants and basic variables out of `expression`.
    fn normalize(&self, expression: &Expression) -> Result<Expression, SolverError> {
        let mut normalized = Expression::from_constant(expression.constant);
        for (id, coefficient) in &expression.terms {
            let variable = self.registry.get(*id)?;
            match variable.kind {
                VariableKind::Unknown => {
                    return Err(SolverError::InvalidPivot {
                        id: *id,
                        kind: variable.kind,
                    });
                }
                VariableKind::Constant => normalized.constant += coefficient * variable.value,
                _ => match variable.definition {
                    Some(row_id) => normalized.add_expression(&self.rows[row_id].expression, *coefficient),
                    None => normalized.add_term(*id, *coefficient),
                },
            }
        }
        Ok(normalized)
    }

    fn insert(
        &mut self,
        mut expression: Expression,
        markers: &[VariableId],
        priority: Priority,
        handle: RowHandle,
    ) -> Result<Disposition, SolverError> {
        if expression.is_constant() {
            if near_zero(expression.constant) {
                return Ok(Disposition::Redundant);
            }
            return self.demote(expression, handle);
        }
        if expression.constant < 0.0 {
            expression.negate();
        }
        if let Some(subject) = self.choose_subject(&expression, markers)? {
            self.insert_with_subject(expression, subject, handle)?;
            return Ok(Disposition::Inserted);
        }

        let snapshot = self.snapshot();
        let feasible = self.add_with_artificial(expression.clone())?;
        self.record(SolverEvent::ArtificialPhase { handle, feasible });
        if feasible {
            return Ok(Disposition::Inserted);
        }
        self.restore(snapshot);
        if priority.is_required() {
            self.demote(expression, handle)
        } else {
            // Soft rows always carry a usable error marker; reaching this
            // point means the row only restated the objective.
            Ok(Disposition::Redundant)
        }
    }

    /// Re-insert a violated required row with an error pair at the
    /// strongest soft tier.
    fn demote(&mut self, mut expression: Expression, handle: RowHandle) -> Result<Disposition, SolverError> {
        warn!(?handle, residual = expression.constant, "required relation conflicts; demoting");
        let plus = self.registry.allocate_error(DEMOTED_STRENGTH)?;
        let minus = self.registry.allocate_error(DEMOTED_STRENGTH)?;
        expression.add_term(plus, -1.0);
        expression.add_term(minus, 1.0);
        let goal = DEMOTED_STRENGTH.unit_vector();
        self.objective.add_term(plus, goal);
        self.objective.add_term(minus, goal);
        if expression.constant < 0.0 {
            expression.negate();
        }
        let subject = if expression.coefficient(plus) < 0.0 { plus } else { minus };
        self.insert_with_subject(expression, subject, handle)?;
        self.warnings.push(SolverWarning::Demoted { handle });
        self.record(SolverEvent::Demoted { handle });
        Ok(Disposition::Demoted)
    }

    fn insert_with_subject(
        &mut self,
        mut expression: Expression,
        subject: VariableId,
        handle: RowHandle,
    ) -> Result<(), SolverError> {
        expression.solve_for(subject);
        self.substitute(subject, &expression)?;
        self.insert_row(subject, expression)?;
        self.record(SolverEvent::RowInserted { handle, subject });
        Ok(())
    }

    /// An unrestricted variable if there is one, otherwise a fresh slack or
    /// error variable of this row with a negative coefficient.
    fn choose_subject(
        &self,
        expression: &Expression,
        markers: &[VariableId],
    ) -> Result<Option<VariableId>, SolverError> {
        for id in expression.variables() {
            if self.registry.kind(id)? == VariableKind::Unrestricted {
                return Ok(Some(id));
            }
        }
        for marker in markers {
            let kind = self.registry.kind(*marker)?;
            if kind.is_restricted() && expression.coefficient(*marker) < 0.0 {
                return Ok(Some(*marker));
            }
        }
        Ok(None)
    }

    /// Find a feasible basis for a row that has no usable subject by
    /// minimizing an artificial variable standing in for it.
    fn add_with_artificial(&mut self, expression: Expression) -> Result<bool, SolverError> {
        let artificial = self.registry.allocate_slack()?;
        self.artificial = Some(GoalRow::from_expression(&expression, 0));
        self.insert_row(artificial, expression)?;
        self.optimize(Phase::Feasibility)?;
        let feasible = self
            .artificial
            .take()
            .is_some_and(|goal| goal.constant[0].abs() <= self.config.tolerance);

        let definition = self.registry.get(artificial)?.definition;
        if let Some(mut row) = definition.and_then(|row_id| self.remove_row(row_id)) {
            if row.expression.is_constant() {
                return Ok(feasible);
            }
            let entering = row
                .expression
                .variables()
                .find(|id| self.registry.kind(*id).is_ok_and(VariableKind::is_restricted));
            let Some(entering) = entering else {
                return Ok(false);
            };
            row.expression.solve_for_swap(artificial, entering);
            self.substitute(entering, &row.expression)?;
            self.insert_row(entering, row.expression)?;
        }

        let clients: Vec<RowId> = self.registry.get(artificial)?.client_rows.iter().copied().collect();
        for row_id in clients {
            self.unlink(row_id);
            self.rows[row_id].expression.remove(artificial);
            self.link(row_id);
        }
        self.objective.remove(artificial);
        Ok(feasible)
    }

    // ── Optimization ─────────────────────────────────────────────────────

    fn optimize(&mut self, phase: Phase) -> Result<(), SolverError> {
        for tier in 0..TIER_COUNT {
            loop {
                let goal = match phase {
                    Phase::Feasibility => match &self.artificial {
                        Some(goal) => goal,
                        None => return Ok(()),
                    },
                    Phase::Objective => &self.objective,
                };
                let Some(entering) = self.entering_variable(goal, tier)? else {
                    break;
                };
                let Some(row_id) = self.leaving_row(entering)? else {
                    warn!(?entering, tier, "objective unbounded along entering variable");
                    self.warn_once(SolverWarning::Unbounded { tier });
                    break;
                };
                if self.iterations >= self.config.max_iterations {
                    warn!(iterations = self.iterations, "pivot budget exhausted");
                    self.warn_once(SolverWarning::IterationLimit {
                        iterations: self.iterations,
                    });
                    return Ok(());
                }
                self.iterations += 1;
                let leaving = self.rows[row_id].basic;
                trace!(?entering, ?leaving, tier, ?phase, "pivot");
                self.record(SolverEvent::Pivot {
                    entering,
                    leaving,
                    tier: (phase == Phase::Objective).then_some(tier),
                });
                self.pivot(entering, row_id)?;
            }
            if phase == Phase::Objective {
                let value = self.objective.constant[tier];
                trace!(tier, value, "tier settled");
                self.record(SolverEvent::TierSettled { tier, value });
            }
        }
        Ok(())
    }

    /// Variable improving `tier` without touching any more rigid tier,
    /// most negative first, lowest id on ties.
    fn entering_variable(&self, goal: &GoalRow, tier: usize) -> Result<Option<VariableId>, SolverError> {
        let mut best: Option<(VariableId, f64)> = None;
        for (id, weights) in &goal.terms {
            let weight = weights[tier];
            if weight >= -ZERO_TOLERANCE {
                continue;
            }
            if (0..tier).any(|rigid| !near_zero(weights[rigid])) {
                continue;
            }
            match self.registry.kind(*id)? {
                VariableKind::Unknown => {
                    return Err(SolverError::InvalidPivot {
                        id: *id,
                        kind: VariableKind::Unknown,
                    });
                }
                VariableKind::Constant => continue,
                _ => {}
            }
            if best.is_none_or(|(_, most_negative)| weight < most_negative) {
                best = Some((*id, weight));
            }
        }
        Ok(best.map(|(id, _)| id))
    }

    /// Minimum-ratio test over restricted rows. Ties evict the weakest error
    /// variable first, then slack variables, then the lowest id.
    fn leaving_row(&self, entering: VariableId) -> Result<Option<RowId>, SolverError> {
        let mut best: Option<(RowId, f64, (usize, VariableId))> = None;
        for row_id in &self.registry.get(entering)?.client_rows {
            let row = &self.rows[*row_id];
            let basic = self.registry.get(row.basic)?;
            if !basic.kind.is_restricted() {
                continue;
            }
            let coefficient = row.expression.coefficient(entering);
            if coefficient >= -ZERO_TOLERANCE {
                continue;
            }
            let ratio = -row.constant() / coefficient;
            let rank = (eviction_rank(basic), row.basic);
            let better = match &best {
                None => true,
                Some((_, best_ratio, best_rank)) => {
                    ratio < best_ratio - ZERO_TOLERANCE
                        || ((ratio - best_ratio).abs() <= ZERO_TOLERANCE && rank < *best_rank)
                }
            };
            if better {
                best = Some((*row_id, ratio, rank));
            }
        }
        Ok(best.map(|(row_id, _, _)| row_id))
    }

    fn pivot(&mut self, entering: VariableId, row_id: RowId) -> Result<(), SolverError> {
        self.unlink(row_id);
        let row = &mut self.rows[row_id];
        let leaving = row.basic;
        row.expression.solve_for_swap(leaving, entering);
        row.basic = entering;
        let expression = row.expression.clone();
        self.link(row_id);
        self.registry.get_mut(leaving)?.definition = None;
        self.registry.get_mut(entering)?.definition = Some(row_id);
        self.substitute(entering, &expression)
    }

    // ── Bookkeeping ──────────────────────────────────────────────────────

    /// Replace `id` by `expression` in every row and objective.
    fn substitute(&mut self, id: VariableId, expression: &Expression) -> Result<(), SolverError> {
        let clients: Vec<RowId> = self.registry.get(id)?.client_rows.iter().copied().collect();
        for row_id in clients {
            self.unlink(row_id);
            self.rows[row_id].expression.substitute(id, expression);
            self.link(row_id);
        }
        self.objective.substitute(id, expression);
        if let Some(goal) = &mut self.artificial {
            goal.substitute(id, expression);
        }
        Ok(())
    }

    fn insert_row(&mut self, basic: VariableId, expression: Expression) -> Result<RowId, SolverError> {
        let row_id = self.rows.insert(Row::new(basic, expression));
        self.registry.get_mut(basic)?.definition = Some(row_id);
        self.link(row_id);
        Ok(row_id)
    }

    fn remove_row(&mut self, row_id: RowId) -> Option<Row> {
        self.unlink(row_id);
        let row = self.rows.remove(row_id)?;
        if let Ok(basic) = self.registry.get_mut(row.basic) {
            basic.definition = None;
        }
        Some(row)
    }

    fn link(&mut self, row_id: RowId) {
        let Some(row) = self.rows.get(row_id) else {
            return;
        };
        for id in row.expression.variables() {
            if let Ok(variable) = self.registry.get_mut(id) {
                variable.client_rows.insert(row_id);
            }
        }
    }

    fn unlink(&mut self, row_id: RowId) {
        let Some(row) = self.rows.get(row_id) else {
            return;
        };
        for id in row.expression.variables() {
            if let Ok(variable) = self.registry.get_mut(id) {
                variable.client_rows.remove(&row_id);
            }
        }
    }

    fn publish_values(&mut self) {
        let rows = &self.rows;
        for (_, variable) in self.registry.iter_mut() {
            if variable.kind == VariableKind::Constant {
                continue;
            }
            if let Some(row_id) = variable.definition {
                variable.value = rows[row_id].constant();
            } else if !variable.client_rows.is_empty() {
                variable.value = 0.0;
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            registry: self.registry.clone(),
            rows: self.rows.clone(),
            objective: self.objective.clone(),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.registry = snapshot.registry;
        self.rows = snapshot.rows;
        self.objective = snapshot.objective;
        self.artificial = None;
    }

    fn record(&mut self, event: SolverEvent) {
        if let Some(events) = &mut self.events {
            events.push(event);
        }
    }

    fn warn_once(&mut self, warning: SolverWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }
}

fn eviction_rank(variable: &Variable) -> usize {
    match (variable.kind, variable.strength) {
        (VariableKind::Error, Some(strength)) => strength as usize,
        (VariableKind::Error, None) => 0,
        (VariableKind::Slack, _) => TIER_COUNT,
        _ => TIER_COUNT + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Relation;

    fn system_with(count: u64) -> (LinearSystem, Vec<VariableId>) {
        let mut system = LinearSystem::new(SolverConfig::default());
        let vars = (0..count).map(|i| system.declare(Owner(i)).unwrap()).collect();
        (system, vars)
    }

    fn required(system: &mut LinearSystem, relation: Relation) -> RowHandle {
        system.add_relation(&RelationRequest::required(relation)).unwrap()
    }

    #[test]
    fn test_fix_round_trips_exactly() {
        let (mut system, v) = system_with(1);
        required(&mut system, Relation::Fix { a: v[0], value: 42.5 });
        let result = system.solve().unwrap();
        assert!(result.is_clean());
        assert_eq!(system.value(v[0]).unwrap(), 42.5);
    }

    #[test]
    fn test_margin_propagates() {
        let (mut system, v) = system_with(2);
        required(&mut system, Relation::Equal { a: v[1], b: v[0], margin: 16.0 });
        required(&mut system, Relation::Fix { a: v[0], value: 0.0 });
        system.solve().unwrap();
        assert_eq!(system.value(v[1]).unwrap(), 16.0);
    }

    #[test]
    fn test_at_least_is_tight_when_unopposed() {
        let (mut system, v) = system_with(2);
        required(&mut system, Relation::Fix { a: v[1], value: 0.0 });
        required(&mut system, Relation::AtLeast { a: v[0], b: v[1], margin: 5.0 });
        system.solve().unwrap();
        assert!((system.value(v[0]).unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_at_least_yields_to_soft_pull() {
        let (mut system, v) = system_with(2);
        required(&mut system, Relation::Fix { a: v[1], value: 0.0 });
        required(&mut system, Relation::AtLeast { a: v[0], b: v[1], margin: 5.0 });
        system
            .add_relation(&RelationRequest::soft(Relation::Fix { a: v[0], value: 30.0 }, Strength::Low))
            .unwrap();
        system.solve().unwrap();
        assert!((system.value(v[0]).unwrap() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_higher_tier_wins_conflict() {
        let (mut system, v) = system_with(1);
        system
            .add_relation(&RelationRequest::soft(Relation::Fix { a: v[0], value: 20.0 }, Strength::Low))
            .unwrap();
        system
            .add_relation(&RelationRequest::soft(Relation::Fix { a: v[0], value: 10.0 }, Strength::High))
            .unwrap();
        let result = system.solve().unwrap();
        assert!((system.value(v[0]).unwrap() - 10.0).abs() < 1e-9);
        assert!(result.objective[Strength::High.tier()].abs() < 1e-9);
        assert!((result.objective[Strength::Low.tier()] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_conflicting_required_rows_are_demoted() {
        let (mut system, v) = system_with(1);
        required(&mut system, Relation::Fix { a: v[0], value: 5.0 });
        let second = required(&mut system, Relation::Fix { a: v[0], value: 7.0 });
        let result = system.solve().unwrap();
        assert_eq!(system.disposition(second), Some(Disposition::Demoted));
        assert_eq!(result.warnings, vec![SolverWarning::Demoted { handle: second }]);
        assert_eq!(system.value(v[0]).unwrap(), 5.0);
    }

    #[test]
    fn test_infeasible_inequalities_keep_first() {
        let (mut system, v) = system_with(2);
        required(&mut system, Relation::Fix { a: v[1], value: 0.0 });
        required(&mut system, Relation::AtLeast { a: v[0], b: v[1], margin: 5.0 });
        let conflicting = required(&mut system, Relation::AtMost { a: v[0], b: v[1], margin: 3.0 });
        system.solve().unwrap();
        assert_eq!(system.disposition(conflicting), Some(Disposition::Demoted));
        assert!(system.value(v[0]).unwrap() >= 5.0 - 1e-9);
        assert!(system.is_feasible());
    }

    #[test]
    fn test_feasible_inequalities_need_no_demotion() {
        let (mut system, v) = system_with(2);
        required(&mut system, Relation::Fix { a: v[1], value: 0.0 });
        required(&mut system, Relation::AtLeast { a: v[0], b: v[1], margin: 5.0 });
        let upper = required(&mut system, Relation::AtMost { a: v[0], b: v[1], margin: 8.0 });
        let result = system.solve().unwrap();
        assert!(result.is_clean());
        assert_eq!(system.disposition(upper), Some(Disposition::Inserted));
        let value = system.value(v[0]).unwrap();
        assert!((5.0 - 1e-9..=8.0 + 1e-9).contains(&value));
    }

    #[test]
    fn test_redundant_row_is_skipped() {
        let (mut system, v) = system_with(2);
        required(&mut system, Relation::Fix { a: v[0], value: 1.0 });
        required(&mut system, Relation::Equal { a: v[1], b: v[0], margin: 2.0 });
        let repeat = required(&mut system, Relation::Fix { a: v[1], value: 3.0 });
        system.solve().unwrap();
        assert_eq!(system.disposition(repeat), Some(Disposition::Redundant));
    }

    #[test]
    fn test_centering_splits_free_space() {
        let (mut system, v) = system_with(4);
        // targets at 0 and 100, a 20 wide span centered between them
        required(&mut system, Relation::Fix { a: v[1], value: 0.0 });
        required(&mut system, Relation::Fix { a: v[2], value: 100.0 });
        required(&mut system, Relation::Equal { a: v[3], b: v[0], margin: 20.0 });
        required(
            &mut system,
            Relation::Centering {
                begin: v[0],
                begin_target: v[1],
                begin_margin: 0.0,
                bias: 0.5,
                end_target: v[2],
                end: v[3],
                end_margin: 0.0,
            },
        );
        system.solve().unwrap();
        assert!((system.value(v[0]).unwrap() - 40.0).abs() < 1e-9);
        assert!((system.value(v[3]).unwrap() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let (mut system, _) = system_with(0);
        let unknown = system.registry_mut().allocate(VariableKind::Unknown).unwrap();
        let result = system.add_relation(&RelationRequest::required(Relation::Fix { a: unknown, value: 1.0 }));
        assert!(matches!(result, Err(SolverError::InvalidPivot { .. })));
    }

    #[test]
    fn test_constant_variables_are_folded() {
        let (mut system, v) = system_with(1);
        let constant = system.registry_mut().declare_constant(12.0).unwrap();
        required(&mut system, Relation::Equal { a: v[0], b: constant, margin: 3.0 });
        system.solve().unwrap();
        assert_eq!(system.value(v[0]).unwrap(), 15.0);
        assert!(system.registry().get(constant).unwrap().definition.is_none());
    }

    #[test]
    fn test_solved_pass_is_sealed_until_reset() {
        let (mut system, v) = system_with(1);
        system.solve().unwrap();
        assert!(matches!(system.declare(Owner(99)), Err(SolverError::PassSealed)));
        assert!(matches!(
            system.add_relation(&RelationRequest::required(Relation::Fix { a: v[0], value: 1.0 })),
            Err(SolverError::PassSealed)
        ));
        system.reset();
        assert!(matches!(system.value(v[0]), Err(SolverError::NotSolved)));
        let fresh = system.declare(Owner(0)).unwrap();
        assert_ne!(fresh, v[0]);
    }

    #[test]
    fn test_value_before_solve_is_an_error() {
        let (system, v) = system_with(1);
        assert!(matches!(system.value(v[0]), Err(SolverError::NotSolved)));
    }

    #[test]
    fn test_events_record_pivots_and_tiers() {
        let (mut system, v) = system_with(2);
        system.record_events(true);
        required(&mut system, Relation::Fix { a: v[1], value: 0.0 });
        required(&mut system, Relation::AtLeast { a: v[0], b: v[1], margin: 5.0 });
        system
            .add_relation(&RelationRequest::soft(Relation::Fix { a: v[0], value: 30.0 }, Strength::Low))
            .unwrap();
        system.solve().unwrap();
        let events = system.events();
        assert!(events.iter().any(|e| matches!(e, SolverEvent::Pivot { tier: Some(_), .. })));
        let settled = events
            .iter()
            .filter(|e| matches!(e, SolverEvent::TierSettled { .. }))
            .count();
        assert_eq!(settled, TIER_COUNT);
    }
}
