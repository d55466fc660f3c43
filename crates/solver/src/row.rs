use std::collections::BTreeMap;

use slotmap::new_key_type;

use crate::strength::{is_zero_vector, near_zero, StrengthVector};
use crate::variable::VariableId;

new_key_type! {
    pub struct RowId;
}

/// `constant + Σ coefficient·variable` over a sparse, ordered term map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression {
    pub constant: f64,
    pub terms: BTreeMap<VariableId, f64>,
}

impl Expression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_constant(constant: f64) -> Self {
        Self {
            constant,
            terms: BTreeMap::new(),
        }
    }

    pub fn from_term(variable: VariableId, coefficient: f64) -> Self {
        let mut expression = Self::new();
        expression.add_term(variable, coefficient);
        expression
    }

    /// Add `coefficient·variable`, merging with an existing term. Terms that
    /// cancel out are dropped.
    pub fn add_term(&mut self, variable: VariableId, coefficient: f64) {
        let merged = self.terms.get(&variable).copied().unwrap_or(0.0) + coefficient;
        if near_zero(merged) {
            self.terms.remove(&variable);
        } else {
            self.terms.insert(variable, merged);
        }
    }

    /// `self += scale · other`
    pub fn add_expression(&mut self, other: &Expression, scale: f64) {
        self.constant += other.constant * scale;
        for (variable, coefficient) in &other.terms {
            self.add_term(*variable, coefficient * scale);
        }
    }

    pub fn coefficient(&self, variable: VariableId) -> f64 {
        self.terms.get(&variable).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, variable: VariableId) -> bool {
        self.terms.contains_key(&variable)
    }

    pub fn remove(&mut self, variable: VariableId) -> Option<f64> {
        self.terms.remove(&variable)
    }

    pub fn negate(&mut self) {
        self.constant = -self.constant;
        for coefficient in self.terms.values_mut() {
            *coefficient = -*coefficient;
        }
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn variables(&self) -> impl Iterator<Item = VariableId> + '_ {
        self.terms.keys().copied()
    }

    /// Replace `variable` by `replacement`. Returns whether the variable was
    /// present.
    pub fn substitute(&mut self, variable: VariableId, replacement: &Expression) -> bool {
        match self.terms.remove(&variable) {
            Some(coefficient) => {
                self.add_expression(replacement, coefficient);
                true
            }
            None => false,
        }
    }

    /// Treat `self` as `0 = self` and rewrite it as `variable = self`.
    ///
    /// The variable must be present with a non-zero coefficient.
    pub fn solve_for(&mut self, variable: VariableId) {
        let coefficient = self.terms.remove(&variable).unwrap_or(1.0);
        let scale = -1.0 / coefficient;
        self.constant *= scale;
        for value in self.terms.values_mut() {
            *value *= scale;
        }
    }

    /// Treat `self` as `lhs = self` and rewrite it as `rhs = self`.
    pub fn solve_for_swap(&mut self, lhs: VariableId, rhs: VariableId) {
        self.add_term(lhs, -1.0);
        self.solve_for(rhs);
    }
}

/// A tableau row: `basic = expression`.
#[derive(Debug, Clone)]
pub struct Row {
    pub basic: VariableId,
    pub expression: Expression,
}

impl Row {
    pub fn new(basic: VariableId, expression: Expression) -> Self {
        Self { basic, expression }
    }

    pub fn constant(&self) -> f64 {
        self.expression.constant
    }
}

/// Objective row with one weight per priority tier on every term.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalRow {
    pub constant: StrengthVector,
    pub terms: BTreeMap<VariableId, StrengthVector>,
}

impl GoalRow {
    pub fn new() -> Self {
        Self {
            constant: StrengthVector::zeros(),
            terms: BTreeMap::new(),
        }
    }

    /// Objective equal to `expression`, weighted entirely at `tier`.
    pub fn from_expression(expression: &Expression, tier: usize) -> Self {
        let mut unit = StrengthVector::zeros();
        unit[tier] = 1.0;
        let mut goal = Self::new();
        goal.add_expression(expression, &unit);
        goal
    }

    pub fn add_term(&mut self, variable: VariableId, weights: StrengthVector) {
        let merged = self
            .terms
            .get(&variable)
            .copied()
            .unwrap_or_else(StrengthVector::zeros)
            + weights;
        if is_zero_vector(&merged) {
            self.terms.remove(&variable);
        } else {
            self.terms.insert(variable, merged);
        }
    }

    /// `self += weights ⊗ expression`
    pub fn add_expression(&mut self, expression: &Expression, weights: &StrengthVector) {
        self.constant += *weights * expression.constant;
        for (variable, coefficient) in &expression.terms {
            self.add_term(*variable, *weights * *coefficient);
        }
    }

    pub fn coefficient(&self, variable: VariableId) -> StrengthVector {
        self.terms
            .get(&variable)
            .copied()
            .unwrap_or_else(StrengthVector::zeros)
    }

    pub fn substitute(&mut self, variable: VariableId, replacement: &Expression) {
        if let Some(weights) = self.terms.remove(&variable) {
            self.add_expression(replacement, &weights);
        }
    }

    pub fn remove(&mut self, variable: VariableId) {
        self.terms.remove(&variable);
    }
}

impl Default for GoalRow {
    fn default() -> Self {
        Self::new()
    }
}
