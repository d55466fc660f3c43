//! Translation of relation requests into tableau equations.
//!
//! Every equation is produced in the canonical form `0 = constant + Σ c·v`.
//! Inequalities receive a fresh slack variable and soft relations receive
//! error variables whose objective weight sits at the requested tier. The
//! builder allocates those auxiliary variables from the registry but never
//! touches the tableau; the caller inserts the equation.

use serde::{Deserialize, Serialize};

use crate::row::Expression;
use crate::solver::SolverError;
use crate::strength::{Priority, Strength};
use crate::variable::{VariableId, VariableRegistry};

/// A linear relation between anchor variables. Operands default to tableau
/// variables; callers with their own handles map them down before building.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Relation<V = VariableId> {
    /// `a = value`
    Fix { a: V, value: f64 },
    /// `a = b + margin`
    Equal { a: V, b: V, margin: f64 },
    /// `a ≥ b + margin`
    AtLeast { a: V, b: V, margin: f64 },
    /// `a ≤ b + margin`
    AtMost { a: V, b: V, margin: f64 },
    /// Splits the free space around a span so that
    /// `(1 − bias)·(begin − begin_target − begin_margin)
    ///   = bias·(end_target − end − end_margin)`.
    Centering {
        begin: V,
        begin_target: V,
        begin_margin: f64,
        bias: f64,
        end_target: V,
        end: V,
        end_margin: f64,
    },
    /// `target = begin + (end − begin)·percent`
    Percent {
        target: V,
        begin: V,
        end: V,
        percent: f64,
    },
}

impl<V: Copy> Relation<V> {
    /// Every operand the relation mentions.
    pub fn operands(&self) -> Vec<V> {
        match *self {
            Relation::Fix { a, .. } => vec![a],
            Relation::Equal { a, b, .. }
            | Relation::AtLeast { a, b, .. }
            | Relation::AtMost { a, b, .. } => vec![a, b],
            Relation::Centering {
                begin,
                begin_target,
                end_target,
                end,
                ..
            } => vec![begin, begin_target, end_target, end],
            Relation::Percent {
                target, begin, end, ..
            } => vec![target, begin, end],
        }
    }

    /// Same relation over different operand handles.
    pub fn map<W>(&self, mut f: impl FnMut(V) -> W) -> Relation<W> {
        match *self {
            Relation::Fix { a, value } => Relation::Fix { a: f(a), value },
            Relation::Equal { a, b, margin } => Relation::Equal {
                a: f(a),
                b: f(b),
                margin,
            },
            Relation::AtLeast { a, b, margin } => Relation::AtLeast {
                a: f(a),
                b: f(b),
                margin,
            },
            Relation::AtMost { a, b, margin } => Relation::AtMost {
                a: f(a),
                b: f(b),
                margin,
            },
            Relation::Centering {
                begin,
                begin_target,
                begin_margin,
                bias,
                end_target,
                end,
                end_margin,
            } => Relation::Centering {
                begin: f(begin),
                begin_target: f(begin_target),
                begin_margin,
                bias,
                end_target: f(end_target),
                end: f(end),
                end_margin,
            },
            Relation::Percent {
                target,
                begin,
                end,
                percent,
            } => Relation::Percent {
                target: f(target),
                begin: f(begin),
                end: f(end),
                percent,
            },
        }
    }
}

/// A relation together with how strictly it must hold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelationRequest<V = VariableId> {
    pub relation: Relation<V>,
    pub priority: Priority,
}

impl<V> RelationRequest<V> {
    pub fn required(relation: Relation<V>) -> Self {
        Self {
            relation,
            priority: Priority::Required,
        }
    }

    pub fn soft(relation: Relation<V>, strength: Strength) -> Self {
        Self {
            relation,
            priority: Priority::Soft(strength),
        }
    }
}

impl<V: Copy> RelationRequest<V> {
    pub fn map<W>(&self, f: impl FnMut(V) -> W) -> RelationRequest<W> {
        RelationRequest {
            relation: self.relation.map(f),
            priority: self.priority,
        }
    }
}

/// A normalized equation `0 = expression`, not yet in the tableau.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub expression: Expression,
    pub priority: Priority,
    /// Slack and error variables created for this equation only.
    pub markers: Vec<VariableId>,
}

pub struct RowBuilder<'a> {
    registry: &'a mut VariableRegistry,
}

impl<'a> RowBuilder<'a> {
    pub fn new(registry: &'a mut VariableRegistry) -> Self {
        Self { registry }
    }

    pub fn build(&mut self, request: &RelationRequest) -> Result<Equation, SolverError> {
        let priority = request.priority;
        match request.relation {
            Relation::Fix { a, value } => self.fix(a, value, priority),
            Relation::Equal { a, b, margin } => self.equal(a, b, margin, priority),
            Relation::AtLeast { a, b, margin } => self.at_least(a, b, margin, priority),
            Relation::AtMost { a, b, margin } => self.at_most(a, b, margin, priority),
            Relation::Centering {
                begin,
                begin_target,
                begin_margin,
                bias,
                end_target,
                end,
                end_margin,
            } => self.centering(
                (begin, begin_target, begin_margin),
                bias,
                (end_target, end, end_margin),
                priority,
            ),
            Relation::Percent {
                target,
                begin,
                end,
                percent,
            } => self.percent(target, begin, end, percent, priority),
        }
    }

    /// `a = value`
    pub fn fix(&mut self, a: VariableId, value: f64, priority: Priority) -> Result<Equation, SolverError> {
        self.check(&[a])?;
        finite("value", value)?;
        let mut expression = Expression::from_term(a, 1.0);
        expression.constant = -value;
        self.equality(expression, priority)
    }

    /// `a = b + margin`
    pub fn equal(
        &mut self,
        a: VariableId,
        b: VariableId,
        margin: f64,
        priority: Priority,
    ) -> Result<Equation, SolverError> {
        let expression = self.difference(a, b, margin)?;
        self.equality(expression, priority)
    }

    /// `a ≥ b + margin`, i.e. `a − b − margin − s = 0`.
    pub fn at_least(
        &mut self,
        a: VariableId,
        b: VariableId,
        margin: f64,
        priority: Priority,
    ) -> Result<Equation, SolverError> {
        let expression = self.difference(a, b, margin)?;
        self.inequality(expression, -1.0, priority)
    }

    /// `a ≤ b + margin`, i.e. `a − b − margin + s = 0`.
    pub fn at_most(
        &mut self,
        a: VariableId,
        b: VariableId,
        margin: f64,
        priority: Priority,
    ) -> Result<Equation, SolverError> {
        let expression = self.difference(a, b, margin)?;
        self.inequality(expression, 1.0, priority)
    }

    /// `(1 − bias)(begin − begin_target − mb) − bias(end_target − end − me) = 0`
    pub fn centering(
        &mut self,
        (begin, begin_target, begin_margin): (VariableId, VariableId, f64),
        bias: f64,
        (end_target, end, end_margin): (VariableId, VariableId, f64),
        priority: Priority,
    ) -> Result<Equation, SolverError> {
        self.check(&[begin, begin_target, end_target, end])?;
        finite("margin", begin_margin)?;
        finite("margin", end_margin)?;
        if !(0.0..=1.0).contains(&bias) {
            return Err(SolverError::InvalidBias(bias));
        }
        let leading = 1.0 - bias;
        let mut expression = Expression::new();
        if leading > 0.0 {
            expression.add_term(begin, leading);
            expression.add_term(begin_target, -leading);
            expression.constant -= leading * begin_margin;
        }
        if bias > 0.0 {
            expression.add_term(end_target, -bias);
            expression.add_term(end, bias);
            expression.constant += bias * end_margin;
        }
        self.equality(expression, priority)
    }

    /// `target − begin − percent·(end − begin) = 0`
    pub fn percent(
        &mut self,
        target: VariableId,
        begin: VariableId,
        end: VariableId,
        percent: f64,
        priority: Priority,
    ) -> Result<Equation, SolverError> {
        self.check(&[target, begin, end])?;
        finite("percent", percent)?;
        let mut expression = Expression::from_term(target, 1.0);
        expression.add_term(begin, percent - 1.0);
        expression.add_term(end, -percent);
        self.equality(expression, priority)
    }

    fn difference(&self, a: VariableId, b: VariableId, margin: f64) -> Result<Expression, SolverError> {
        self.check(&[a, b])?;
        finite("margin", margin)?;
        let mut expression = Expression::from_term(a, 1.0);
        expression.add_term(b, -1.0);
        expression.constant = -margin;
        Ok(expression)
    }

    fn equality(&mut self, mut expression: Expression, priority: Priority) -> Result<Equation, SolverError> {
        let mut markers = Vec::new();
        if let Priority::Soft(strength) = priority {
            // expression = e⁺ − e⁻
            let plus = self.registry.allocate_error(strength)?;
            let minus = self.registry.allocate_error(strength)?;
            expression.add_term(plus, -1.0);
            expression.add_term(minus, 1.0);
            markers.extend([plus, minus]);
        }
        Ok(Equation {
            expression,
            priority,
            markers,
        })
    }

    fn inequality(
        &mut self,
        mut expression: Expression,
        slack_sign: f64,
        priority: Priority,
    ) -> Result<Equation, SolverError> {
        let slack = self.registry.allocate_slack()?;
        expression.add_term(slack, slack_sign);
        let mut markers = vec![slack];
        if let Priority::Soft(strength) = priority {
            let error = self.registry.allocate_error(strength)?;
            expression.add_term(error, -slack_sign);
            markers.push(error);
        }
        Ok(Equation {
            expression,
            priority,
            markers,
        })
    }

    fn check(&self, operands: &[VariableId]) -> Result<(), SolverError> {
        for id in operands {
            self.registry.get(*id)?;
        }
        Ok(())
    }
}

fn finite(what: &'static str, value: f64) -> Result<(), SolverError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SolverError::NonFinite { what, value })
    }
}
