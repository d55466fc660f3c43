//! Record of one layout pass: what the graph settled, which rows reached the
//! tableaux and how each axis was optimized.

use anchor_graph::{Axis, NodeId, ResolutionEvent};
use anchor_solver::{RowHandle, SolverEvent, SolverResult, SolverWarning};
use serde::Serialize;

use crate::naming::NamingContext;

/// Why a row was added to an axis tableau.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RowSource {
    /// Added through `LayoutEngine::add_relation`.
    Client,
    /// A graph-settled node handed to the tableau.
    HandOff { node: NodeId },
    /// An edge the graph could not settle.
    Edge { node: NodeId, connection: &'static str },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoweredRow {
    pub axis: Axis,
    pub row: RowHandle,
    pub source: RowSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct AxisTrace {
    pub axis: Axis,
    pub events: Vec<SolverEvent>,
    pub result: SolverResult,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PassTrace {
    pub graph: Vec<ResolutionEvent>,
    pub rows: Vec<LoweredRow>,
    pub axes: Vec<AxisTrace>,
}

impl PassTrace {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text listing, one line per event. Labels come from `names` when
    /// given, otherwise raw ids are printed.
    pub fn render(&self, names: Option<&NamingContext>) -> String {
        let node = |id: NodeId| match names {
            Some(names) => names.describe_node(id),
            None => format!("{id:?}"),
        };
        let variable = |axis: Axis, id| match names {
            Some(names) => names.describe_variable(axis, id),
            None => format!("{id:?}"),
        };

        let mut lines = vec!["graph:".to_string()];
        for event in &self.graph {
            lines.push(match event {
                ResolutionEvent::Resolved(value) => match value.base {
                    Some(base) => format!(
                        "  resolved {} = {} + {}",
                        node(value.node),
                        node(base),
                        value.offset
                    ),
                    None => format!("  resolved {} = {}", node(value.node), value.offset),
                },
                ResolutionEvent::Invalidated(id) => format!("  invalidated {}", node(*id)),
                ResolutionEvent::Deferred { node: id, connection } => {
                    format!("  deferred {} ({})", node(*id), connection.name())
                }
            });
        }

        lines.push("rows:".to_string());
        for row in &self.rows {
            let source = match &row.source {
                RowSource::Client => "client".to_string(),
                RowSource::HandOff { node: id } => format!("hand-off of {}", node(*id)),
                RowSource::Edge { node: id, connection } => format!("{connection} edge of {}", node(*id)),
            };
            lines.push(format!("  {:?} #{}: {source}", row.axis, row.row.0));
        }

        for axis in &self.axes {
            lines.push(format!(
                "{:?}: {} rows, {} pivots",
                axis.axis, axis.result.rows, axis.result.iterations
            ));
            for event in &axis.events {
                lines.push(match event {
                    SolverEvent::RowInserted { handle, subject } => {
                        format!("  #{} solved for {}", handle.0, variable(axis.axis, *subject))
                    }
                    SolverEvent::ArtificialPhase { handle, feasible } => {
                        format!("  #{} needed an artificial basis (feasible: {feasible})", handle.0)
                    }
                    SolverEvent::Pivot { entering, leaving, tier } => {
                        let phase = tier.map_or_else(|| "feasibility".to_string(), |tier| format!("tier {tier}"));
                        format!(
                            "  pivot {} in, {} out ({phase})",
                            variable(axis.axis, *entering),
                            variable(axis.axis, *leaving)
                        )
                    }
                    SolverEvent::TierSettled { tier, value } => format!("  tier {tier} settled at {value}"),
                    SolverEvent::Demoted { handle } => format!("  #{} demoted", handle.0),
                });
            }
            for warning in &axis.result.warnings {
                lines.push(match warning {
                    SolverWarning::Demoted { handle } => format!("  warning: #{} demoted", handle.0),
                    SolverWarning::IterationLimit { iterations } => {
                        format!("  warning: stopped after {iterations} pivots")
                    }
                    SolverWarning::Unbounded { tier } => format!("  warning: unbounded at tier {tier}"),
                });
            }
        }
        lines.join("\n")
    }
}
