//! Two-stage layout pass.
//!
//! Nodes are first settled by the resolution graph. Whatever the graph leaves
//! open is lowered into the tableau of its axis, settled nodes that the
//! tableau mentions are handed off as fixed rows, and both axes are solved.

use std::collections::{BTreeMap, BTreeSet};

use anchor_graph::{
    AnchorRole, Axis, BarrierId, BarrierSide, Connection, NodeId, NodeRole, ResolutionEdge,
    ResolutionGraph, ResolvedValue, RunSummary,
};
use anchor_solver::{
    Relation, RelationRequest, RowHandle, SolverError, SolverResult, SolverWarning, Strength,
    VariableId,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::axis::AxisSystem;
use crate::config::LayoutConfig;
use crate::error::LayoutError;
use crate::naming::NamingContext;
use crate::trace::{AxisTrace, LoweredRow, PassTrace, RowSource};

/// Tableau variable of an anchor node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AnchorVar {
    pub node: NodeId,
    pub axis: Axis,
    pub id: VariableId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RelationHandle {
    pub axis: Axis,
    pub row: RowHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LayoutWarning {
    Solver { axis: Axis, warning: SolverWarning },
    /// A barrier gate stayed closed; its rows went to the tableau.
    BarrierDeferred { node: NodeId },
}

/// Outcome of `LayoutEngine::solve`.
#[derive(Debug, Clone, Serialize)]
pub struct SolveReport {
    pub graph: RunSummary,
    /// Rows lowered from edges the graph left open.
    pub lowered: usize,
    /// Rows pinning graph-settled nodes in the tableau.
    pub handed_off: usize,
    pub horizontal: SolverResult,
    pub vertical: SolverResult,
    pub warnings: Vec<LayoutWarning>,
}

impl SolveReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct LayoutEngine {
    config: LayoutConfig,
    graph: ResolutionGraph,
    horizontal: AxisSystem,
    vertical: AxisSystem,
    naming: Option<NamingContext>,
    rows: Vec<LoweredRow>,
    trace: Option<PassTrace>,
    report: Option<SolveReport>,
}

impl LayoutEngine {
    pub fn new(config: LayoutConfig) -> Self {
        let mut engine = Self {
            graph: ResolutionGraph::new(),
            horizontal: AxisSystem::new(Axis::Horizontal, config.solver.clone()),
            vertical: AxisSystem::new(Axis::Vertical, config.solver.clone()),
            naming: None,
            rows: Vec::new(),
            trace: None,
            report: None,
            config,
        };
        engine.begin_pass();
        engine
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Start a new pass. Every node, variable and row of the previous pass
    /// is dropped; variable records stay pooled for reuse.
    pub fn begin_pass(&mut self) {
        self.graph.reset();
        self.horizontal.reset(self.config.record_trace);
        self.vertical.reset(self.config.record_trace);
        self.naming = self.config.debug_names.then(NamingContext::new);
        self.rows.clear();
        self.trace = None;
        self.report = None;
    }

    /// Drop all state, pooled variables included.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    pub fn graph(&self) -> &ResolutionGraph {
        &self.graph
    }

    pub fn system(&self, axis: Axis) -> &AxisSystem {
        match axis {
            Axis::Horizontal => &self.horizontal,
            Axis::Vertical => &self.vertical,
        }
    }

    fn system_mut(&mut self, axis: Axis) -> &mut AxisSystem {
        match axis {
            Axis::Horizontal => &mut self.horizontal,
            Axis::Vertical => &mut self.vertical,
        }
    }

    pub fn naming(&self) -> Option<&NamingContext> {
        self.naming.as_ref()
    }

    pub fn trace(&self) -> Option<&PassTrace> {
        self.trace.as_ref()
    }

    /// Readable trace of the last solved pass, if tracing is enabled.
    pub fn render_trace(&self) -> Option<String> {
        self.trace.as_ref().map(|trace| trace.render(self.naming.as_ref()))
    }

    pub fn report(&self) -> Option<&SolveReport> {
        self.report.as_ref()
    }

    pub fn is_solved(&self) -> bool {
        self.report.is_some()
    }

    fn ensure_open(&self) -> Result<(), LayoutError> {
        if self.is_solved() {
            return Err(SolverError::PassSealed.into());
        }
        Ok(())
    }

    // ── Building ─────────────────────────────────────────────────────────

    pub fn declare_anchor(&mut self, role: AnchorRole) -> Result<NodeId, LayoutError> {
        self.declare_node(NodeRole::Anchor(role))
    }

    pub fn declare_dimension(&mut self, axis: Axis) -> Result<NodeId, LayoutError> {
        self.declare_node(NodeRole::Dimension(axis))
    }

    fn declare_node(&mut self, role: NodeRole) -> Result<NodeId, LayoutError> {
        self.ensure_open()?;
        let node = self.graph.add_node(role);
        if let Some(naming) = &mut self.naming {
            naming.name_node(node, role);
        }
        Ok(node)
    }

    /// Replace the generated label of `node`. No-op without debug names.
    pub fn name_node(&mut self, node: NodeId, name: impl Into<String>) {
        if let Some(naming) = &mut self.naming {
            naming.rename_node(node, name);
        }
    }

    pub fn set_opposite(&mut self, a: NodeId, b: NodeId) -> Result<(), LayoutError> {
        self.ensure_open()?;
        Ok(self.graph.set_opposite(a, b)?)
    }

    pub fn set_span(&mut self, node: NodeId, span: Option<f64>) -> Result<(), LayoutError> {
        self.ensure_open()?;
        Ok(self.graph.set_span(node, span)?)
    }

    pub fn add_resolution_edge(&mut self, node: NodeId, edge: ResolutionEdge) -> Result<(), LayoutError> {
        self.ensure_open()?;
        Ok(self.graph.add_edge(node, edge)?)
    }

    pub fn add_barrier(
        &mut self,
        node: NodeId,
        side: BarrierSide,
        dependencies: &[NodeId],
        margin: f64,
    ) -> Result<BarrierId, LayoutError> {
        self.ensure_open()?;
        Ok(self.graph.add_barrier(node, side, dependencies, margin)?)
    }

    /// Settle `node` directly, bypassing its edges.
    pub fn resolve_to(&mut self, node: NodeId, base: Option<NodeId>, offset: f64) -> Result<(), LayoutError> {
        self.ensure_open()?;
        Ok(self.graph.resolve_to(node, base, offset)?)
    }

    pub fn invalidate(&mut self, node: NodeId) -> Result<usize, LayoutError> {
        self.ensure_open()?;
        Ok(self.graph.invalidate(node)?)
    }

    pub fn invalidate_anchors(&mut self, node: NodeId) -> Result<usize, LayoutError> {
        self.ensure_open()?;
        Ok(self.graph.invalidate_anchors(node)?)
    }

    pub fn remove_node(&mut self, node: NodeId) -> Result<(), LayoutError> {
        self.ensure_open()?;
        Ok(self.graph.remove(node)?)
    }

    /// Tableau variable of `node`, created on first use.
    pub fn declare_variable(&mut self, node: NodeId) -> Result<AnchorVar, LayoutError> {
        let axis = self.graph.node(node)?.role.axis();
        let id = self.system_mut(axis).declare(node)?;
        if let Some(naming) = &mut self.naming {
            naming.name_variable(axis, id, node);
        }
        Ok(AnchorVar { node, axis, id })
    }

    /// Add a relation straight to the tableau of its axis.
    pub fn add_relation(&mut self, request: &RelationRequest<AnchorVar>) -> Result<RelationHandle, LayoutError> {
        self.ensure_open()?;
        let axis = common_axis(&request.relation.operands())?;
        let row = self.system_mut(axis).add(&request.map(|var| var.id))?;
        self.rows.push(LoweredRow {
            axis,
            row,
            source: RowSource::Client,
        });
        Ok(RelationHandle { axis, row })
    }

    /// Add a relation over nodes, declaring their variables as needed.
    fn add_node_relation(
        &mut self,
        axis: Axis,
        request: &RelationRequest<NodeId>,
        source: RowSource,
    ) -> Result<RowHandle, LayoutError> {
        let mut variables = BTreeMap::new();
        for node in request.relation.operands() {
            variables.insert(node, self.declare_variable(node)?.id);
        }
        let lowered = request.map(|node| variables[&node]);
        let row = self.system_mut(axis).add(&lowered)?;
        self.rows.push(LoweredRow { axis, row, source });
        Ok(row)
    }

    // ── Solving ──────────────────────────────────────────────────────────

    /// Run the graph, lower what it left open and solve both axes. The pass
    /// is sealed afterwards.
    #[instrument(skip(self), fields(nodes = self.graph.len()))]
    pub fn solve(&mut self) -> Result<SolveReport, LayoutError> {
        self.ensure_open()?;
        let graph = self.graph.run()?;
        let mut warnings = Vec::new();
        let lowered = self.lower_unresolved(&mut warnings)?;
        let handed_off = self.hand_off()?;
        let (horizontal, vertical) = self.solve_axes()?;

        for (axis, result) in [(Axis::Horizontal, &horizontal), (Axis::Vertical, &vertical)] {
            warnings.extend(
                result
                    .warnings
                    .iter()
                    .map(|warning| LayoutWarning::Solver { axis, warning: warning.clone() }),
            );
        }
        if self.config.record_trace {
            self.trace = Some(PassTrace {
                graph: self.graph.take_events(),
                rows: self.rows.clone(),
                axes: vec![
                    AxisTrace {
                        axis: Axis::Horizontal,
                        events: self.horizontal.system().events().to_vec(),
                        result: horizontal.clone(),
                    },
                    AxisTrace {
                        axis: Axis::Vertical,
                        events: self.vertical.system().events().to_vec(),
                        result: vertical.clone(),
                    },
                ],
            });
        }

        let report = SolveReport {
            graph,
            lowered,
            handed_off,
            horizontal,
            vertical,
            warnings,
        };
        info!(
            resolved = report.graph.resolved,
            deferred = report.graph.deferred,
            lowered,
            handed_off,
            warnings = report.warnings.len(),
            "layout pass solved"
        );
        self.report = Some(report.clone());
        Ok(report)
    }

    fn solve_axes(&mut self) -> Result<(SolverResult, SolverResult), LayoutError> {
        let (horizontal, vertical) = (&mut self.horizontal, &mut self.vertical);
        let (horizontal, vertical) = if self.config.parallel_axes {
            rayon::join(|| horizontal.solve(), || vertical.solve())
        } else {
            (horizontal.solve(), vertical.solve())
        };
        Ok((horizontal?, vertical?))
    }

    /// Turn every edge the graph left open into tableau rows.
    fn lower_unresolved(&mut self, warnings: &mut Vec<LayoutWarning>) -> Result<usize, LayoutError> {
        let mut lowered = 0;
        for id in self.graph.unresolved() {
            let node = self.graph.node(id)?.clone();
            let axis = node.role.axis();
            let mut requests = Vec::new();
            match node.connection {
                Connection::Unconnected => {}
                Connection::Direct | Connection::Chain | Connection::Match => {
                    if let Some(target) = node.target {
                        requests.push(RelationRequest::required(Relation::Equal {
                            a: id,
                            b: target,
                            margin: node.offset,
                        }));
                    }
                }
                Connection::Percent { end, percent } => {
                    if let Some(begin) = node.target {
                        requests.push(RelationRequest::required(Relation::Percent {
                            target: id,
                            begin,
                            end,
                            percent,
                        }));
                    }
                }
                // The trailing half is lowered with its leading partner.
                Connection::Center { leading: false, .. } => {}
                Connection::Center { bias, leading: true } => {
                    let Some(end) = node.opposite else { continue };
                    let partner = self.graph.node(end)?;
                    let (Some(begin_target), Some(end_target)) = (node.target, partner.target) else {
                        continue;
                    };
                    requests.push(RelationRequest::soft(
                        Relation::Centering {
                            begin: id,
                            begin_target,
                            begin_margin: node.offset,
                            bias,
                            end_target,
                            end,
                            end_margin: partner.offset,
                        },
                        Strength::Centering,
                    ));
                    match node.span.or(partner.span) {
                        Some(span) => requests.push(RelationRequest::required(Relation::Equal {
                            a: end,
                            b: id,
                            margin: span,
                        })),
                        None => {
                            requests.push(RelationRequest::soft(
                                Relation::Equal {
                                    a: id,
                                    b: begin_target,
                                    margin: node.offset,
                                },
                                Strength::Medium,
                            ));
                            requests.push(RelationRequest::soft(
                                Relation::Equal {
                                    a: end,
                                    b: end_target,
                                    margin: -partner.offset,
                                },
                                Strength::Medium,
                            ));
                        }
                    }
                }
                Connection::Barrier(barrier) => {
                    let barrier = self.graph.barrier(barrier)?.clone();
                    warn!(?id, dependencies = barrier.dependencies.len(), "barrier deferred to the tableau");
                    warnings.push(LayoutWarning::BarrierDeferred { node: id });
                    for dependency in &barrier.dependencies {
                        let bound = match barrier.side {
                            BarrierSide::Leading => Relation::AtMost {
                                a: id,
                                b: *dependency,
                                margin: barrier.margin,
                            },
                            BarrierSide::Trailing => Relation::AtLeast {
                                a: id,
                                b: *dependency,
                                margin: barrier.margin,
                            },
                        };
                        requests.push(RelationRequest::required(bound));
                        // Weakest tier: the barrier follows its members and
                        // never pulls them.
                        requests.push(RelationRequest::soft(
                            Relation::Equal {
                                a: id,
                                b: *dependency,
                                margin: barrier.margin,
                            },
                            Strength::Low,
                        ));
                    }
                    if let Some(opposite) = node.opposite {
                        if self.graph.node(opposite)?.connection == Connection::Unconnected {
                            requests.push(RelationRequest::required(Relation::Equal {
                                a: opposite,
                                b: id,
                                margin: 0.0,
                            }));
                        }
                    }
                }
            }

            for request in requests {
                if self.touches_removed(&request)? {
                    debug!(?id, "skipping row over a removed node");
                    continue;
                }
                let source = RowSource::Edge {
                    node: id,
                    connection: node.connection.name(),
                };
                self.add_node_relation(axis, &request, source)?;
                lowered += 1;
            }
        }
        Ok(lowered)
    }

    fn touches_removed(&self, request: &RelationRequest<NodeId>) -> Result<bool, LayoutError> {
        for node in request.relation.operands() {
            if self.graph.node(node)?.is_removed() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Pin every settled node the tableau refers to, following bases that
    /// are themselves settled.
    fn hand_off(&mut self) -> Result<usize, LayoutError> {
        let settled: BTreeMap<NodeId, ResolvedValue> = self
            .graph
            .settled()
            .into_iter()
            .map(|value| (value.node, value))
            .collect();
        let mut stack: Vec<NodeId> = Vec::new();
        for value in self.graph.settled().iter().rev() {
            let axis = self.graph.node(value.node)?.role.axis();
            if self.system(axis).variable(value.node).is_some() {
                stack.push(value.node);
            }
        }

        let mut pinned = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if !pinned.insert(node) {
                continue;
            }
            let Some(value) = settled.get(&node) else { continue };
            let axis = self.graph.node(node)?.role.axis();
            let request = match value.base {
                None => RelationRequest::required(Relation::Fix {
                    a: node,
                    value: value.offset,
                }),
                Some(base) => {
                    if settled.contains_key(&base) {
                        stack.push(base);
                    }
                    RelationRequest::required(Relation::Equal {
                        a: node,
                        b: base,
                        margin: value.offset,
                    })
                }
            };
            self.add_node_relation(axis, &request, RowSource::HandOff { node })?;
        }
        debug!(pinned = pinned.len(), "settled nodes handed to the tableau");
        Ok(pinned.len())
    }

    // ── Read-back ────────────────────────────────────────────────────────

    pub fn value_of(&self, var: AnchorVar) -> Result<f64, LayoutError> {
        Ok(self.system(var.axis).value(var.id)?)
    }

    /// Final value of `node`: its tableau variable when it has one, otherwise
    /// its graph offset plus the value of its base.
    pub fn value_of_node(&self, node: NodeId) -> Result<f64, LayoutError> {
        if !self.is_solved() {
            return Err(SolverError::NotSolved.into());
        }
        let mut total = 0.0;
        let mut current = node;
        let mut visited = BTreeSet::new();
        while visited.insert(current) {
            let axis = self.graph.node(current)?.role.axis();
            if let Some(id) = self.system(axis).variable(current) {
                return Ok(total + self.system(axis).value(id)?);
            }
            let Some(value) = self.graph.resolved(current) else {
                return Err(LayoutError::Unplaced(current));
            };
            total += value.offset;
            match value.base {
                Some(base) => current = base,
                None => return Ok(total),
            }
        }
        Err(LayoutError::Unplaced(node))
    }
}

/// Axis shared by every operand of a relation.
fn common_axis(operands: &[AnchorVar]) -> Result<Axis, LayoutError> {
    let mut axes = operands.iter().map(|var| var.axis);
    let first = axes.next().unwrap_or(Axis::Horizontal);
    match axes.find(|axis| *axis != first) {
        Some(second) => Err(LayoutError::MixedAxes { first, second }),
        None => Ok(first),
    }
}
