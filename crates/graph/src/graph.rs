use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::barrier::{Barrier, BarrierSide};
use crate::event::{ResolutionEvent, ResolvedValue};
use crate::node::{
    Axis, BarrierId, Connection, NodeId, NodeRole, NodeState, ResolutionEdge, ResolutionNode,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("node {0:?} does not belong to the current pass")]
    UnknownNode(NodeId),
    #[error("barrier {0:?} does not belong to the current pass")]
    UnknownBarrier(BarrierId),
    #[error("node {0:?} has been removed")]
    Removed(NodeId),
    #[error("node {0:?} cannot depend on itself")]
    SelfTarget(NodeId),
    #[error("node {node:?} on the {node_axis:?} axis cannot depend on {target:?} on the {target_axis:?} axis")]
    AxisMismatch {
        node: NodeId,
        node_axis: Axis,
        target: NodeId,
        target_axis: Axis,
    },
    #[error("bias {0} is outside [0, 1]")]
    InvalidBias(f64),
    #[error("{what} must be finite, got {value}")]
    NonFinite { what: &'static str, value: f64 },
}

/// Outcome of `ResolutionGraph::run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub resolved: usize,
    pub deferred: usize,
}

/// Incremental resolver for relations simple enough to settle without the
/// tableau. Values are kept relative to a base node so that anchors placed
/// by the tableau can still anchor a settled subgraph.
#[derive(Debug, Clone, Default)]
pub struct ResolutionGraph {
    nodes: SlotMap<NodeId, ResolutionNode>,
    barriers: SlotMap<BarrierId, Barrier>,
    order: Vec<NodeId>,
    events: Vec<ResolutionEvent>,
}

impl ResolutionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every node and barrier. Outstanding ids become stale.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.barriers.clear();
        self.order.clear();
        self.events.clear();
    }

    pub fn add_node(&mut self, role: NodeRole) -> NodeId {
        let id = self.nodes.insert(ResolutionNode::new(role));
        self.order.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&ResolutionNode, GraphError> {
        self.nodes.get(id).ok_or(GraphError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut ResolutionNode, GraphError> {
        self.nodes.get_mut(id).ok_or(GraphError::UnknownNode(id))
    }

    pub fn barrier(&self, id: BarrierId) -> Result<&Barrier, GraphError> {
        self.barriers.get(id).ok_or(GraphError::UnknownBarrier(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &ResolutionNode)> {
        self.order.iter().filter_map(|id| self.nodes.get(*id).map(|node| (*id, node)))
    }

    pub fn barriers(&self) -> impl Iterator<Item = (BarrierId, &Barrier)> {
        self.barriers.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn events(&self) -> &[ResolutionEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<ResolutionEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Building ─────────────────────────────────────────────────────────

    /// Pair two anchors of the same widget (left/right, top/bottom).
    pub fn set_opposite(&mut self, a: NodeId, b: NodeId) -> Result<(), GraphError> {
        self.check_target(a, b)?;
        self.node_mut(a)?.opposite = Some(b);
        self.node_mut(b)?.opposite = Some(a);
        Ok(())
    }

    /// Size of the owning widget on this node's axis; `None` when it is
    /// only known to the tableau.
    pub fn set_span(&mut self, id: NodeId, span: Option<f64>) -> Result<(), GraphError> {
        self.live(id)?;
        if let Some(span) = span {
            finite("span", span)?;
        }
        if self.node(id)?.span != span {
            self.invalidate(id)?;
            self.node_mut(id)?.span = span;
        }
        Ok(())
    }

    /// Connect `id` through `edge`, replacing its previous connection.
    pub fn add_edge(&mut self, id: NodeId, edge: ResolutionEdge) -> Result<(), GraphError> {
        self.live(id)?;
        match edge {
            ResolutionEdge::Direct { target, offset } => {
                finite("offset", offset)?;
                if let Some(target) = target {
                    self.check_target(id, target)?;
                }
                self.detach(id)?;
                self.connect(id, Connection::Direct, target, offset)?;
                if target.is_some() {
                    self.mark_cycle(id)?;
                }
            }
            ResolutionEdge::Center {
                target,
                margin,
                opposite,
                opposite_target,
                opposite_margin,
                bias,
            } => {
                let bias = bias.unwrap_or(0.5);
                if !(0.0..=1.0).contains(&bias) {
                    return Err(GraphError::InvalidBias(bias));
                }
                finite("margin", margin)?;
                finite("margin", opposite_margin)?;
                self.check_pair(id, target, opposite, opposite_target)?;
                // Roles pick the begin side, so an edge added from the end
                // anchor swaps them.
                let leading = match self.node(id)?.role {
                    NodeRole::Anchor(role) => role.is_leading(),
                    NodeRole::Dimension(_) => true,
                };
                self.detach(id)?;
                self.detach(opposite)?;
                self.connect(id, Connection::Center { bias, leading }, Some(target), margin)?;
                self.connect(
                    opposite,
                    Connection::Center { bias, leading: !leading },
                    Some(opposite_target),
                    opposite_margin,
                )?;
                self.set_opposite(id, opposite)?;
            }
            ResolutionEdge::Match {
                target,
                offset,
                opposite,
                opposite_target,
                opposite_offset,
            } => {
                finite("offset", offset)?;
                finite("offset", opposite_offset)?;
                self.check_pair(id, target, opposite, opposite_target)?;
                self.detach(id)?;
                self.detach(opposite)?;
                self.connect(id, Connection::Match, Some(target), offset)?;
                self.connect(opposite, Connection::Match, Some(opposite_target), opposite_offset)?;
                self.set_opposite(id, opposite)?;
            }
            ResolutionEdge::Percent { begin, end, percent } => {
                finite("percent", percent)?;
                self.check_target(id, begin)?;
                self.check_target(id, end)?;
                self.detach(id)?;
                self.connect(id, Connection::Percent { end, percent }, Some(begin), 0.0)?;
            }
        }
        let connection = self.node(id)?.connection.name();
        debug!(?id, connection, "resolution edge added");
        Ok(())
    }

    /// Make `node` a barrier over `dependencies`.
    pub fn add_barrier(
        &mut self,
        node: NodeId,
        side: BarrierSide,
        dependencies: &[NodeId],
        margin: f64,
    ) -> Result<BarrierId, GraphError> {
        self.live(node)?;
        finite("margin", margin)?;
        for dependency in dependencies {
            self.check_target(node, *dependency)?;
        }
        self.detach(node)?;
        let id = self.barriers.insert(Barrier {
            node,
            side,
            dependencies: dependencies.to_vec(),
            margin,
        });
        self.node_mut(node)?.connection = Connection::Barrier(id);
        for dependency in dependencies {
            self.node_mut(*dependency)?.dependents.insert(node);
        }
        debug!(?id, ?node, ?side, dependencies = dependencies.len(), "barrier added");
        Ok(id)
    }

    fn connect(
        &mut self,
        id: NodeId,
        connection: Connection,
        target: Option<NodeId>,
        offset: f64,
    ) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        node.connection = connection;
        node.target = target;
        node.offset = offset;
        for upstream in node.upstream() {
            self.node_mut(upstream)?.dependents.insert(id);
        }
        Ok(())
    }

    /// Undo the current connection of `id` (and of its partner when the two
    /// are paired).
    fn detach(&mut self, id: NodeId) -> Result<(), GraphError> {
        let node = self.node(id)?;
        let partner = node
            .opposite
            .filter(|_| node.connection.is_paired());
        self.detach_single(id)?;
        if let Some(partner) = partner {
            if self.node(partner)?.connection.is_paired() {
                self.detach_single(partner)?;
            }
        }
        Ok(())
    }

    fn detach_single(&mut self, id: NodeId) -> Result<(), GraphError> {
        if self.node(id)?.is_resolved() {
            self.invalidate(id)?;
        }
        let node = self.node(id)?;
        let upstream = node.upstream();
        let connection = node.connection;
        for other in upstream {
            if let Some(other) = self.nodes.get_mut(other) {
                other.dependents.remove(&id);
            }
        }
        if let Connection::Barrier(barrier) = connection {
            if let Some(barrier) = self.barriers.remove(barrier) {
                for dependency in barrier.dependencies {
                    if let Some(dependency) = self.nodes.get_mut(dependency) {
                        dependency.dependents.remove(&id);
                    }
                }
            }
        }
        let node = self.node_mut(id)?;
        node.connection = Connection::Unconnected;
        node.target = None;
        node.offset = 0.0;
        Ok(())
    }

    /// If following direct targets from `id` leads back to `id`, every node
    /// on the loop becomes a chain.
    fn mark_cycle(&mut self, id: NodeId) -> Result<bool, GraphError> {
        let mut path = vec![id];
        let mut seen = BTreeSet::from([id]);
        let mut cursor = self.node(id)?.target;
        while let Some(current) = cursor {
            if current == id {
                for member in &path {
                    if self.node(*member)?.is_resolved() {
                        self.invalidate(*member)?;
                    }
                    self.node_mut(*member)?.connection = Connection::Chain;
                }
                debug!(?id, length = path.len(), "target cycle downgraded to chain");
                return Ok(true);
            }
            if !seen.insert(current) {
                return Ok(false);
            }
            let node = self.node(current)?;
            if !matches!(node.connection, Connection::Direct | Connection::Chain) {
                return Ok(false);
            }
            path.push(current);
            cursor = node.target;
        }
        Ok(false)
    }

    fn live(&self, id: NodeId) -> Result<&ResolutionNode, GraphError> {
        let node = self.node(id)?;
        if node.is_removed() {
            return Err(GraphError::Removed(id));
        }
        Ok(node)
    }

    fn check_target(&self, id: NodeId, target: NodeId) -> Result<(), GraphError> {
        if id == target {
            return Err(GraphError::SelfTarget(id));
        }
        let node_axis = self.live(id)?.role.axis();
        let target_axis = self.live(target)?.role.axis();
        if node_axis != target_axis {
            return Err(GraphError::AxisMismatch {
                node: id,
                node_axis,
                target,
                target_axis,
            });
        }
        Ok(())
    }

    fn check_pair(
        &self,
        id: NodeId,
        target: NodeId,
        opposite: NodeId,
        opposite_target: NodeId,
    ) -> Result<(), GraphError> {
        self.check_target(id, opposite)?;
        self.check_target(id, target)?;
        self.check_target(opposite, opposite_target)
    }

    // ── Resolution ───────────────────────────────────────────────────────

    /// Pin `id` from outside the graph and wake its dependents.
    /// Barrier nodes are left to their aggregation and ignore the pin.
    pub fn resolve_to(&mut self, id: NodeId, base: Option<NodeId>, offset: f64) -> Result<(), GraphError> {
        self.live(id)?;
        finite("offset", offset)?;
        if let Connection::Barrier(_) = self.node(id)?.connection {
            trace!(?id, "barrier node is placed by its aggregation only");
            return Ok(());
        }
        if let Some(base) = base {
            self.check_target(id, base)?;
        }
        if self.node(id)?.is_resolved() {
            self.invalidate(id)?;
        }
        self.settle(id, base, offset)?;
        let dependents = self.node(id)?.dependents.iter().rev().copied().collect();
        self.propagate(dependents)?;
        Ok(())
    }

    /// Try to resolve `id` and cascade into everything it wakes. Returns the
    /// number of nodes settled.
    pub fn resolve(&mut self, id: NodeId) -> Result<usize, GraphError> {
        self.node(id)?;
        self.propagate(vec![id])
    }

    /// Resolve every node that can be, in insertion order.
    #[instrument(skip(self), fields(nodes = self.order.len()))]
    pub fn run(&mut self) -> Result<RunSummary, GraphError> {
        for id in self.order.clone() {
            self.propagate(vec![id])?;
        }
        let mut summary = RunSummary::default();
        for id in self.order.clone() {
            let node = self.node(id)?;
            match node.state {
                NodeState::Resolved => summary.resolved += 1,
                NodeState::Unresolved => {
                    summary.deferred += 1;
                    let connection = node.connection;
                    self.events.push(ResolutionEvent::Deferred { node: id, connection });
                }
                NodeState::Removed => {}
            }
        }
        debug!(resolved = summary.resolved, deferred = summary.deferred, "graph quiescent");
        Ok(summary)
    }

    /// Depth-first cascade: a settled node pushes its dependents, lowest id
    /// on top.
    fn propagate(&mut self, mut stack: Vec<NodeId>) -> Result<usize, GraphError> {
        let mut settled = 0;
        while let Some(id) = stack.pop() {
            for node in self.try_resolve(id)?.into_iter().rev() {
                settled += 1;
                stack.extend(self.node(node)?.dependents.iter().rev());
            }
        }
        Ok(settled)
    }

    fn position(&self, id: NodeId) -> Result<Option<(Option<NodeId>, f64)>, GraphError> {
        let node = self.node(id)?;
        Ok(node
            .is_resolved()
            .then_some((node.resolved_base, node.resolved_offset)))
    }

    fn try_resolve(&mut self, id: NodeId) -> Result<Vec<NodeId>, GraphError> {
        let node = self.node(id)?;
        if node.state != NodeState::Unresolved {
            return Ok(Vec::new());
        }
        let (connection, target, offset) = (node.connection, node.target, node.offset);
        match connection {
            Connection::Unconnected | Connection::Chain => Ok(Vec::new()),
            Connection::Barrier(barrier) => self.aggregate(barrier),
            Connection::Direct => {
                let position = match target {
                    None => Some((None, 0.0)),
                    Some(target) => self.position(target)?,
                };
                match position {
                    Some((base, value)) => {
                        self.settle(id, base, value + offset)?;
                        Ok(vec![id])
                    }
                    None => Ok(Vec::new()),
                }
            }
            Connection::Percent { end, percent } => {
                let Some(begin) = target else {
                    return Ok(Vec::new());
                };
                match (self.position(begin)?, self.position(end)?) {
                    (Some((base, from)), Some((end_base, to))) if base == end_base => {
                        self.settle(id, base, from + (to - from) * percent)?;
                        Ok(vec![id])
                    }
                    _ => Ok(Vec::new()),
                }
            }
            Connection::Match => self.resolve_match(id),
            Connection::Center { bias, leading } => self.resolve_center(id, bias, leading),
        }
    }

    fn resolve_match(&mut self, id: NodeId) -> Result<Vec<NodeId>, GraphError> {
        let node = self.node(id)?;
        let Some(opposite) = node.opposite else {
            return Ok(Vec::new());
        };
        let (target, offset) = (node.target, node.offset);
        let partner = self.node(opposite)?;
        if partner.state != NodeState::Unresolved {
            return Ok(Vec::new());
        }
        let (opposite_target, opposite_offset) = (partner.target, partner.offset);
        let (Some(target), Some(opposite_target)) = (target, opposite_target) else {
            return Ok(Vec::new());
        };
        let (Some((base, value)), Some((opposite_base, opposite_value))) =
            (self.position(target)?, self.position(opposite_target)?)
        else {
            return Ok(Vec::new());
        };
        self.settle(id, base, value + offset)?;
        self.settle(opposite, opposite_base, opposite_value + opposite_offset)?;
        Ok(vec![id, opposite])
    }

    /// Place a centered pair between its two targets, splitting the free
    /// space by `bias`. The pair keeps its span even when the targets cross;
    /// the free space is then negative.
    fn resolve_center(&mut self, id: NodeId, bias: f64, leading: bool) -> Result<Vec<NodeId>, GraphError> {
        let Some(opposite) = self.node(id)?.opposite else {
            return Ok(Vec::new());
        };
        let (begin, end) = if leading { (id, opposite) } else { (opposite, id) };
        let begin_node = self.node(begin)?;
        let end_node = self.node(end)?;
        if begin_node.state != NodeState::Unresolved || end_node.state != NodeState::Unresolved {
            return Ok(Vec::new());
        }
        let (Some(begin_target), Some(end_target)) = (begin_node.target, end_node.target) else {
            return Ok(Vec::new());
        };
        let Some(span) = begin_node.span.or(end_node.span) else {
            trace!(?begin, "center waits for a fixed span");
            return Ok(Vec::new());
        };
        let (mut begin_margin, mut end_margin, mut bias) = (begin_node.offset, end_node.offset, bias);
        let (Some((base, from)), Some((end_base, to))) =
            (self.position(begin_target)?, self.position(end_target)?)
        else {
            return Ok(Vec::new());
        };
        if base != end_base {
            trace!(?begin, "center targets resolve against different bases");
            return Ok(Vec::new());
        }
        if begin_target == end_target {
            bias = 0.5;
            begin_margin = 0.0;
            end_margin = 0.0;
        }

        let free = to - from - span - begin_margin - end_margin;
        let begin_value = from + begin_margin + free * bias;
        let end_value = to - end_margin - free * (1.0 - bias);
        self.settle(begin, base, begin_value)?;
        self.settle(end, base, end_value)?;
        Ok(vec![begin, end])
    }

    pub(crate) fn settle(&mut self, id: NodeId, base: Option<NodeId>, offset: f64) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        node.state = NodeState::Resolved;
        node.resolved_base = base;
        node.resolved_offset = offset;
        trace!(?id, ?base, offset, "node resolved");
        self.events.push(ResolutionEvent::Resolved(ResolvedValue {
            node: id,
            base,
            offset,
        }));
        Ok(())
    }

    // ── Invalidation ─────────────────────────────────────────────────────

    /// Clear `id`, its partner and everything that transitively depends on
    /// them. Returns the number of nodes cleared.
    pub fn invalidate(&mut self, id: NodeId) -> Result<usize, GraphError> {
        self.clear_from(id, false)
    }

    /// Like `invalidate`, but dimension nodes keep their resolution. They
    /// are still traversed.
    pub fn invalidate_anchors(&mut self, id: NodeId) -> Result<usize, GraphError> {
        self.clear_from(id, true)
    }

    fn clear_from(&mut self, start: NodeId, anchors_only: bool) -> Result<usize, GraphError> {
        self.node(start)?;
        let mut visited = BTreeSet::new();
        let mut stack = vec![start];
        let mut cleared = 0;
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            if node.is_resolved() && (!anchors_only || node.role.is_anchor()) {
                node.state = NodeState::Unresolved;
                node.resolved_base = None;
                node.resolved_offset = 0.0;
                cleared += 1;
                self.events.push(ResolutionEvent::Invalidated(id));
            }
            stack.extend(node.dependents.iter().rev());
            let pushes_opposite = node.connection.is_paired() || matches!(node.connection, Connection::Barrier(_));
            if let Some(opposite) = node.opposite.filter(|_| pushes_opposite) {
                stack.push(opposite);
            }
        }
        if cleared > 0 {
            debug!(?start, cleared, anchors_only, "resolution invalidated");
        }
        Ok(cleared)
    }

    /// Detach `id` for the rest of the pass. Its dependents are invalidated
    /// and it leaves every barrier it took part in.
    pub fn remove(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.live(id)?;
        self.invalidate(id)?;
        self.detach(id)?;
        for barrier in self.barriers.values_mut() {
            barrier.dependencies.retain(|dependency| *dependency != id);
        }
        let node = self.node_mut(id)?;
        node.state = NodeState::Removed;
        node.dependents.clear();
        debug!(?id, "node removed");
        Ok(())
    }

    // ── Hand-off ─────────────────────────────────────────────────────────

    pub fn resolved(&self, id: NodeId) -> Option<ResolvedValue> {
        let node = self.nodes.get(id)?;
        node.is_resolved().then_some(ResolvedValue {
            node: id,
            base: node.resolved_base,
            offset: node.resolved_offset,
        })
    }

    /// Every settled node, in insertion order.
    pub fn settled(&self) -> Vec<ResolvedValue> {
        self.order.iter().filter_map(|id| self.resolved(*id)).collect()
    }

    /// Live nodes the graph could not settle.
    pub fn unresolved(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, node)| node.state == NodeState::Unresolved)
            .map(|(id, _)| id)
            .collect()
    }
}

fn finite(what: &'static str, value: f64) -> Result<(), GraphError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(GraphError::NonFinite { what, value })
    }
}
