use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

// ─── Keys ────────────────────────────────────────────────────────────────────

new_key_type! {
    pub struct NodeId;
    pub struct BarrierId;
}

// ─── Roles ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Axis {
    Horizontal,
    Vertical,
}

/// Edge or reference line of a widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnchorRole {
    Left,
    Top,
    Right,
    Bottom,
    Baseline,
    CenterX,
    CenterY,
}

impl AnchorRole {
    pub fn axis(self) -> Axis {
        match self {
            AnchorRole::Left | AnchorRole::Right | AnchorRole::CenterX => Axis::Horizontal,
            AnchorRole::Top | AnchorRole::Bottom | AnchorRole::Baseline | AnchorRole::CenterY => {
                Axis::Vertical
            }
        }
    }

    /// Left and top start their axis.
    pub fn is_leading(self) -> bool {
        matches!(self, AnchorRole::Left | AnchorRole::Top)
    }

    pub fn opposite(self) -> Option<AnchorRole> {
        match self {
            AnchorRole::Left => Some(AnchorRole::Right),
            AnchorRole::Right => Some(AnchorRole::Left),
            AnchorRole::Top => Some(AnchorRole::Bottom),
            AnchorRole::Bottom => Some(AnchorRole::Top),
            _ => None,
        }
    }
}

/// What a node stands for. Dimension nodes carry sizes rather than
/// positions and are skipped by anchor-only invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    Anchor(AnchorRole),
    Dimension(Axis),
}

impl NodeRole {
    pub fn axis(self) -> Axis {
        match self {
            NodeRole::Anchor(role) => role.axis(),
            NodeRole::Dimension(axis) => axis,
        }
    }

    pub fn is_anchor(self) -> bool {
        matches!(self, NodeRole::Anchor(_))
    }
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    #[default]
    Unresolved,
    Resolved,
    /// Detached for the rest of the pass.
    Removed,
}

/// How a node derives its value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum Connection {
    #[default]
    Unconnected,
    /// `target + offset`, or `offset` alone without a target.
    Direct,
    /// Placed with its opposite between two targets. `leading` marks the
    /// node on the begin side; `bias` is the share of free space before it.
    Center { bias: f64, leading: bool },
    /// `target + offset`, resolved together with its opposite.
    Match,
    /// `target + (end − target)·percent`
    Percent { end: NodeId, percent: f64 },
    /// Part of a target cycle; only the tableau can place it.
    Chain,
    /// Placed by the aggregation of a barrier.
    Barrier(BarrierId),
}

impl Connection {
    pub fn name(&self) -> &'static str {
        match self {
            Connection::Unconnected => "unconnected",
            Connection::Direct => "direct",
            Connection::Center { .. } => "center",
            Connection::Match => "match",
            Connection::Percent { .. } => "percent",
            Connection::Chain => "chain",
            Connection::Barrier(_) => "barrier",
        }
    }

    /// Center and match nodes resolve and invalidate together with their
    /// opposite.
    pub fn is_paired(&self) -> bool {
        matches!(self, Connection::Center { .. } | Connection::Match)
    }
}

/// Graph-side relation pushed by the layout layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ResolutionEdge {
    Direct {
        target: Option<NodeId>,
        offset: f64,
    },
    Center {
        target: NodeId,
        margin: f64,
        opposite: NodeId,
        opposite_target: NodeId,
        opposite_margin: f64,
        /// Defaults to one half.
        bias: Option<f64>,
    },
    Match {
        target: NodeId,
        offset: f64,
        opposite: NodeId,
        opposite_target: NodeId,
        opposite_offset: f64,
    },
    Percent {
        begin: NodeId,
        end: NodeId,
        percent: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionNode {
    pub role: NodeRole,
    pub state: NodeState,
    pub connection: Connection,
    pub target: Option<NodeId>,
    pub offset: f64,
    pub opposite: Option<NodeId>,
    /// Size of the owning widget on this axis; `None` while flexible.
    pub span: Option<f64>,
    pub resolved_base: Option<NodeId>,
    pub resolved_offset: f64,
    /// Nodes woken when this one resolves.
    pub dependents: BTreeSet<NodeId>,
}

impl ResolutionNode {
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            state: NodeState::Unresolved,
            connection: Connection::Unconnected,
            target: None,
            offset: 0.0,
            opposite: None,
            span: None,
            resolved_base: None,
            resolved_offset: 0.0,
            dependents: BTreeSet::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state == NodeState::Resolved
    }

    pub fn is_removed(&self) -> bool {
        self.state == NodeState::Removed
    }

    /// Nodes whose resolution this node waits on.
    pub fn upstream(&self) -> Vec<NodeId> {
        let mut upstream: Vec<NodeId> = self.target.into_iter().collect();
        if let Connection::Percent { end, .. } = self.connection {
            upstream.push(end);
        }
        upstream
    }
}
