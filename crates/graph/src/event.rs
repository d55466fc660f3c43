use serde::{Deserialize, Serialize};

use crate::node::{Connection, NodeId};

/// A settled node, handed to the tableau as `node = base + offset`
/// (or `node = offset` without a base).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedValue {
    pub node: NodeId,
    pub base: Option<NodeId>,
    pub offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResolutionEvent {
    Resolved(ResolvedValue),
    Invalidated(NodeId),
    /// Still unresolved after `run`; the tableau has to place it.
    Deferred { node: NodeId, connection: Connection },
}
