//! Readable labels for nodes and tableau variables.
//!
//! A context is owned by one engine and only exists when debug names are
//! enabled. Counters restart with every pass.

use std::collections::HashMap;

use anchor_graph::{AnchorRole, Axis, NodeId, NodeRole};
use anchor_solver::VariableId;

#[derive(Debug, Clone, Default)]
pub struct NamingContext {
    counters: HashMap<String, usize>,
    nodes: HashMap<NodeId, String>,
    variables: HashMap<(Axis, VariableId), String>,
}

impl NamingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused `prefix_N`.
    pub fn unique(&mut self, prefix: &str) -> String {
        let counter = self.counters.entry(prefix.to_string()).or_insert(0);
        let name = format!("{prefix}_{counter}");
        *counter += 1;
        name
    }

    /// Label `node` after its role.
    pub fn name_node(&mut self, node: NodeId, role: NodeRole) -> &str {
        let name = self.unique(role_prefix(role));
        self.nodes.entry(node).or_insert(name)
    }

    pub fn rename_node(&mut self, node: NodeId, name: impl Into<String>) {
        self.nodes.insert(node, name.into());
    }

    /// Give the variable of `node` the node's label.
    pub fn name_variable(&mut self, axis: Axis, variable: VariableId, node: NodeId) {
        if let Some(name) = self.nodes.get(&node) {
            self.variables.insert((axis, variable), name.clone());
        }
    }

    pub fn node(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(&node).map(String::as_str)
    }

    pub fn variable(&self, axis: Axis, variable: VariableId) -> Option<&str> {
        self.variables.get(&(axis, variable)).map(String::as_str)
    }

    pub fn describe_node(&self, node: NodeId) -> String {
        self.node(node)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{node:?}"))
    }

    pub fn describe_variable(&self, axis: Axis, variable: VariableId) -> String {
        self.variable(axis, variable)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{variable:?}"))
    }
}

fn role_prefix(role: NodeRole) -> &'static str {
    match role {
        NodeRole::Anchor(AnchorRole::Left) => "left",
        NodeRole::Anchor(AnchorRole::Top) => "top",
        NodeRole::Anchor(AnchorRole::Right) => "right",
        NodeRole::Anchor(AnchorRole::Bottom) => "bottom",
        NodeRole::Anchor(AnchorRole::Baseline) => "baseline",
        NodeRole::Anchor(AnchorRole::CenterX) => "center_x",
        NodeRole::Anchor(AnchorRole::CenterY) => "center_y",
        NodeRole::Dimension(Axis::Horizontal) => "width",
        NodeRole::Dimension(Axis::Vertical) => "height",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_names_count_per_role() {
        let mut keys: SlotMap<NodeId, ()> = SlotMap::with_key();
        let mut naming = NamingContext::new();
        let a = keys.insert(());
        let b = keys.insert(());
        let c = keys.insert(());
        assert_eq!(naming.name_node(a, NodeRole::Anchor(AnchorRole::Left)), "left_0");
        assert_eq!(naming.name_node(b, NodeRole::Anchor(AnchorRole::Left)), "left_1");
        assert_eq!(naming.name_node(c, NodeRole::Dimension(Axis::Vertical)), "height_0");
    }

    #[test]
    fn test_separate_contexts_do_not_share_counters() {
        let mut first = NamingContext::new();
        let mut second = NamingContext::new();
        assert_eq!(first.unique("row"), "row_0");
        assert_eq!(first.unique("row"), "row_1");
        assert_eq!(second.unique("row"), "row_0");
    }

    #[test]
    fn test_unnamed_falls_back_to_debug() {
        let mut keys: SlotMap<NodeId, ()> = SlotMap::with_key();
        let naming = NamingContext::new();
        let a = keys.insert(());
        assert_eq!(naming.describe_node(a), format!("{a:?}"));
    }
}
