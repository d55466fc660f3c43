//! Engine-level scenarios: graph fast path, tableau fallback and tracing.

use anchor_graph::{AnchorRole, Axis, BarrierSide, Connection, NodeId, ResolutionEdge, ResolutionEvent};
use anchor_layout::{LayoutConfig, LayoutEngine, LayoutError, LayoutWarning, RowSource};
use anchor_solver::{Disposition, Relation, RelationRequest, RowHandle, Strength};
use approx::assert_relative_eq;

fn anchor(engine: &mut LayoutEngine, role: AnchorRole) -> NodeId {
    engine.declare_anchor(role).unwrap()
}

fn direct(engine: &mut LayoutEngine, node: NodeId, target: Option<NodeId>, offset: f64) {
    engine
        .add_resolution_edge(node, ResolutionEdge::Direct { target, offset })
        .unwrap();
}

#[test]
fn test_chain_cycle_is_solved_by_the_tableau() {
    let mut engine = LayoutEngine::new(LayoutConfig::default());
    let x = anchor(&mut engine, AnchorRole::Left);
    let y = anchor(&mut engine, AnchorRole::Left);
    direct(&mut engine, x, Some(y), 10.0);
    direct(&mut engine, y, Some(x), -10.0);
    let pin = engine.declare_variable(y).unwrap();
    engine
        .add_relation(&RelationRequest::required(Relation::Fix { a: pin, value: 5.0 }))
        .unwrap();

    let report = engine.solve().unwrap();
    assert_eq!(report.graph.deferred, 2);
    assert_eq!(report.lowered, 2);
    assert!(report.is_clean());
    assert_eq!(engine.graph().node(x).unwrap().connection, Connection::Chain);
    assert_relative_eq!(engine.value_of_node(x).unwrap(), 15.0, epsilon = 1e-9);
    assert_relative_eq!(engine.value_of_node(y).unwrap(), 5.0, epsilon = 1e-9);

    // The second half of the cycle adds nothing new.
    let system = engine.system(Axis::Horizontal).system();
    assert_eq!(system.disposition(RowHandle(2)), Some(Disposition::Redundant));
}

/// A pair centered between targets at `from` and `to`, with margins 10 and
/// 5. With `settled` the end target is placed by the graph, otherwise only by
/// a client row.
fn centered_pair(right_first: bool, from: f64, to: f64, span: Option<f64>, settled: bool) -> (f64, f64) {
    let mut engine = LayoutEngine::new(LayoutConfig::default());
    let begin_target = anchor(&mut engine, AnchorRole::Left);
    let end_target = anchor(&mut engine, AnchorRole::Right);
    let left = anchor(&mut engine, AnchorRole::Left);
    let right = anchor(&mut engine, AnchorRole::Right);
    direct(&mut engine, begin_target, None, from);
    if settled {
        direct(&mut engine, end_target, None, to);
    } else {
        let var = engine.declare_variable(end_target).unwrap();
        engine
            .add_relation(&RelationRequest::required(Relation::Fix { a: var, value: to }))
            .unwrap();
    }
    let (node, edge) = if right_first {
        (
            right,
            ResolutionEdge::Center {
                target: end_target,
                margin: 5.0,
                opposite: left,
                opposite_target: begin_target,
                opposite_margin: 10.0,
                bias: None,
            },
        )
    } else {
        (
            left,
            ResolutionEdge::Center {
                target: begin_target,
                margin: 10.0,
                opposite: right,
                opposite_target: end_target,
                opposite_margin: 5.0,
                bias: None,
            },
        )
    };
    engine.add_resolution_edge(node, edge).unwrap();
    engine.set_span(left, span).unwrap();
    engine.solve().unwrap();
    (engine.value_of_node(left).unwrap(), engine.value_of_node(right).unwrap())
}

#[test]
fn test_center_agrees_across_graph_and_tableau() {
    for right_first in [false, true] {
        for (from, to) in [(0.0, 100.0), (100.0, 0.0)] {
            let graph = centered_pair(right_first, from, to, Some(20.0), true);
            let tableau = centered_pair(right_first, from, to, Some(20.0), false);
            assert_relative_eq!(graph.1 - graph.0, 20.0, epsilon = 1e-9);
            assert_relative_eq!(graph.0, 42.5, epsilon = 1e-9);
            assert_relative_eq!(tableau.0, graph.0, epsilon = 1e-9);
            assert_relative_eq!(tableau.1, graph.1, epsilon = 1e-9);
        }
    }
}

#[test]
fn test_stretched_center_added_from_end_anchor() {
    for settled in [true, false] {
        let (left, right) = centered_pair(true, 0.0, 100.0, None, settled);
        assert_relative_eq!(left, 10.0, epsilon = 1e-9);
        assert_relative_eq!(right, 95.0, epsilon = 1e-9);
    }
}

#[test]
fn test_closed_barrier_falls_back_to_tableau() {
    let mut engine = LayoutEngine::new(LayoutConfig::default());
    let wall = anchor(&mut engine, AnchorRole::Left);
    direct(&mut engine, wall, None, 200.0);

    // `flexible` is only placed by the tableau.
    let flexible = anchor(&mut engine, AnchorRole::Right);
    let fixed = anchor(&mut engine, AnchorRole::Right);
    direct(&mut engine, fixed, None, 70.0);
    let var = engine.declare_variable(flexible).unwrap();
    let wall_var = engine.declare_variable(wall).unwrap();
    engine
        .add_relation(&RelationRequest::required(Relation::Equal {
            a: var,
            b: wall_var,
            margin: -10.0,
        }))
        .unwrap();

    let barrier = anchor(&mut engine, AnchorRole::Left);
    engine
        .add_barrier(barrier, BarrierSide::Trailing, &[flexible, fixed], 0.0)
        .unwrap();
    let after = anchor(&mut engine, AnchorRole::Left);
    direct(&mut engine, after, Some(barrier), 5.0);

    let report = engine.solve().unwrap();
    assert!(report.warnings.contains(&LayoutWarning::BarrierDeferred { node: barrier }));
    assert_relative_eq!(engine.value_of_node(barrier).unwrap(), 190.0, epsilon = 1e-9);
    assert_relative_eq!(engine.value_of_node(after).unwrap(), 195.0, epsilon = 1e-9);
}

#[test]
fn test_open_barrier_stays_in_the_graph() {
    let mut engine = LayoutEngine::new(LayoutConfig::default());
    let a = anchor(&mut engine, AnchorRole::Right);
    let b = anchor(&mut engine, AnchorRole::Right);
    direct(&mut engine, a, None, 40.0);
    direct(&mut engine, b, None, 70.0);
    let barrier = anchor(&mut engine, AnchorRole::Left);
    engine
        .add_barrier(barrier, BarrierSide::Trailing, &[a, b], 4.0)
        .unwrap();

    let report = engine.solve().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.lowered, 0);
    assert_relative_eq!(engine.value_of_node(barrier).unwrap(), 74.0);
}

#[test]
fn test_settled_base_chain_is_handed_off() {
    // `root` is placed by the tableau, `mid` and `leaf` hang off it in the
    // graph, and a client row mentions `leaf`.
    let mut engine = LayoutEngine::new(LayoutConfig::default());
    let root = anchor(&mut engine, AnchorRole::Left);
    let mid = anchor(&mut engine, AnchorRole::Left);
    let leaf = anchor(&mut engine, AnchorRole::Left);
    engine.resolve_to(mid, Some(root), 10.0).unwrap();
    direct(&mut engine, leaf, Some(mid), 5.0);

    let root_var = engine.declare_variable(root).unwrap();
    let leaf_var = engine.declare_variable(leaf).unwrap();
    engine
        .add_relation(&RelationRequest::required(Relation::Fix { a: root_var, value: 100.0 }))
        .unwrap();
    let report = engine.solve().unwrap();

    // leaf = root + 15 is one row; `mid` never needs a variable.
    assert_eq!(report.handed_off, 1);
    assert!(engine.system(Axis::Horizontal).variable(mid).is_none());
    assert_relative_eq!(engine.value_of(leaf_var).unwrap(), 115.0, epsilon = 1e-9);
    assert_relative_eq!(engine.value_of_node(mid).unwrap(), 110.0, epsilon = 1e-9);
}

#[test]
fn test_removed_node_is_left_unplaced() {
    let mut engine = LayoutEngine::new(LayoutConfig::default());
    let a = anchor(&mut engine, AnchorRole::Left);
    let b = anchor(&mut engine, AnchorRole::Left);
    direct(&mut engine, a, None, 0.0);
    direct(&mut engine, b, Some(a), 10.0);
    engine.remove_node(a).unwrap();

    let report = engine.solve().unwrap();
    assert_eq!(report.lowered, 0);
    assert!(matches!(engine.value_of_node(b), Err(LayoutError::Unplaced(node)) if node == b));
}

#[test]
fn test_trace_records_graph_and_rows() {
    let mut engine = LayoutEngine::new(LayoutConfig::debug());
    let left = anchor(&mut engine, AnchorRole::Left);
    let right = anchor(&mut engine, AnchorRole::Right);
    direct(&mut engine, left, None, 10.0);
    let a = engine.declare_variable(left).unwrap();
    let b = engine.declare_variable(right).unwrap();
    engine
        .add_relation(&RelationRequest::required(Relation::Equal { a: b, b: a, margin: 30.0 }))
        .unwrap();
    engine.solve().unwrap();

    let trace = engine.trace().unwrap();
    assert!(matches!(trace.graph.first(), Some(ResolutionEvent::Resolved(value)) if value.node == left));
    assert_eq!(trace.rows.len(), 2);
    assert_eq!(trace.rows[0].source, RowSource::Client);
    assert_eq!(trace.rows[1].source, RowSource::HandOff { node: left });
    assert!(!trace.axes[0].events.is_empty());
    assert!(trace.axes[1].events.is_empty());

    let json = trace.to_json().unwrap();
    assert!(json.contains("\"HandOff\""));
    let text = engine.render_trace().unwrap();
    assert!(text.contains("resolved left_0 = 10"));
    assert!(text.contains("hand-off of left_0"));
}

#[test]
fn test_no_trace_by_default() {
    let mut engine = LayoutEngine::new(LayoutConfig::default());
    anchor(&mut engine, AnchorRole::Left);
    engine.solve().unwrap();
    assert!(engine.trace().is_none());
    assert!(engine.render_trace().is_none());
}

#[test]
fn test_parallel_axes_match_sequential() {
    fn run(config: LayoutConfig) -> Vec<f64> {
        let mut engine = LayoutEngine::new(config);
        let left = anchor(&mut engine, AnchorRole::Left);
        let right = anchor(&mut engine, AnchorRole::Right);
        let top = anchor(&mut engine, AnchorRole::Top);
        let bottom = anchor(&mut engine, AnchorRole::Bottom);
        let nodes = [left, right, top, bottom];
        let vars: Vec<_> = nodes
            .iter()
            .map(|node| engine.declare_variable(*node).unwrap())
            .collect();
        for (a, b, margin) in [(1, 0, 50.0), (3, 2, 20.0)] {
            engine
                .add_relation(&RelationRequest::required(Relation::AtLeast {
                    a: vars[a],
                    b: vars[b],
                    margin,
                }))
                .unwrap();
        }
        for (var, value) in [(0, 3.0), (1, 40.0), (2, 7.0), (3, 90.0)] {
            engine
                .add_relation(&RelationRequest::soft(
                    Relation::Fix { a: vars[var], value },
                    Strength::Medium,
                ))
                .unwrap();
        }
        engine.solve().unwrap();
        nodes.iter().map(|node| engine.value_of_node(*node).unwrap()).collect()
    }

    let sequential = run(LayoutConfig::default());
    let parallel = run(LayoutConfig::parallel());
    assert_eq!(sequential, parallel);
    assert_relative_eq!(sequential[3], 90.0, epsilon = 1e-9);
}
