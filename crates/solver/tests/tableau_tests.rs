//! Scenario tests for the tableau solver through its public API.

use anchor_solver::{
    Disposition, LinearSystem, Owner, Relation, RelationRequest, SolverConfig, SolverWarning,
    Strength, VariableId,
};
use approx::assert_relative_eq;

fn declare(system: &mut LinearSystem, count: u64) -> Vec<VariableId> {
    (0..count).map(|i| system.declare(Owner(i)).unwrap()).collect()
}

fn require(system: &mut LinearSystem, relation: Relation) {
    system.add_relation(&RelationRequest::required(relation)).unwrap();
}

fn prefer(system: &mut LinearSystem, relation: Relation, strength: Strength) {
    system.add_relation(&RelationRequest::soft(relation, strength)).unwrap();
}

#[test]
fn test_row_of_boxes_with_margins() {
    // |8|[ 0..50 ]|8|[ ...70 ]
    let mut system = LinearSystem::new(SolverConfig::default());
    let v = declare(&mut system, 4);
    let (left0, right0, left1, right1) = (v[0], v[1], v[2], v[3]);
    require(&mut system, Relation::Fix { a: left0, value: 8.0 });
    require(&mut system, Relation::Equal { a: right0, b: left0, margin: 50.0 });
    require(&mut system, Relation::Equal { a: left1, b: right0, margin: 8.0 });
    require(&mut system, Relation::Equal { a: right1, b: left1, margin: 70.0 });

    let result = system.solve().unwrap();
    assert!(result.is_clean());
    assert_eq!(system.value(right0).unwrap(), 58.0);
    assert_eq!(system.value(left1).unwrap(), 66.0);
    assert_eq!(system.value(right1).unwrap(), 136.0);
}

#[test]
fn test_flexible_width_fills_up_to_preference() {
    // parent 0..200, child pinned left with 10, right wants to be at 500
    // but must stay inside the parent with a 10 margin.
    let mut system = LinearSystem::new(SolverConfig::default());
    let v = declare(&mut system, 4);
    let (parent_left, parent_right, left, right) = (v[0], v[1], v[2], v[3]);
    require(&mut system, Relation::Fix { a: parent_left, value: 0.0 });
    require(&mut system, Relation::Fix { a: parent_right, value: 200.0 });
    require(&mut system, Relation::Equal { a: left, b: parent_left, margin: 10.0 });
    require(&mut system, Relation::AtMost { a: right, b: parent_right, margin: -10.0 });
    require(&mut system, Relation::AtLeast { a: right, b: left, margin: 0.0 });
    prefer(&mut system, Relation::Fix { a: right, value: 500.0 }, Strength::Medium);

    system.solve().unwrap();
    assert_relative_eq!(system.value(left).unwrap(), 10.0, epsilon = 1e-9);
    assert_relative_eq!(system.value(right).unwrap(), 190.0, epsilon = 1e-9);
}

#[test]
fn test_percent_split() {
    let mut system = LinearSystem::new(SolverConfig::default());
    let v = declare(&mut system, 3);
    require(&mut system, Relation::Fix { a: v[0], value: 100.0 });
    require(&mut system, Relation::Fix { a: v[1], value: 300.0 });
    require(
        &mut system,
        Relation::Percent {
            target: v[2],
            begin: v[0],
            end: v[1],
            percent: 0.25,
        },
    );
    system.solve().unwrap();
    assert_relative_eq!(system.value(v[2]).unwrap(), 150.0, epsilon = 1e-9);
}

#[test]
fn test_biased_centering_between_targets() {
    let mut system = LinearSystem::new(SolverConfig::default());
    let v = declare(&mut system, 4);
    let (begin_target, end_target, begin, end) = (v[0], v[1], v[2], v[3]);
    require(&mut system, Relation::Fix { a: begin_target, value: 0.0 });
    require(&mut system, Relation::Fix { a: end_target, value: 100.0 });
    require(&mut system, Relation::Equal { a: end, b: begin, margin: 20.0 });
    require(
        &mut system,
        Relation::Centering {
            begin,
            begin_target,
            begin_margin: 0.0,
            bias: 0.25,
            end_target,
            end,
            end_margin: 0.0,
        },
    );
    system.solve().unwrap();
    // free space 80, a quarter of it before the span
    assert_relative_eq!(system.value(begin).unwrap(), 20.0, epsilon = 1e-9);
    assert_relative_eq!(system.value(end).unwrap(), 40.0, epsilon = 1e-9);
}

#[test]
fn test_centering_with_zero_width_lands_on_midpoint() {
    let mut system = LinearSystem::new(SolverConfig::default());
    let v = declare(&mut system, 4);
    require(&mut system, Relation::Fix { a: v[0], value: 0.0 });
    require(&mut system, Relation::Fix { a: v[1], value: 100.0 });
    require(&mut system, Relation::Equal { a: v[3], b: v[2], margin: 0.0 });
    require(
        &mut system,
        Relation::Centering {
            begin: v[2],
            begin_target: v[0],
            begin_margin: 0.0,
            bias: 0.5,
            end_target: v[1],
            end: v[3],
            end_margin: 0.0,
        },
    );
    system.solve().unwrap();
    assert_relative_eq!(system.value(v[2]).unwrap(), 50.0, epsilon = 1e-9);
    assert_relative_eq!(system.value(v[3]).unwrap(), 50.0, epsilon = 1e-9);
}

#[test]
fn test_soft_tiers_are_lexicographic_not_weighted() {
    // Many weak preferences never outweigh a single stronger one.
    let mut system = LinearSystem::new(SolverConfig::default());
    let v = declare(&mut system, 1);
    for _ in 0..50 {
        prefer(&mut system, Relation::Fix { a: v[0], value: 0.0 }, Strength::Low);
    }
    prefer(&mut system, Relation::Fix { a: v[0], value: 100.0 }, Strength::Medium);
    system.solve().unwrap();
    assert_relative_eq!(system.value(v[0]).unwrap(), 100.0, epsilon = 1e-9);
}

#[test]
fn test_demoted_row_still_pulls_when_free() {
    // The demoted row sits at the strongest soft tier, above any soft row.
    let mut system = LinearSystem::new(SolverConfig::default());
    let v = declare(&mut system, 2);
    require(&mut system, Relation::Fix { a: v[1], value: 0.0 });
    require(&mut system, Relation::AtLeast { a: v[0], b: v[1], margin: 10.0 });
    let conflicting = system
        .add_relation(&RelationRequest::required(Relation::AtMost {
            a: v[0],
            b: v[1],
            margin: 4.0,
        }))
        .unwrap();
    prefer(&mut system, Relation::Fix { a: v[0], value: 40.0 }, Strength::Highest);

    let result = system.solve().unwrap();
    assert_eq!(system.disposition(conflicting), Some(Disposition::Demoted));
    assert!(result
        .warnings
        .contains(&SolverWarning::Demoted { handle: conflicting }));
    // the demoted bound wins over the soft preference, within the hard bound
    assert_relative_eq!(system.value(v[0]).unwrap(), 10.0, epsilon = 1e-9);
}

#[test]
fn test_iteration_limit_is_a_warning() {
    let config = SolverConfig {
        max_iterations: 0,
        ..SolverConfig::default()
    };
    let mut system = LinearSystem::new(config);
    let v = declare(&mut system, 2);
    require(&mut system, Relation::Fix { a: v[1], value: 0.0 });
    require(&mut system, Relation::AtLeast { a: v[0], b: v[1], margin: 5.0 });
    prefer(&mut system, Relation::Fix { a: v[0], value: 30.0 }, Strength::Low);
    let result = system.solve().unwrap();
    assert!(matches!(
        result.warnings.as_slice(),
        [SolverWarning::IterationLimit { iterations: 0 }]
    ));
    // best basis so far still honors the required rows
    assert!(system.value(v[0]).unwrap() >= 5.0 - 1e-9);
}

#[test]
fn test_pass_reuse_after_reset() {
    let mut system = LinearSystem::new(SolverConfig::default());
    for width in [10.0, 20.0, 30.0] {
        system.reset();
        let v = declare(&mut system, 2);
        require(&mut system, Relation::Fix { a: v[0], value: 0.0 });
        require(&mut system, Relation::Equal { a: v[1], b: v[0], margin: width });
        system.solve().unwrap();
        assert_eq!(system.value(v[1]).unwrap(), width);
    }
    assert_eq!(system.registry().len(), 2);
}

#[test]
fn test_untouched_variable_keeps_value() {
    let mut system = LinearSystem::new(SolverConfig::default());
    let v = declare(&mut system, 2);
    require(&mut system, Relation::Fix { a: v[0], value: 3.0 });
    system.solve().unwrap();
    assert_eq!(system.value(v[1]).unwrap(), 0.0);
    assert_eq!(system.value(v[0]).unwrap(), 3.0);
}
