use pretty_assertions::assert_eq;

use crate::query_description::{QueryDescription, SqlParameter};

#[test]
fn builder_operations_leave_the_receiver_untouched() {
    let empty = QueryDescription::default();
    let (with_parameter, index) = empty.with_parameter(SqlParameter::Int(7));

    assert_eq!(index, 1);
    assert_eq!(empty, QueryDescription::default());
    assert_eq!(with_parameter.parameters, vec![SqlParameter::Int(7)]);
}

#[test]
fn input_allocates_type_and_hash_parameters() {
    let (q, fact_index) =
        QueryDescription::default().with_input("order", "Order", 2, Some("abc"), &[]);

    assert_eq!(fact_index, 1);
    let input = q.input_by_label("order").unwrap();
    assert_eq!(input.fact_type_parameter, 1);
    assert_eq!(input.fact_hash_parameter, Some(2));
    assert_eq!(
        q.parameters,
        vec![SqlParameter::Int(2), SqlParameter::String("abc".to_string())]
    );
}

#[test]
fn unbound_input_has_no_hash_parameter() {
    let (q, _) = QueryDescription::default().with_input("root", "Order", 2, None, &[]);

    let input = q.input_by_label("root").unwrap();
    assert_eq!(input.fact_hash_parameter, None);
    assert_eq!(q.parameters, vec![SqlParameter::Int(2)]);
}

#[test]
fn edge_indexes_are_unique_across_the_existential_tree() {
    let (q, _) = QueryDescription::default().with_input("a", "A", 1, Some("h"), &[]);
    let (q, f2) = q.with_fact("B");
    let (q, e1) = q.with_edge(1, f2, 10, &[]);
    let (q, branch) = q.with_existential_condition(false, &[]);
    let (q, f3) = q.with_fact("C");
    let (q, e2) = q.with_edge(f2, f3, 11, &branch);
    let (q, nested) = q.with_existential_condition(true, &branch);
    let (q, f4) = q.with_fact("D");
    let (q, e3) = q.with_edge(f3, f4, 12, &nested);

    assert_eq!((e1, e2, e3), (1, 2, 3));
    assert_eq!(q.edges.len(), 1);
    let outer = &q.existential_conditions[0];
    assert_eq!(outer.edges[0].edge_index, 2);
    assert_eq!(outer.existential_conditions[0].edges[0].edge_index, 3);
}

#[test]
fn inputs_on_a_branch_are_recorded_on_that_branch() {
    let (q, _) = QueryDescription::default().with_input("a", "A", 1, Some("h"), &[]);
    let (q, branch) = q.with_existential_condition(false, &[]);
    let (q, _) = q.with_input("user", "User", 9, Some("u"), &branch);

    assert_eq!(q.inputs.len(), 1);
    assert_eq!(q.existential_conditions[0].inputs.len(), 1);
    assert_eq!(q.existential_conditions[0].inputs[0].label, "user");
}

#[test]
fn unsatisfiable_has_no_inputs() {
    assert!(!QueryDescription::unsatisfiable().is_satisfiable());
}
