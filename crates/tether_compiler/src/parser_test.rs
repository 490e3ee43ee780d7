use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tether_model::specification::{Condition, Projection};

use crate::errors::CompilerError;
use crate::parser::parse_specification;

#[test]
fn parses_given_match_and_path() {
    let specification = parse_specification(
        "(order: Store.Order) {
            item: Store.Order.Item [
                item->order: Store.Order = order
            ]
        }",
    )
    .unwrap();

    assert_eq!(specification.given.len(), 1);
    assert_eq!(specification.given[0].name, "order");
    assert_eq!(specification.given[0].fact_type, "Store.Order");

    let m = &specification.matches[0];
    assert_eq!(m.unknown.fact_type, "Store.Order.Item");
    let Condition::Path(path) = &m.conditions[0] else { panic!("expected a path") };
    assert_eq!(path.roles_left[0].name, "order");
    assert_eq!(path.label_right, "order");
    assert!(path.roles_right.is_empty());
}

#[test]
fn a_reversed_path_is_normalized_onto_the_unknown() {
    let specification = parse_specification(
        "(order: Store.Order) {
            item: Store.Order.Item [
                order = item->order: Store.Order
            ]
        }",
    )
    .unwrap();

    let Condition::Path(path) = &specification.matches[0].conditions[0] else {
        panic!("expected a path")
    };
    assert_eq!(path.roles_left[0].name, "order");
    assert_eq!(path.label_right, "order");
}

#[test]
fn parses_negative_existentials() {
    let specification = parse_specification(
        "(order: Store.Order) {
            item: Store.Order.Item [
                item->order: Store.Order = order
                !E {
                    cancelled: Store.Order.Cancelled [
                        cancelled->order: Store.Order = order
                    ]
                }
            ]
        }",
    )
    .unwrap();

    let conditions = &specification.matches[0].conditions;
    assert_eq!(conditions.len(), 2);
    let Condition::Existential(existential) = &conditions[1] else {
        panic!("expected an existential")
    };
    assert!(!existential.exists);
    assert_eq!(existential.matches[0].unknown.name, "cancelled");
}

#[test]
fn parses_flat_projections() {
    let specification = parse_specification(
        "(order: Store.Order) {
            item: Store.Order.Item [
                item->order: Store.Order = order
            ]
        } => {
            hash = #item,
            placedAt = @item,
            product = item.product,
            itself = item
        }",
    )
    .unwrap();

    let Projection::Composite { components } = &specification.projection else {
        panic!("expected a composite projection")
    };
    let names: Vec<&str> = components.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["hash", "placedAt", "product", "itself"]);
    assert_matches!(components[0].projection, Projection::Hash { .. });
    assert_matches!(components[1].projection, Projection::Time { .. });
    assert_matches!(components[2].projection, Projection::Field { .. });
    assert_matches!(components[3].projection, Projection::Fact { .. });
}

#[test]
fn parses_child_specification_projections() {
    let specification = parse_specification(
        "(store: Store) {
            order: Store.Order [
                order->store: Store = store
            ]
        } => {
            items = {
                item: Store.Order.Item [
                    item->order: Store.Order = order
                ]
            } => {
                product = item.product
            }
        }",
    )
    .unwrap();

    let Projection::Composite { components } = &specification.projection else {
        panic!("expected a composite projection")
    };
    let Projection::Specification(child) = &components[0].projection else {
        panic!("expected a child specification")
    };
    assert_eq!(child.matches[0].unknown.name, "item");
    assert_matches!(&*child.projection, Projection::Composite { .. });
}

#[test]
fn a_missing_projection_defaults_to_an_empty_composite() {
    let specification = parse_specification("(order: Store.Order) { }").unwrap();
    assert_eq!(specification.projection, Projection::Composite { components: vec![] });
    assert!(specification.matches.is_empty());
}

#[test]
fn syntax_errors_carry_a_position() {
    let result = parse_specification("(order Store.Order)");
    assert_matches!(
        result,
        Err(CompilerError::Syntax { line: 1, .. })
    );
}

#[test]
fn a_path_must_touch_the_unknown() {
    let result = parse_specification(
        "(a: A, b: B) {
            c: C [
                a = b
            ]
        }",
    );
    assert_matches!(result, Err(CompilerError::Syntax { .. }));
}
