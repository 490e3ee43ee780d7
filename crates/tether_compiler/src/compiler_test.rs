use std::collections::HashMap;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tether_model::fact::FactReference;
use tether_model::specification::{
    Condition,
    ExistentialCondition,
    Label,
    Match,
    PathCondition,
    Projection,
    Role,
    Specification,
};

use crate::compiler::{decode_bookmark, encode_bookmark, SpecificationCompiler};
use crate::errors::CompilerError;
use crate::SchemaIndex;

/// The store/order domain used throughout the compiler tests.
pub struct TestSchema {
    types: HashMap<String, i32>,
    roles: HashMap<(i32, String), i32>,
}

impl TestSchema {
    pub fn order_domain() -> Self {
        let types = HashMap::from([
            ("Store".to_string(), 1),
            ("Order".to_string(), 2),
            ("Order.Item".to_string(), 3),
            ("Order.Cancelled".to_string(), 4),
            ("Product".to_string(), 5),
        ]);
        let roles = HashMap::from([
            ((2, "store".to_string()), 1),
            ((3, "order".to_string()), 2),
            ((3, "product".to_string()), 3),
            ((4, "order".to_string()), 4),
        ]);
        Self { types, roles }
    }
}

impl SchemaIndex for TestSchema {
    fn fact_type_id(&self, name: &str) -> Option<i32> {
        self.types.get(name).copied()
    }

    fn role_id(&self, defining_fact_type_id: i32, name: &str) -> Option<i32> {
        self.roles.get(&(defining_fact_type_id, name.to_string())).copied()
    }
}

pub fn items_of_order() -> Specification {
    Specification {
        given: vec![Label::new("order", "Order")],
        matches: vec![Match::new(
            Label::new("i", "Order.Item"),
            vec![Condition::Path(PathCondition {
                roles_left: vec![Role::new("order", "Order")],
                label_right: "order".to_string(),
                roles_right: vec![],
            })],
        )],
        projection: Projection::Composite { components: vec![] },
    }
}

fn order_reference() -> FactReference {
    FactReference::new("Order", "ohash")
}

#[test]
fn given_count_is_validated() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    let result = compiler.result_query_tree(&[], &items_of_order());
    assert_matches!(
        result,
        Err(CompilerError::GivenCountMismatch { expected: 1, actual: 0 })
    );
}

#[test]
fn given_type_is_validated() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    let result = compiler
        .result_query_tree(&[FactReference::new("Store", "shash")], &items_of_order());
    assert_matches!(result, Err(CompilerError::GivenTypeMismatch { .. }));
}

#[test]
fn a_path_compiles_to_an_input_an_edge_and_an_output() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    let tree = compiler
        .result_query_tree(&[order_reference()], &items_of_order())
        .unwrap()
        .unwrap();
    let query = tree.query.unwrap();

    let names: Vec<&str> = query.labels.iter().map(|label| label.name.as_str()).collect();
    assert_eq!(names, vec!["order", "i"]);
    assert_eq!(query.output_fact_indexes, vec![2]);
}

#[test]
fn an_unknown_given_type_is_unsatisfiable() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    let mut specification = items_of_order();
    specification.given[0].fact_type = "Never.Written".to_string();
    let tree = compiler
        .result_query_tree(&[FactReference::new("Never.Written", "h")], &specification)
        .unwrap();
    assert_eq!(tree, None);
}

#[test]
fn an_unknown_role_is_unsatisfiable() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    let mut specification = items_of_order();
    let Condition::Path(path) = &mut specification.matches[0].conditions[0] else {
        unreachable!()
    };
    path.roles_left[0].name = "basket".to_string();

    let tree = compiler.result_query_tree(&[order_reference()], &specification).unwrap();
    assert_eq!(tree, None);
}

#[test]
fn an_unsatisfiable_negative_existential_is_dropped() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    let mut specification = items_of_order();
    specification.matches[0].conditions.push(Condition::Existential(
        ExistentialCondition {
            exists: false,
            matches: vec![Match::new(
                Label::new("c", "Order.Returned"),
                vec![Condition::Path(PathCondition {
                    roles_left: vec![Role::new("order", "Order")],
                    label_right: "order".to_string(),
                    roles_right: vec![],
                })],
            )],
        },
    ));

    // NOT EXISTS over a type that was never written is always true, so the
    // query compiles as if the condition were absent.
    let tree = compiler
        .result_query_tree(&[order_reference()], &specification)
        .unwrap()
        .unwrap();
    let query = tree.query.unwrap();
    assert!(!query.sql.contains("NOT EXISTS"));
}

#[test]
fn an_unsatisfiable_positive_existential_drops_the_query() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    let mut specification = items_of_order();
    specification.matches[0].conditions.push(Condition::Existential(
        ExistentialCondition {
            exists: true,
            matches: vec![Match::new(
                Label::new("c", "Order.Returned"),
                vec![Condition::Path(PathCondition {
                    roles_left: vec![Role::new("order", "Order")],
                    label_right: "order".to_string(),
                    roles_right: vec![],
                })],
            )],
        },
    ));

    let tree = compiler.result_query_tree(&[order_reference()], &specification).unwrap();
    assert_eq!(tree, None);
}

#[test]
fn over_constrained_paths_reuse_the_unknown_alias() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    // The item is constrained both by its order and by its product.
    let specification = Specification {
        given: vec![Label::new("order", "Order"), Label::new("product", "Product")],
        matches: vec![Match::new(
            Label::new("i", "Order.Item"),
            vec![
                Condition::Path(PathCondition {
                    roles_left: vec![Role::new("order", "Order")],
                    label_right: "order".to_string(),
                    roles_right: vec![],
                }),
                Condition::Path(PathCondition {
                    roles_left: vec![Role::new("product", "Product")],
                    label_right: "product".to_string(),
                    roles_right: vec![],
                }),
            ],
        )],
        projection: Projection::Composite { components: vec![] },
    };

    let tree = compiler
        .result_query_tree(
            &[order_reference(), FactReference::new("Product", "phash")],
            &specification,
        )
        .unwrap()
        .unwrap();
    let query = tree.query.unwrap();

    // One alias for the item, joined from both sides.
    assert_eq!(query.output_fact_indexes.len(), 1);
    let item_selects = query.sql.matches("JOIN public.fact").count();
    assert_eq!(item_selects, 2, "item and the second given join as facts: {}", query.sql);
}

#[test]
fn mismatched_walks_are_a_type_error() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    let specification = Specification {
        given: vec![Label::new("store", "Store")],
        matches: vec![Match::new(
            Label::new("i", "Order.Item"),
            vec![Condition::Path(PathCondition {
                // i->order ends at Order; the given is a Store.
                roles_left: vec![Role::new("order", "Order")],
                label_right: "store".to_string(),
                roles_right: vec![],
            })],
        )],
        projection: Projection::Composite { components: vec![] },
    };

    let result =
        compiler.result_query_tree(&[FactReference::new("Store", "shash")], &specification);
    assert_matches!(result, Err(CompilerError::PathTypeMismatch { .. }));
}

#[test]
fn bookmarks_round_trip() {
    assert_eq!(encode_bookmark(&[]), "");
    assert_eq!(encode_bookmark(&[42, 7]), "42.7");
    assert_eq!(decode_bookmark("").unwrap(), Vec::<i64>::new());
    assert_eq!(decode_bookmark("42.7").unwrap(), vec![42, 7]);
    assert_matches!(decode_bookmark("not-a-bookmark"), Err(CompilerError::InvalidBookmark(_)));
}
