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

use crate::compiler::compiler_test::{items_of_order, TestSchema};
use crate::compiler::SpecificationCompiler;
use crate::feeds::build_feeds;
use crate::query_description::SqlParameter;

fn order_reference() -> FactReference {
    FactReference::new("Order", "ohash")
}

#[test]
fn result_sql_selects_every_labeled_fact_and_orders_by_output() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    let tree = compiler
        .result_query_tree(&[order_reference()], &items_of_order())
        .unwrap()
        .unwrap();
    let query = tree.query.unwrap();

    assert_eq!(
        query.sql,
        "SELECT f1.hash as hash1, f1.fact_id as id1, f1.data as data1, \
         f1.date_learned as time1, f2.hash as hash2, f2.fact_id as id2, \
         f2.data as data2, f2.date_learned as time2 \
         FROM public.fact f1 \
         JOIN public.edge e1 ON e1.predecessor_fact_id = f1.fact_id AND e1.role_id = $3 \
         JOIN public.fact f2 ON f2.fact_id = e1.successor_fact_id \
         WHERE f1.fact_type_id = $1 AND f1.hash = $2 \
         ORDER BY f2.fact_id ASC"
    );
    assert_eq!(
        query.parameters,
        vec![
            SqlParameter::Int(2),
            SqlParameter::String("ohash".to_string()),
            SqlParameter::Int(2),
        ]
    );
}

fn items_of_order_unless_cancelled() -> Specification {
    let mut specification = items_of_order();
    specification.matches[0].conditions.push(Condition::Existential(
        ExistentialCondition {
            exists: false,
            matches: vec![Match::new(
                Label::new("c", "Order.Cancelled"),
                vec![Condition::Path(PathCondition {
                    roles_left: vec![Role::new("order", "Order")],
                    label_right: "order".to_string(),
                    roles_right: vec![],
                })],
            )],
        },
    ));
    specification
}

#[test]
fn a_negative_existential_becomes_not_exists() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    let tree = compiler
        .result_query_tree(&[order_reference()], &items_of_order_unless_cancelled())
        .unwrap()
        .unwrap();
    let query = tree.query.unwrap();

    assert!(query.sql.contains(
        "AND NOT EXISTS (SELECT 1 FROM public.edge e2 \
         JOIN public.fact f3 ON f3.fact_id = e2.successor_fact_id \
         WHERE e2.predecessor_fact_id = f1.fact_id AND e2.role_id = $4)"
    ), "{}", query.sql);
}

#[test]
fn feed_sql_pages_by_a_descending_sorted_id_tuple() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    let feeds = build_feeds(&items_of_order());
    assert_eq!(feeds.len(), 1);
    let query = compiler
        .feed_query(&[order_reference()], &feeds[0], &[17], 100)
        .unwrap()
        .unwrap();

    assert_eq!(
        query.sql,
        "SELECT f2.hash as hash2, sort(array[f2.fact_id], 'desc') as bookmark \
         FROM public.fact f1 \
         JOIN public.edge e1 ON e1.predecessor_fact_id = f1.fact_id AND e1.role_id = $3 \
         JOIN public.fact f2 ON f2.fact_id = e1.successor_fact_id \
         WHERE f1.fact_type_id = $1 AND f1.hash = $2 \
         AND sort(array[f2.fact_id], 'desc') > $4 \
         ORDER BY bookmark ASC LIMIT $5"
    );
    assert_eq!(query.parameters[3], SqlParameter::BigIntArray(vec![17]));
    assert_eq!(query.parameters[4], SqlParameter::BigInt(100));
}

fn purge_when_cancelled() -> Specification {
    // Purge orders once a cancellation exists.
    Specification {
        given: vec![Label::new("order", "Order")],
        matches: vec![Match::new(
            Label::new("c", "Order.Cancelled"),
            vec![Condition::Path(PathCondition {
                roles_left: vec![Role::new("order", "Order")],
                label_right: "order".to_string(),
                roles_right: vec![],
            })],
        )],
        projection: Projection::Composite { components: vec![] },
    }
}

#[test]
fn purge_sql_deletes_descendants_outside_trigger_lineage() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    let query = compiler.purge_query(&purge_when_cancelled()).unwrap().unwrap();

    assert_eq!(
        query.sql,
        "WITH candidates AS (SELECT f1.fact_id as purge_root, f2.fact_id as trigger1 \
         FROM public.fact f1 \
         JOIN public.edge e1 ON e1.predecessor_fact_id = f1.fact_id AND e1.role_id = $2 \
         JOIN public.fact f2 ON f2.fact_id = e1.successor_fact_id \
         WHERE f1.fact_type_id = $1), \
         targets AS (SELECT a.fact_id FROM public.ancestor a \
         JOIN candidates c ON a.ancestor_fact_id = c.purge_root \
         WHERE NOT EXISTS (SELECT 1 FROM public.ancestor a2 \
         JOIN candidates c2 ON a2.fact_id IN (c2.trigger1) \
         WHERE a2.ancestor_fact_id = a.fact_id AND c2.purge_root = c.purge_root) \
         AND NOT EXISTS (SELECT 1 FROM candidates c3 WHERE a.fact_id IN (c3.trigger1) \
         AND c3.purge_root = c.purge_root)) \
         DELETE FROM public.fact f USING targets t WHERE f.fact_id = t.fact_id"
    );
    // The purge root is unbound: type parameter only.
    assert_eq!(query.parameters[0], SqlParameter::Int(2));
}

#[test]
fn purge_sql_preserves_ancestors_of_the_candidates_own_triggers() {
    let schema = TestSchema::order_domain();
    let compiler = SpecificationCompiler::new(&schema, "public");

    let query = compiler.purge_query(&purge_when_cancelled()).unwrap().unwrap();

    // The trigger sits on the fact side of the lineage lookup and the
    // candidate on the ancestor side; walking the other way would delete
    // the trigger's own ancestry, the order and cancellation included.
    assert!(
        query.sql.contains(
            "NOT EXISTS (SELECT 1 FROM public.ancestor a2 \
             JOIN candidates c2 ON a2.fact_id IN (c2.trigger1) \
             WHERE a2.ancestor_fact_id = a.fact_id"
        ),
        "{}",
        query.sql
    );
    // Both exclusions are scoped to the candidate's own purge root.
    assert!(query.sql.contains("AND c2.purge_root = c.purge_root"), "{}", query.sql);
    assert!(query.sql.contains("AND c3.purge_root = c.purge_root"), "{}", query.sql);
}
