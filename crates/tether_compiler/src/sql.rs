//! Renders a query description as PostgreSQL text.
//!
//! Three variants share the same join generator: result queries select
//! `hash`, `fact_id`, `data`, and the ingestion timestamp for every labeled
//! fact; feed queries select only hashes plus a descending-sorted fact-id
//! array used as the bookmark; purge queries select bare fact ids as the
//! candidate set of a cascading delete.

use tether_model::specification::Projection;

use crate::query_description::{
    EdgeDescription,
    ExistentialConditionDescription,
    QueryDescription,
    SqlParameter,
};

#[cfg(test)]
#[path = "sql_test.rs"]
mod sql_test;

/// A fact labeled in the SELECT list: columns `hash{i}`, `id{i}`,
/// `data{i}`, `time{i}` where `i` is the fact index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecificationLabel {
    pub name: String,
    pub fact_type: String,
    pub fact_index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpecificationSqlQuery {
    pub sql: String,
    pub parameters: Vec<SqlParameter>,
    pub labels: Vec<SpecificationLabel>,
    /// Fact indexes of the outputs, in order. Their ids form the row
    /// identifier used for composition and bookmarks.
    pub output_fact_indexes: Vec<usize>,
}

/// One composite projection level and its child levels. A `None` query is
/// an unsatisfiable branch: it contributes no rows.
#[derive(Clone, Debug, PartialEq)]
pub struct SqlQueryTree {
    pub query: Option<SpecificationSqlQuery>,
    /// How many leading outputs are shared with the parent query; the
    /// composer groups child rows under the parent row with the matching
    /// id prefix.
    pub parent_output_count: usize,
    pub projection: Projection,
    pub children: Vec<(String, SqlQueryTree)>,
}

fn labels_of(description: &QueryDescription) -> Vec<SpecificationLabel> {
    description
        .inputs
        .iter()
        .map(|input| SpecificationLabel {
            name: input.label.clone(),
            fact_type: input.fact_type.clone(),
            fact_index: input.fact_index,
        })
        .chain(description.outputs.iter().map(|output| SpecificationLabel {
            name: output.label.clone(),
            fact_type: output.fact_type.clone(),
            fact_index: output.fact_index,
        }))
        .collect()
}

pub(crate) fn result_sql(description: &QueryDescription, schema: &str) -> SpecificationSqlQuery {
    let labels = labels_of(description);
    let columns = labels
        .iter()
        .map(|label| {
            let i = label.fact_index;
            format!(
                "f{i}.hash as hash{i}, f{i}.fact_id as id{i}, f{i}.data as data{i}, \
                 f{i}.date_learned as time{i}"
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let order_by = description
        .outputs
        .iter()
        .map(|output| format!("f{}.fact_id ASC", output.fact_index))
        .collect::<Vec<_>>()
        .join(", ");
    let core = core_sql(description, schema);
    SpecificationSqlQuery {
        sql: format!("SELECT {columns} FROM {core} ORDER BY {order_by}"),
        parameters: description.parameters.clone(),
        labels,
        output_fact_indexes: description.outputs.iter().map(|o| o.fact_index).collect(),
    }
}

pub(crate) fn feed_sql(
    description: &QueryDescription,
    schema: &str,
    bookmark: &[i64],
    limit: i64,
) -> SpecificationSqlQuery {
    let hashes = description
        .outputs
        .iter()
        .map(|output| format!("f{0}.hash as hash{0}", output.fact_index))
        .collect::<Vec<_>>()
        .join(", ");
    let fact_ids = description
        .outputs
        .iter()
        .map(|output| format!("f{}.fact_id", output.fact_index))
        .collect::<Vec<_>>()
        .join(", ");
    let mut parameters = description.parameters.clone();
    parameters.push(SqlParameter::BigIntArray(bookmark.to_vec()));
    let bookmark_parameter = parameters.len();
    parameters.push(SqlParameter::BigInt(limit));
    let limit_parameter = parameters.len();
    let core = core_sql(description, schema);
    let sql = format!(
        "SELECT {hashes}, sort(array[{fact_ids}], 'desc') as bookmark FROM {core} \
         AND sort(array[{fact_ids}], 'desc') > ${bookmark_parameter} \
         ORDER BY bookmark ASC LIMIT ${limit_parameter}"
    );
    SpecificationSqlQuery {
        sql,
        parameters,
        labels: labels_of(description),
        output_fact_indexes: description.outputs.iter().map(|o| o.fact_index).collect(),
    }
}

/// Candidates are `(purge_root, trigger…)` tuples from the compiled purge
/// specification. Targets are the descendants of a root that are neither a
/// trigger nor an ancestor of one; the delete cascades over edges,
/// ancestors, and signatures by foreign key.
pub(crate) fn purge_sql(description: &QueryDescription, schema: &str) -> SpecificationSqlQuery {
    // The purge root is the unbound given; the triggers are the unknowns.
    let root_fact_index =
        description.inputs.first().map(|input| input.fact_index).unwrap_or(1);
    let triggers = &description.outputs[..];
    let mut candidate_columns = vec![format!("f{root_fact_index}.fact_id as purge_root")];
    for (position, trigger) in triggers.iter().enumerate() {
        candidate_columns
            .push(format!("f{}.fact_id as trigger{}", trigger.fact_index, position + 1));
    }
    let trigger_list = |alias: &str| {
        (1..=triggers.len())
            .map(|position| format!("{alias}.trigger{position}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let core = core_sql(description, schema);
    // A candidate survives when it is an ancestor of one of its own root's
    // triggers, or is such a trigger itself; both checks correlate on the
    // candidate's purge root so one root's lineage never shields another's
    // descendants.
    let sql = format!(
        "WITH candidates AS (SELECT {columns} FROM {core}), targets AS (\
         SELECT a.fact_id FROM {schema}.ancestor a \
         JOIN candidates c ON a.ancestor_fact_id = c.purge_root \
         WHERE NOT EXISTS (\
         SELECT 1 FROM {schema}.ancestor a2 JOIN candidates c2 \
         ON a2.fact_id IN ({trigger_lineage}) \
         WHERE a2.ancestor_fact_id = a.fact_id \
         AND c2.purge_root = c.purge_root) \
         AND NOT EXISTS (\
         SELECT 1 FROM candidates c3 WHERE a.fact_id IN ({trigger_ids}) \
         AND c3.purge_root = c.purge_root)) \
         DELETE FROM {schema}.fact f USING targets t WHERE f.fact_id = t.fact_id",
        columns = candidate_columns.join(", "),
        trigger_lineage = trigger_list("c2"),
        trigger_ids = trigger_list("c3"),
    );
    SpecificationSqlQuery {
        sql,
        parameters: description.parameters.clone(),
        labels: labels_of(description),
        output_fact_indexes: description.outputs.iter().map(|o| o.fact_index).collect(),
    }
}

/// The shared `FROM … WHERE …` core: first input fact, generated joins,
/// input predicates, existential subqueries. Callers append ordering or
/// pagination. The text always ends inside the WHERE clause so feed
/// variants can AND further predicates.
fn core_sql(description: &QueryDescription, schema: &str) -> String {
    let first_fact_index =
        description.inputs.first().map(|input| input.fact_index).unwrap_or(1);
    let mut written = vec![first_fact_index];
    let joins = generate_joins(&description.edges, &mut written, schema);
    let input_clauses = description
        .inputs
        .iter()
        .map(|input| {
            let mut clause = format!(
                "f{}.fact_type_id = ${}",
                input.fact_index, input.fact_type_parameter
            );
            if let Some(hash_parameter) = input.fact_hash_parameter {
                clause.push_str(&format!(
                    " AND f{}.hash = ${}",
                    input.fact_index, hash_parameter
                ));
            }
            clause
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    let existential_clauses = description
        .existential_conditions
        .iter()
        .map(|condition| {
            format!(
                " AND {} ({})",
                if condition.exists { "EXISTS" } else { "NOT EXISTS" },
                existential_sql(condition, &written, schema)
            )
        })
        .collect::<Vec<_>>()
        .join("");
    format!(
        "{schema}.fact f{first_fact_index}{joins} WHERE {input_clauses}{existential_clauses}",
        joins = joins.join(""),
    )
}

/// Emits edge/fact joins, walking each edge from whichever endpoint is
/// already written to the one it introduces.
fn generate_joins(edges: &[EdgeDescription], written: &mut Vec<usize>, schema: &str) -> Vec<String> {
    let mut joins = Vec::new();
    for edge in edges {
        let predecessor_written = written.contains(&edge.predecessor_fact_index);
        let successor_written = written.contains(&edge.successor_fact_index);
        let e = edge.edge_index;
        if successor_written {
            if predecessor_written {
                joins.push(format!(
                    " JOIN {schema}.edge e{e} ON e{e}.predecessor_fact_id = f{p}.fact_id \
                     AND e{e}.successor_fact_id = f{s}.fact_id AND e{e}.role_id = ${r}",
                    p = edge.predecessor_fact_index,
                    s = edge.successor_fact_index,
                    r = edge.role_parameter,
                ));
            } else {
                joins.push(format!(
                    " JOIN {schema}.edge e{e} ON e{e}.successor_fact_id = f{s}.fact_id \
                     AND e{e}.role_id = ${r}",
                    s = edge.successor_fact_index,
                    r = edge.role_parameter,
                ));
                joins.push(format!(
                    " JOIN {schema}.fact f{p} ON f{p}.fact_id = e{e}.predecessor_fact_id",
                    p = edge.predecessor_fact_index,
                ));
                written.push(edge.predecessor_fact_index);
            }
        } else if predecessor_written {
            joins.push(format!(
                " JOIN {schema}.edge e{e} ON e{e}.predecessor_fact_id = f{p}.fact_id \
                 AND e{e}.role_id = ${r}",
                p = edge.predecessor_fact_index,
                r = edge.role_parameter,
            ));
            joins.push(format!(
                " JOIN {schema}.fact f{s} ON f{s}.fact_id = e{e}.successor_fact_id",
                s = edge.successor_fact_index,
            ));
            written.push(edge.successor_fact_index);
        } else {
            // The compiler emits edges in walk order, so one endpoint of
            // every edge is always written before the edge itself.
            unreachable!("edge e{e} references two unwritten facts");
        }
    }
    joins
}

/// An EXISTS/NOT EXISTS subquery. The first edge correlates against an
/// outer alias in the WHERE clause; the rest join as usual. Inputs first
/// referenced inside the branch contribute their predicates here.
fn existential_sql(
    condition: &ExistentialConditionDescription,
    outer_written: &[usize],
    schema: &str,
) -> String {
    let first_edge = &condition.edges[0];
    let mut written = outer_written.to_vec();
    let e = first_edge.edge_index;
    let mut first_join = Vec::new();
    let where_clause;
    if written.contains(&first_edge.predecessor_fact_index) {
        where_clause = format!(
            "e{e}.predecessor_fact_id = f{p}.fact_id AND e{e}.role_id = ${r}",
            p = first_edge.predecessor_fact_index,
            r = first_edge.role_parameter,
        );
        first_join.push(format!(
            " JOIN {schema}.fact f{s} ON f{s}.fact_id = e{e}.successor_fact_id",
            s = first_edge.successor_fact_index,
        ));
        written.push(first_edge.successor_fact_index);
    } else {
        where_clause = format!(
            "e{e}.successor_fact_id = f{s}.fact_id AND e{e}.role_id = ${r}",
            s = first_edge.successor_fact_index,
            r = first_edge.role_parameter,
        );
        first_join.push(format!(
            " JOIN {schema}.fact f{p} ON f{p}.fact_id = e{e}.predecessor_fact_id",
            p = first_edge.predecessor_fact_index,
        ));
        written.push(first_edge.predecessor_fact_index);
    }
    let tail_joins = generate_joins(&condition.edges[1..], &mut written, schema);
    let joins: Vec<String> = first_join.into_iter().chain(tail_joins).collect();
    let input_clauses = condition
        .inputs
        .iter()
        .map(|input| {
            let mut clause = format!(
                " AND f{}.fact_type_id = ${}",
                input.fact_index, input.fact_type_parameter
            );
            if let Some(hash_parameter) = input.fact_hash_parameter {
                clause.push_str(&format!(
                    " AND f{}.hash = ${}",
                    input.fact_index, hash_parameter
                ));
            }
            clause
        })
        .collect::<Vec<_>>()
        .join("");
    let nested = condition
        .existential_conditions
        .iter()
        .map(|nested_condition| {
            format!(
                " AND {} ({})",
                if nested_condition.exists { "EXISTS" } else { "NOT EXISTS" },
                existential_sql(nested_condition, &written, schema)
            )
        })
        .collect::<Vec<_>>()
        .join("");
    format!(
        "SELECT 1 FROM {schema}.edge e{e}{joins} WHERE {where_clause}{input_clauses}{nested}",
        joins = joins.join(""),
    )
}
