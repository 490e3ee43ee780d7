//! Lowers a specification AST onto the query-description IR.
//!
//! A path condition is compiled by walking up from the bound label on the
//! right (predecessor joins), walking up from the unknown on the left, and
//! stitching the two walks where they meet. Existential conditions open a
//! nested branch of the IR; given facts first referenced inside a branch
//! have their predicates recorded on that branch.

use std::collections::HashMap;

use tether_model::fact::FactReference;
use tether_model::specification::{
    Condition,
    Label,
    Match,
    PathCondition,
    Projection,
    Specification,
};

use crate::errors::{CompilerError, CompilerResult};
use crate::feeds::FeedDefinition;
use crate::query_description::QueryDescription;
use crate::sql::{feed_sql, purge_sql, result_sql, SpecificationSqlQuery, SqlQueryTree};

#[cfg(test)]
#[path = "compiler_test.rs"]
pub mod compiler_test;

/// Resolves fact type and role names to their interned ids. Backed by the
/// store's process-wide maps; a miss means the name has never been written,
/// which makes the query unsatisfiable rather than erroneous.
pub trait SchemaIndex {
    fn fact_type_id(&self, name: &str) -> Option<i32>;
    fn role_id(&self, defining_fact_type_id: i32, name: &str) -> Option<i32>;
}

/// A given label and the reference bound to it. Purge roots are unbound:
/// they constrain the type but not the hash.
#[derive(Clone, Debug)]
pub struct GivenFact {
    pub fact_type: String,
    pub hash: Option<String>,
}

#[derive(Clone, Debug)]
pub struct KnownFact {
    pub fact_type: String,
    pub fact_index: usize,
}

/// Outcome of lowering a list of matches.
pub enum Build {
    Satisfiable { query: QueryDescription, known: HashMap<String, KnownFact> },
    Unsatisfiable,
}

/// Checks that the number and types of the given references match the
/// specification's inputs.
pub fn validate_given(given: &[Label], start: &[FactReference]) -> CompilerResult<()> {
    if given.len() != start.len() {
        return Err(CompilerError::GivenCountMismatch {
            expected: given.len(),
            actual: start.len(),
        });
    }
    for (label, reference) in given.iter().zip(start) {
        if label.fact_type != reference.fact_type {
            return Err(CompilerError::GivenTypeMismatch {
                label: label.name.clone(),
                expected: label.fact_type.clone(),
                actual: reference.fact_type.clone(),
            });
        }
    }
    Ok(())
}

fn bound_givens(given: &[Label], start: &[FactReference]) -> HashMap<String, GivenFact> {
    given
        .iter()
        .zip(start)
        .map(|(label, reference)| {
            (
                label.name.clone(),
                GivenFact {
                    fact_type: label.fact_type.clone(),
                    hash: Some(reference.hash.clone()),
                },
            )
        })
        .collect()
}

fn unbound_givens(given: &[Label]) -> HashMap<String, GivenFact> {
    given
        .iter()
        .map(|label| {
            (label.name.clone(), GivenFact { fact_type: label.fact_type.clone(), hash: None })
        })
        .collect()
}

pub struct SpecificationCompiler<'a, S: SchemaIndex> {
    schema: &'a S,
    schema_name: &'a str,
}

impl<'a, S: SchemaIndex> SpecificationCompiler<'a, S> {
    pub fn new(schema: &'a S, schema_name: &'a str) -> Self {
        Self { schema, schema_name }
    }

    /// Compiles a specification into the tree of result queries: one query
    /// per composite projection level. `None` when unsatisfiable.
    pub fn result_query_tree(
        &self,
        start: &[FactReference],
        specification: &Specification,
    ) -> CompilerResult<Option<SqlQueryTree>> {
        validate_given(&specification.given, start)?;
        if specification.matches.is_empty() {
            return Ok(None);
        }
        let givens = bound_givens(&specification.given, start);
        match self.add_edges(
            &givens,
            QueryDescription::default(),
            HashMap::new(),
            &[],
            &specification.matches,
        )? {
            Build::Unsatisfiable => Ok(None),
            Build::Satisfiable { query, known } => {
                if !query.is_satisfiable() {
                    return Ok(None);
                }
                let tree =
                    self.build_tree(&givens, &query, &known, 0, &specification.projection)?;
                Ok(Some(tree))
            }
        }
    }

    fn build_tree(
        &self,
        givens: &HashMap<String, GivenFact>,
        query: &QueryDescription,
        known: &HashMap<String, KnownFact>,
        parent_output_count: usize,
        projection: &Projection,
    ) -> CompilerResult<SqlQueryTree> {
        let mut children = Vec::new();
        // A child specification at the root of a projection is registered
        // under the empty name.
        let components_of = |projection: &Projection| -> Vec<(String, Projection)> {
            match projection {
                Projection::Composite { components } => components
                    .iter()
                    .map(|component| (component.name.clone(), component.projection.clone()))
                    .collect(),
                Projection::Specification(_) => {
                    vec![(String::new(), projection.clone())]
                }
                _ => Vec::new(),
            }
        };
        for (component_name, component_projection) in components_of(projection) {
            if let Projection::Specification(child) = &component_projection {
                let child_tree = match self.add_edges(
                    givens,
                    query.clone(),
                    known.clone(),
                    &[],
                    &child.matches,
                )? {
                    Build::Unsatisfiable => SqlQueryTree {
                        query: None,
                        parent_output_count: query.outputs.len(),
                        projection: (*child.projection).clone(),
                        children: Vec::new(),
                    },
                    Build::Satisfiable { query: child_query, known: child_known } => self
                        .build_tree(
                            givens,
                            &child_query,
                            &child_known,
                            query.outputs.len(),
                            &child.projection,
                        )?,
                };
                children.push((component_name, child_tree));
            }
        }
        Ok(SqlQueryTree {
            query: Some(result_sql(query, self.schema_name)),
            parent_output_count,
            projection: projection.clone(),
            children,
        })
    }

    /// Compiles one feed fragment into a paginated SQL query. `None` when
    /// unsatisfiable.
    pub fn feed_query(
        &self,
        start: &[FactReference],
        feed: &FeedDefinition,
        bookmark: &[i64],
        limit: i64,
    ) -> CompilerResult<Option<SpecificationSqlQuery>> {
        validate_given(&feed.given, start)?;
        if feed.matches.is_empty() {
            return Ok(None);
        }
        let givens = bound_givens(&feed.given, start);
        match self.add_edges(
            &givens,
            QueryDescription::default(),
            HashMap::new(),
            &[],
            &feed.matches,
        )? {
            Build::Unsatisfiable => Ok(None),
            Build::Satisfiable { query, .. } => {
                if !query.is_satisfiable() {
                    return Ok(None);
                }
                Ok(Some(feed_sql(&query, self.schema_name, bookmark, limit)))
            }
        }
    }

    /// Compiles a purge condition into a single DELETE statement. The given
    /// of a purge specification is unbound: candidates cover every fact of
    /// the purge root type.
    pub fn purge_query(
        &self,
        specification: &Specification,
    ) -> CompilerResult<Option<SpecificationSqlQuery>> {
        if specification.matches.is_empty() {
            return Ok(None);
        }
        let givens = unbound_givens(&specification.given);
        match self.add_edges(
            &givens,
            QueryDescription::default(),
            HashMap::new(),
            &[],
            &specification.matches,
        )? {
            Build::Unsatisfiable => Ok(None),
            Build::Satisfiable { query, .. } => {
                if !query.is_satisfiable() {
                    return Ok(None);
                }
                Ok(Some(purge_sql(&query, self.schema_name)))
            }
        }
    }

    /// Lowers matches onto the IR, threading the immutable description
    /// through each builder step.
    pub(crate) fn add_edges(
        &self,
        givens: &HashMap<String, GivenFact>,
        query: QueryDescription,
        known: HashMap<String, KnownFact>,
        path: &[usize],
        matches: &[Match],
    ) -> CompilerResult<Build> {
        let mut query = query;
        let mut known = known;
        for m in matches {
            for condition in &m.conditions {
                match condition {
                    Condition::Path(path_condition) => {
                        match self.add_path_condition(
                            givens,
                            query,
                            &mut known,
                            path,
                            &m.unknown,
                            path_condition,
                        )? {
                            Some(next) => query = next,
                            None => return Ok(Build::Unsatisfiable),
                        }
                    }
                    Condition::Existential(existential) => {
                        let (with_branch, branch_path) =
                            query.with_existential_condition(existential.exists, path);
                        // Labels bound inside the branch stay in the branch.
                        match self.add_edges(
                            givens,
                            with_branch,
                            known.clone(),
                            &branch_path,
                            &existential.matches,
                        )? {
                            Build::Satisfiable { query: next, .. } => query = next,
                            Build::Unsatisfiable => {
                                if existential.exists {
                                    // A positive existential over an impossible
                                    // predicate can never match.
                                    return Ok(Build::Unsatisfiable);
                                }
                                // NOT EXISTS over an impossible predicate is
                                // always true: drop the branch.
                            }
                        }
                    }
                }
            }
            if path.is_empty() {
                let bound = known
                    .get(&m.unknown.name)
                    .ok_or_else(|| CompilerError::UnboundUnknown(m.unknown.name.clone()))?;
                query = query.with_output(&m.unknown.name, &m.unknown.fact_type, bound.fact_index);
            } else if !known.contains_key(&m.unknown.name) {
                return Err(CompilerError::UnboundUnknown(m.unknown.name.clone()));
            }
        }
        Ok(Build::Satisfiable { query, known })
    }

    /// Compiles one path condition. Returns `None` when a referenced type
    /// or role has no interned id.
    fn add_path_condition(
        &self,
        givens: &HashMap<String, GivenFact>,
        query: QueryDescription,
        known: &mut HashMap<String, KnownFact>,
        path: &[usize],
        unknown: &Label,
        condition: &PathCondition,
    ) -> CompilerResult<Option<QueryDescription>> {
        let mut query = query;

        // Bind the right-hand label on first use. Only givens can appear
        // unbound here; unknowns are bound by their own match first.
        if !known.contains_key(&condition.label_right) {
            let given = givens
                .get(&condition.label_right)
                .ok_or_else(|| CompilerError::UnknownLabel(condition.label_right.clone()))?;
            let Some(fact_type_id) = self.schema.fact_type_id(&given.fact_type) else {
                return Ok(None);
            };
            let (next, fact_index) = query.with_input(
                &condition.label_right,
                &given.fact_type,
                fact_type_id,
                given.hash.as_deref(),
                path,
            );
            query = next;
            known.insert(
                condition.label_right.clone(),
                KnownFact { fact_type: given.fact_type.clone(), fact_index },
            );
        }

        // Walk up from the right label: predecessor joins.
        let right = known[&condition.label_right].clone();
        let mut fact_type = right.fact_type;
        let mut fact_index = right.fact_index;
        for role in &condition.roles_right {
            let Some(role_id) = self.role_id(&fact_type, &role.name) else {
                return Ok(None);
            };
            let (next, predecessor_index) = query.with_fact(&role.predecessor_type);
            let (next, _) = next.with_edge(predecessor_index, fact_index, role_id, path);
            query = next;
            fact_type = role.predecessor_type.clone();
            fact_index = predecessor_index;
        }

        // Walk up from the unknown, collecting the roles to reverse.
        let mut left_steps = Vec::new();
        let mut left_type = unknown.fact_type.clone();
        for role in &condition.roles_left {
            let Some(role_id) = self.role_id(&left_type, &role.name) else {
                return Ok(None);
            };
            left_steps.push((role_id, left_type.clone()));
            left_type = role.predecessor_type.clone();
        }
        if left_type != fact_type {
            return Err(CompilerError::PathTypeMismatch {
                unknown: unknown.name.clone(),
                left_type,
                right_type: fact_type,
            });
        }

        // Stitch: replay the left walk downward as successor joins. The
        // final step lands on the unknown; if an earlier condition already
        // bound it, reuse its alias so the paths become AND-ed predicates
        // instead of a Cartesian product.
        for (position, (role_id, successor_type)) in left_steps.iter().enumerate().rev() {
            let last = position == 0;
            let successor_index = match known.get(&unknown.name) {
                Some(existing) if last => existing.fact_index,
                _ => {
                    let (next, index) = query.with_fact(successor_type);
                    query = next;
                    index
                }
            };
            let (next, _) = query.with_edge(fact_index, successor_index, *role_id, path);
            query = next;
            fact_index = successor_index;
        }

        known
            .entry(unknown.name.clone())
            .or_insert_with(|| KnownFact { fact_type: unknown.fact_type.clone(), fact_index });
        Ok(Some(query))
    }

    fn role_id(&self, defining_type: &str, role_name: &str) -> Option<i32> {
        let type_id = self.schema.fact_type_id(defining_type)?;
        self.schema.role_id(type_id, role_name)
    }
}

/// Fact type names and `(defining type, role)` pairs referenced by a
/// specification. Stores use this to load missing interned ids before
/// compiling.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReferencedNames {
    pub fact_types: std::collections::BTreeSet<String>,
    pub roles: std::collections::BTreeSet<(String, String)>,
}

pub fn referenced_names(given: &[Label], matches: &[Match]) -> ReferencedNames {
    let mut names = ReferencedNames::default();
    let mut label_types: HashMap<String, String> = HashMap::new();
    for label in given {
        names.fact_types.insert(label.fact_type.clone());
        label_types.insert(label.name.clone(), label.fact_type.clone());
    }
    collect_from_matches(matches, &mut label_types, &mut names);
    names
}

/// Like [`referenced_names`], but also walks the child specifications of
/// the projection tree.
pub fn referenced_names_of_specification(specification: &Specification) -> ReferencedNames {
    let mut names = referenced_names(&specification.given, &specification.matches);
    let mut label_types: HashMap<String, String> = specification
        .given
        .iter()
        .chain(specification.matches.iter().map(|m| &m.unknown))
        .map(|label| (label.name.clone(), label.fact_type.clone()))
        .collect();
    collect_from_projection(&specification.projection, &mut label_types, &mut names);
    names
}

fn collect_from_projection(
    projection: &Projection,
    label_types: &mut HashMap<String, String>,
    names: &mut ReferencedNames,
) {
    match projection {
        Projection::Composite { components } => {
            for component in components {
                collect_from_projection(&component.projection, label_types, names);
            }
        }
        Projection::Specification(child) => {
            let mut child_labels = label_types.clone();
            collect_from_matches(&child.matches, &mut child_labels, names);
            collect_from_projection(&child.projection, &mut child_labels, names);
        }
        _ => {}
    }
}

fn collect_from_matches(
    matches: &[Match],
    label_types: &mut HashMap<String, String>,
    names: &mut ReferencedNames,
) {
    for m in matches {
        names.fact_types.insert(m.unknown.fact_type.clone());
        label_types.insert(m.unknown.name.clone(), m.unknown.fact_type.clone());
        for condition in &m.conditions {
            match condition {
                Condition::Path(path) => {
                    let mut defining = m.unknown.fact_type.clone();
                    for role in &path.roles_left {
                        names.fact_types.insert(role.predecessor_type.clone());
                        names.roles.insert((defining.clone(), role.name.clone()));
                        defining = role.predecessor_type.clone();
                    }
                    if let Some(right_type) = label_types.get(&path.label_right).cloned() {
                        let mut defining = right_type;
                        for role in &path.roles_right {
                            names.fact_types.insert(role.predecessor_type.clone());
                            names.roles.insert((defining.clone(), role.name.clone()));
                            defining = role.predecessor_type.clone();
                        }
                    }
                }
                Condition::Existential(existential) => {
                    collect_from_matches(&existential.matches, label_types, names);
                }
            }
        }
    }
}

/// Encodes a feed bookmark: the fact-id tuple of the last delivered row,
/// dot-separated. The empty string is the beginning of the feed.
pub fn encode_bookmark(fact_ids: &[i64]) -> String {
    fact_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(".")
}

/// Decodes a client-supplied bookmark, rejecting anything that is not a
/// tuple of integers.
pub fn decode_bookmark(bookmark: &str) -> CompilerResult<Vec<i64>> {
    if bookmark.is_empty() {
        return Ok(Vec::new());
    }
    bookmark
        .split('.')
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| CompilerError::InvalidBookmark(bookmark.to_string()))
        })
        .collect()
}
