//! The specification AST. A specification names its typed inputs (`given`),
//! constrains unknowns through path and existential conditions (`matches`),
//! and shapes its output (`projection`). Projections are a closed sum type;
//! every consumer matches exhaustively.

use serde::{Deserialize, Serialize};

/// A labeled, typed position in a specification: a given input or an
/// unknown introduced by a match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(rename = "type")]
    pub fact_type: String,
}

impl Label {
    pub fn new(name: impl Into<String>, fact_type: impl Into<String>) -> Self {
        Self { name: name.into(), fact_type: fact_type.into() }
    }
}

/// One step along the predecessor relation: the role name and the type the
/// role points at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(rename = "predecessorType")]
    pub predecessor_type: String,
}

impl Role {
    pub fn new(name: impl Into<String>, predecessor_type: impl Into<String>) -> Self {
        Self { name: name.into(), predecessor_type: predecessor_type.into() }
    }
}

/// Connects the unknown of the enclosing match to a previously bound label.
/// `roles_left` walks up from the unknown; `roles_right` walks up from the
/// bound label; the walks must meet at the same type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCondition {
    #[serde(rename = "rolesLeft")]
    pub roles_left: Vec<Role>,
    #[serde(rename = "labelRight")]
    pub label_right: String,
    #[serde(rename = "rolesRight")]
    pub roles_right: Vec<Role>,
}

/// Requires that some (or no) tuple satisfies the nested matches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistentialCondition {
    pub exists: bool,
    pub matches: Vec<Match>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Condition {
    Path(PathCondition),
    Existential(ExistentialCondition),
}

/// Introduces one unknown and the conditions that bind it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub unknown: Label,
    pub conditions: Vec<Condition>,
}

impl Match {
    pub fn new(unknown: Label, conditions: Vec<Condition>) -> Self {
        Self { unknown, conditions }
    }
}

/// A named component of a composite projection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedProjection {
    pub name: String,
    pub projection: Projection,
}

/// A nested specification projected beneath a parent result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecificationProjection {
    pub matches: Vec<Match>,
    pub projection: Box<Projection>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Projection {
    Composite { components: Vec<NamedProjection> },
    Field { label: String, field: String },
    Hash { label: String },
    Time { label: String },
    Fact { label: String },
    Specification(SpecificationProjection),
}

impl Projection {
    pub fn composite(components: Vec<(&str, Projection)>) -> Self {
        Projection::Composite {
            components: components
                .into_iter()
                .map(|(name, projection)| NamedProjection { name: name.to_string(), projection })
                .collect(),
        }
    }
}

/// A complete declarative query over the fact graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specification {
    pub given: Vec<Label>,
    pub matches: Vec<Match>,
    pub projection: Projection,
}

impl Specification {
    /// The labels a consumer may reference: the givens followed by every
    /// unknown of the top-level matches.
    pub fn visible_labels(&self) -> Vec<&Label> {
        self.given
            .iter()
            .chain(self.matches.iter().map(|m| &m.unknown))
            .collect()
    }
}
