//! The declaration block of a text request body.
//!
//! A `/read` or `/feeds` body names its given facts before the
//! specification; a `/write` body is declarations only:
//!
//! ```text
//! let store: Store = { "identifier": "storeId" }
//! let order: Order = { "createdAt": "T0", store: store }
//! let known: Order = #k5+q…
//! ```
//!
//! A value of the form `#hash` binds an existing fact by reference. In a
//! fact literal, a JSON value declares a field and an identifier names a
//! previously declared fact as a predecessor of that role; a bracketed
//! list of identifiers declares a multi-valued role.

use std::collections::BTreeMap;

use serde_json::Value;
use tether_model::fact::{FactRecord, FactReference, PredecessorCollection};

use crate::errors::{HttpServerError, HttpServerResult};

#[cfg(test)]
#[path = "declaration_test.rs"]
mod declaration_test;

#[derive(Clone, Debug, PartialEq)]
pub enum Declared {
    /// Bound by hash; the fact is expected to exist.
    Reference(FactReference),
    /// Declared inline; carries the full record.
    Record(FactRecord),
}

impl Declared {
    pub fn reference(&self) -> FactReference {
        match self {
            Declared::Reference(reference) => reference.clone(),
            Declared::Record(record) => record.reference(),
        }
    }
}

/// Parses the leading `let` declarations and returns them along with the
/// remaining source (the specification, possibly empty).
pub fn parse_declarations(source: &str) -> HttpServerResult<(Vec<(String, Declared)>, &str)> {
    let mut declarations: Vec<(String, Declared)> = Vec::new();
    let mut rest = source;
    loop {
        let trimmed = rest.trim_start();
        let Some(after_let) = trimmed.strip_prefix("let") else {
            return Ok((declarations, trimmed));
        };
        if !after_let.starts_with(char::is_whitespace) {
            return Ok((declarations, trimmed));
        }

        let (name, after_name) = identifier(after_let.trim_start())?;
        let after_colon = expect(after_name.trim_start(), ':')?;
        let (fact_type, after_type) = type_name(after_colon.trim_start())?;
        let after_equals = expect(after_type.trim_start(), '=')?;
        let value_source = after_equals.trim_start();

        let (declared, after_value) = if let Some(hash_source) = value_source.strip_prefix('#')
        {
            let end = hash_source
                .find(char::is_whitespace)
                .unwrap_or(hash_source.len());
            let (hash, after) = hash_source.split_at(end);
            if hash.is_empty() {
                return Err(HttpServerError::InvalidInput(
                    "expected a hash after '#'".to_string(),
                ));
            }
            (Declared::Reference(FactReference::new(fact_type, hash)), after)
        } else {
            let (record, after) = fact_literal(&fact_type, value_source, &declarations)?;
            (Declared::Record(record), after)
        };

        if declarations.iter().any(|(existing, _)| existing == &name) {
            return Err(HttpServerError::InvalidInput(format!(
                "'{name}' is declared twice"
            )));
        }
        declarations.push((name, declared));
        rest = after_value;
    }
}

fn fact_literal<'a>(
    fact_type: &str,
    source: &'a str,
    declarations: &[(String, Declared)],
) -> HttpServerResult<(FactRecord, &'a str)> {
    let mut rest = expect(source, '{')?;
    let mut fields = serde_json::Map::new();
    let mut predecessors = BTreeMap::new();
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((FactRecord::new(fact_type, fields, predecessors), after));
        }
        let (key, after_key) = member_name(rest)?;
        rest = expect(after_key.trim_start(), ':')?.trim_start();

        if rest.starts_with('[') {
            let (references, after) = reference_list(rest, declarations)?;
            predecessors.insert(key, PredecessorCollection::Multiple(references));
            rest = after;
        } else if let Some((name, after)) = leading_identifier(rest) {
            let reference = resolve(declarations, name)?;
            predecessors.insert(key, PredecessorCollection::Single(reference));
            rest = after;
        } else {
            let (value, after) = json_value(rest)?;
            fields.insert(key, value);
            rest = after;
        }
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        }
    }
}

fn reference_list<'a>(
    source: &'a str,
    declarations: &[(String, Declared)],
) -> HttpServerResult<(Vec<FactReference>, &'a str)> {
    let mut rest = expect(source, '[')?;
    let mut references = Vec::new();
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix(']') {
            return Ok((references, after));
        }
        let Some((name, after)) = leading_identifier(rest) else {
            return Err(HttpServerError::InvalidInput(
                "expected a declared fact name in the predecessor list".to_string(),
            ));
        };
        references.push(resolve(declarations, name)?);
        rest = after.trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        }
    }
}

fn resolve(
    declarations: &[(String, Declared)],
    name: &str,
) -> HttpServerResult<FactReference> {
    declarations
        .iter()
        .find(|(declared_name, _)| declared_name == name)
        .map(|(_, declared)| declared.reference())
        .ok_or_else(|| {
            HttpServerError::InvalidInput(format!("'{name}' is not declared"))
        })
}

/// An identifier, unless it reads as a JSON keyword.
fn leading_identifier(source: &str) -> Option<(&str, &str)> {
    let end = source
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(source.len());
    if end == 0 {
        return None;
    }
    let (name, rest) = source.split_at(end);
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    if matches!(name, "true" | "false" | "null") {
        return None;
    }
    Some((name, rest))
}

/// Reads one JSON value and reports how much of the source it consumed.
fn json_value(source: &str) -> HttpServerResult<(Value, &str)> {
    let mut stream = serde_json::Deserializer::from_str(source).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Ok((value, &source[stream.byte_offset()..])),
        _ => Err(HttpServerError::InvalidInput(
            "expected a JSON value, an identifier, or a list of identifiers".to_string(),
        )),
    }
}

fn member_name(source: &str) -> HttpServerResult<(String, &str)> {
    if source.starts_with('"') {
        let (value, rest) = json_value(source)?;
        match value {
            Value::String(name) => Ok((name, rest)),
            _ => Err(HttpServerError::InvalidInput("expected a member name".to_string())),
        }
    } else {
        let (name, rest) = identifier(source)?;
        Ok((name, rest))
    }
}

fn identifier(source: &str) -> HttpServerResult<(String, &str)> {
    leading_identifier(source)
        .map(|(name, rest)| (name.to_string(), rest))
        .ok_or_else(|| HttpServerError::InvalidInput("expected an identifier".to_string()))
}

fn type_name(source: &str) -> HttpServerResult<(String, &str)> {
    let (mut name, mut rest) = identifier(source)?;
    while let Some(after_dot) = rest.strip_prefix('.') {
        let (segment, after) = identifier(after_dot)?;
        name.push('.');
        name.push_str(&segment);
        rest = after;
    }
    Ok((name, rest))
}

fn expect(source: &str, expected: char) -> HttpServerResult<&str> {
    source.strip_prefix(expected).ok_or_else(|| {
        HttpServerError::InvalidInput(format!("expected '{expected}'"))
    })
}
