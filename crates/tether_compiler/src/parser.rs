//! Text form of the specification language.
//!
//! ```text
//! (order: Store.Order) {
//!     item: Store.Order.Item [
//!         item->order: Store.Order = order
//!         !E {
//!             cancelled: Store.Order.Cancelled [
//!                 cancelled->order: Store.Order = order
//!             ]
//!         }
//!     ]
//! } => {
//!     hash = #item,
//!     placedAt = @item,
//!     product = item.product
//! }
//! ```
//!
//! Givens in parentheses, one match per unknown, path conditions written as
//! `label->role: Type ... = label ...`, existentials as `E { }` / `!E { }`,
//! and an optional projection after `=>`. A projection component is `#l`
//! (hash), `@l` (time), `l.field`, a bare label (fact), or a nested
//! `{ matches } => projection` child specification.

use tether_model::specification::{
    Condition,
    ExistentialCondition,
    Label,
    Match,
    NamedProjection,
    PathCondition,
    Projection,
    Role,
    Specification,
    SpecificationProjection,
};

use crate::errors::{CompilerError, CompilerResult};

#[cfg(test)]
#[path = "parser_test.rs"]
mod parser_test;

pub fn parse_specification(source: &str) -> CompilerResult<Specification> {
    let mut parser = Parser::new(source);
    let specification = parser.specification()?;
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(specification)
}

struct Parser<'a> {
    source: &'a [u8],
    position: usize,
    line: usize,
    column: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self { source: source.as_bytes(), position: 0, line: 1, column: 1 }
    }

    fn specification(&mut self) -> CompilerResult<Specification> {
        self.expect('(')?;
        let mut given = vec![self.label()?];
        while self.consume(',') {
            given.push(self.label()?);
        }
        self.expect(')')?;
        let matches = if self.peek() == Some('{') { self.match_block()? } else { Vec::new() };
        let projection = if self.consume_str("=>") {
            self.projection()?
        } else {
            Projection::Composite { components: Vec::new() }
        };
        Ok(Specification { given, matches, projection })
    }

    fn match_block(&mut self) -> CompilerResult<Vec<Match>> {
        self.expect('{')?;
        let mut matches = Vec::new();
        while self.peek() != Some('}') {
            matches.push(self.one_match()?);
        }
        self.expect('}')?;
        Ok(matches)
    }

    fn one_match(&mut self) -> CompilerResult<Match> {
        let unknown = self.label()?;
        self.expect('[')?;
        let mut conditions = Vec::new();
        while self.peek() != Some(']') {
            conditions.push(self.condition(&unknown)?);
        }
        self.expect(']')?;
        Ok(Match::new(unknown, conditions))
    }

    fn condition(&mut self, unknown: &Label) -> CompilerResult<Condition> {
        let negated = self.consume('!');
        let first = self.identifier()?;
        if first == "E" {
            let matches = self.match_block()?;
            return Ok(Condition::Existential(ExistentialCondition {
                exists: !negated,
                matches,
            }));
        }
        if negated {
            return Err(self.error("expected 'E' after '!'"));
        }

        let left_label = first;
        let left_roles = self.roles()?;
        self.expect('=')?;
        let right_label = self.identifier()?;
        let right_roles = self.roles()?;

        // Normalize so the unknown of the enclosing match is on the left.
        if left_label == unknown.name {
            Ok(Condition::Path(PathCondition {
                roles_left: left_roles,
                label_right: right_label,
                roles_right: right_roles,
            }))
        } else if right_label == unknown.name {
            Ok(Condition::Path(PathCondition {
                roles_left: right_roles,
                label_right: left_label,
                roles_right: left_roles,
            }))
        } else {
            Err(self.error(&format!(
                "path condition must reference the unknown '{}'",
                unknown.name
            )))
        }
    }

    fn roles(&mut self) -> CompilerResult<Vec<Role>> {
        let mut roles = Vec::new();
        while self.consume_str("->") {
            let name = self.identifier()?;
            self.expect(':')?;
            let predecessor_type = self.type_name()?;
            roles.push(Role { name, predecessor_type });
        }
        Ok(roles)
    }

    fn projection(&mut self) -> CompilerResult<Projection> {
        if self.peek() == Some('{') {
            self.composite_projection()
        } else {
            self.component()
        }
    }

    /// A brace after `=>` or inside a composite is ambiguous: a composite
    /// starts `{ name = …`, a child specification starts `{ name: Type [`.
    /// One identifier of lookahead settles it.
    fn composite_projection(&mut self) -> CompilerResult<Projection> {
        if self.looks_like_child_specification() {
            return self.child_specification();
        }
        self.expect('{')?;
        let mut components = Vec::new();
        while self.peek() != Some('}') {
            let name = self.identifier()?;
            self.expect('=')?;
            let projection = self.component()?;
            components.push(NamedProjection { name, projection });
            self.consume(',');
        }
        self.expect('}')?;
        Ok(Projection::Composite { components })
    }

    fn component(&mut self) -> CompilerResult<Projection> {
        match self.peek() {
            Some('#') => {
                self.advance();
                Ok(Projection::Hash { label: self.identifier()? })
            }
            Some('@') => {
                self.advance();
                Ok(Projection::Time { label: self.identifier()? })
            }
            Some('{') => self.composite_projection(),
            _ => {
                let label = self.identifier()?;
                if self.consume('.') {
                    Ok(Projection::Field { label, field: self.identifier()? })
                } else {
                    Ok(Projection::Fact { label })
                }
            }
        }
    }

    fn child_specification(&mut self) -> CompilerResult<Projection> {
        let matches = self.match_block()?;
        let projection = if self.consume_str("=>") {
            self.projection()?
        } else {
            Projection::Composite { components: Vec::new() }
        };
        Ok(Projection::Specification(SpecificationProjection {
            matches,
            projection: Box::new(projection),
        }))
    }

    fn looks_like_child_specification(&mut self) -> bool {
        let saved = (self.position, self.line, self.column);
        let mut result = false;
        if self.consume('{') {
            if self.identifier().is_ok() {
                result = self.peek() == Some(':');
            }
        }
        (self.position, self.line, self.column) = saved;
        result
    }

    fn label(&mut self) -> CompilerResult<Label> {
        let name = self.identifier()?;
        self.expect(':')?;
        let fact_type = self.type_name()?;
        Ok(Label { name, fact_type })
    }

    /// A dotted name such as `Store.Order.Item`.
    fn type_name(&mut self) -> CompilerResult<String> {
        let mut name = self.identifier()?;
        // Look ahead: a dot continues the type only if an identifier
        // character follows it.
        while self.peek() == Some('.') {
            self.advance();
            name.push('.');
            name.push_str(&self.identifier()?);
        }
        Ok(name)
    }

    fn identifier(&mut self) -> CompilerResult<String> {
        self.skip_whitespace();
        let start = self.position;
        while let Some(c) = self.peek_raw() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance_raw();
            } else {
                break;
            }
        }
        if self.position == start {
            return Err(self.error("expected an identifier"));
        }
        let text = std::str::from_utf8(&self.source[start..self.position])
            .expect("identifiers are ASCII");
        if text.as_bytes()[0].is_ascii_digit() {
            return Err(self.error("identifiers cannot start with a digit"));
        }
        Ok(text.to_string())
    }

    // Character-level machinery.

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.peek_raw()
    }

    fn peek_raw(&self) -> Option<char> {
        self.source.get(self.position).map(|&b| char::from(b))
    }

    fn advance(&mut self) {
        self.skip_whitespace();
        self.advance_raw();
    }

    fn advance_raw(&mut self) {
        if let Some(&b) = self.source.get(self.position) {
            self.position += 1;
            if b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn consume(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance_raw();
            true
        } else {
            false
        }
    }

    fn consume_str(&mut self, expected: &str) -> bool {
        self.skip_whitespace();
        if self.source[self.position..].starts_with(expected.as_bytes()) {
            for _ in 0..expected.len() {
                self.advance_raw();
            }
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> CompilerResult<()> {
        if self.consume(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{expected}'")))
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_raw() {
            if c.is_ascii_whitespace() {
                self.advance_raw();
            } else {
                break;
            }
        }
    }

    fn at_end(&self) -> bool {
        self.position >= self.source.len()
    }

    fn error(&self, message: &str) -> CompilerError {
        CompilerError::Syntax {
            line: self.line,
            column: self.column,
            message: message.to_string(),
        }
    }
}
