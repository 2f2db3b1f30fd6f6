//! CSS selector subset understood by the in-memory document.
//!
//! Supported: type selectors, `*`, `.class`, `#id`, `[attr]`, `[attr=v]`,
//! `[attr*=v]`, `[attr^=v]`, `[attr$=v]`, the descendant and child (`>`)
//! combinators, and comma-separated selector lists.

use thiserror::Error;

/// A selector string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid selector `{selector}`: {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: String,
}

/// Read access to a node tree, as needed to evaluate a selector.
pub(crate) trait Tree {
    fn tag(&self, node: usize) -> &str;
    fn attribute(&self, node: usize, name: &str) -> Option<&str>;
    fn parent(&self, node: usize) -> Option<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals(String),
    Contains(String),
    Prefix(String),
    Suffix(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrCondition {
    name: String,
    op: AttrOp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<AttrCondition>,
}

impl Compound {
    fn matches<T: Tree>(&self, tree: &T, node: usize) -> bool {
        if let Some(tag) = &self.tag
            && !tree.tag(node).eq_ignore_ascii_case(tag)
        {
            return false;
        }
        if let Some(id) = &self.id
            && tree.attribute(node, "id") != Some(id.as_str())
        {
            return false;
        }
        if !self.classes.is_empty() {
            let class_attr = tree.attribute(node, "class").unwrap_or_default();
            if !self
                .classes
                .iter()
                .all(|wanted| class_attr.split_whitespace().any(|class| class == wanted))
            {
                return false;
            }
        }
        self.attributes.iter().all(|condition| {
            let Some(value) = tree.attribute(node, &condition.name) else {
                return false;
            };
            match &condition.op {
                AttrOp::Exists => true,
                AttrOp::Equals(expected) => value == expected,
                AttrOp::Contains(needle) => value.contains(needle.as_str()),
                AttrOp::Prefix(prefix) => value.starts_with(prefix.as_str()),
                AttrOp::Suffix(suffix) => value.ends_with(suffix.as_str()),
            }
        })
    }
}

/// One selector of a list: compounds joined by combinators, left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    parts: Vec<(Combinator, Compound)>,
}

impl Complex {
    fn matches<T: Tree>(&self, tree: &T, node: usize) -> bool {
        self.parts
            .len()
            .checked_sub(1)
            .is_some_and(|last| self.matches_at(tree, last, node))
    }

    fn matches_at<T: Tree>(&self, tree: &T, index: usize, node: usize) -> bool {
        let (combinator, compound) = &self.parts[index];
        if !compound.matches(tree, node) {
            return false;
        }
        if index == 0 {
            return true;
        }
        match combinator {
            Combinator::Child => tree
                .parent(node)
                .is_some_and(|parent| self.matches_at(tree, index - 1, parent)),
            Combinator::Descendant => {
                let mut ancestor = tree.parent(node);
                while let Some(candidate) = ancestor {
                    if self.matches_at(tree, index - 1, candidate) {
                        return true;
                    }
                    ancestor = tree.parent(candidate);
                }
                false
            }
        }
    }
}

/// A parsed, comma-separated selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectorList {
    selectors: Vec<Complex>,
}

impl SelectorList {
    pub(crate) fn parse(input: &str) -> Result<Self, SelectorError> {
        Parser::new(input).parse_list()
    }

    pub(crate) fn matches<T: Tree>(&self, tree: &T, node: usize) -> bool {
        self.selectors
            .iter()
            .any(|selector| selector.matches(tree, node))
    }
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError {
            selector: self.input.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    /// Skips whitespace and reports whether any was consumed.
    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn expect(&mut self, expected: char) -> Result<(), SelectorError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected `{expected}` at offset {}", self.pos)))
        }
    }

    fn parse_list(mut self) -> Result<SelectorList, SelectorError> {
        let mut selectors = Vec::new();
        loop {
            self.skip_whitespace();
            selectors.push(self.parse_complex()?);
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(',') => self.pos += 1,
                Some(other) => return Err(self.error(format!("unexpected `{other}`"))),
            }
        }
        Ok(SelectorList { selectors })
    }

    fn parse_complex(&mut self) -> Result<Complex, SelectorError> {
        let mut parts = vec![(Combinator::Descendant, self.parse_compound()?)];
        loop {
            let had_whitespace = self.skip_whitespace();
            let combinator = match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_whitespace();
                    Combinator::Child
                }
                Some(_) if had_whitespace => Combinator::Descendant,
                Some(other) => return Err(self.error(format!("unexpected `{other}`"))),
            };
            parts.push((combinator, self.parse_compound()?));
        }
        Ok(Complex { parts })
    }

    fn parse_compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();
        let start = self.pos;

        if self.peek() == Some('*') {
            self.pos += 1;
        } else if self.peek().is_some_and(is_ident_char) {
            compound.tag = Some(self.parse_ident()?);
        }

        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.parse_ident()?);
                }
                Some('#') => {
                    self.pos += 1;
                    compound.id = Some(self.parse_ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attributes.push(self.parse_attribute()?);
                }
                _ => break,
            }
        }

        if self.pos == start {
            return Err(self.error(format!("expected a selector at offset {}", self.pos)));
        }
        Ok(compound)
    }

    fn parse_ident(&mut self) -> Result<String, SelectorError> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error(format!("expected an identifier at offset {start}")));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_attribute(&mut self) -> Result<AttrCondition, SelectorError> {
        self.skip_whitespace();
        let name = self.parse_ident()?;
        self.skip_whitespace();

        let operator = match self.peek() {
            Some(']') => {
                self.pos += 1;
                return Ok(AttrCondition {
                    name,
                    op: AttrOp::Exists,
                });
            }
            Some('=') => {
                self.pos += 1;
                '='
            }
            Some(symbol @ ('*' | '^' | '$')) => {
                self.pos += 1;
                self.expect('=')?;
                symbol
            }
            _ => return Err(self.error("expected an attribute operator")),
        };

        self.skip_whitespace();
        let value = self.parse_attribute_value()?;
        self.skip_whitespace();
        self.expect(']')?;

        let op = match operator {
            '*' => AttrOp::Contains(value),
            '^' => AttrOp::Prefix(value),
            '$' => AttrOp::Suffix(value),
            _ => AttrOp::Equals(value),
        };
        Ok(AttrCondition { name, op })
    }

    fn parse_attribute_value(&mut self) -> Result<String, SelectorError> {
        match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != quote) {
                    self.pos += 1;
                }
                if self.is_eof() {
                    return Err(self.error("unterminated attribute value"));
                }
                let value = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                Ok(value)
            }
            _ => self.parse_ident(),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}
