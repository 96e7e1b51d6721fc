//! AST for Kasane templates.
//!
//! Source text goes through three stages:
//! 1. [`lexer`] turns text into tokens (`{{ }}`, `{% %}`, `{# #}` aware)
//! 2. [`token_processor`] applies whitespace control and drops comments
//! 3. [`parser`] builds the [`Template`] tree
//!
//! Nothing is evaluated here; the engine crate interprets the tree.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

mod lexer;
mod parser;
mod token;
mod token_processor;

// ============================================================================
// Location
// ============================================================================

/// Location in source code (1-indexed line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: usize,
    pub column: usize,
    pub byte_offset: usize,
}

impl Location {
    pub fn new(line: usize, column: usize, byte_offset: usize) -> Self {
        Self {
            line,
            column,
            byte_offset,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

// ============================================================================
// Options
// ============================================================================

/// How literal whitespace around statement tags is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhitespacePolicy {
    /// Keep text byte-for-byte; only explicit `-` markers trim.
    #[default]
    Preserve,
    /// Also drop the newline after statement/comment tags and the
    /// indentation before a statement tag that starts its line.
    Trim,
}

/// Options that affect parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseOptions {
    pub whitespace: WhitespacePolicy,
}

// ============================================================================
// AST Nodes
// ============================================================================

/// A parsed template.
///
/// Besides the node tree it indexes every `{% block %}` by name (at any
/// nesting depth) so inheritance can look overrides up directly.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
    extends: Option<ExtendsNode>,
    blocks: BTreeMap<String, BlockNode>,
}

impl Template {
    pub fn new(nodes: Vec<Node>, extends: Option<ExtendsNode>, blocks: BTreeMap<String, BlockNode>) -> Self {
        Self {
            nodes,
            extends,
            blocks,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Name of the parent template, if this template extends one.
    pub fn parent(&self) -> Option<&str> {
        self.extends.as_ref().map(|e| e.parent.as_str())
    }

    pub fn extends(&self) -> Option<&ExtendsNode> {
        self.extends.as_ref()
    }

    pub fn block(&self, name: &str) -> Option<&BlockNode> {
        self.blocks.get(name)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BlockNode> {
        self.blocks.values()
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Literal(LiteralNode),
    Expression(ExpressionNode),
    Block(BlockNode),
    Loop(LoopNode),
    Conditional(ConditionalNode),
    Extends(ExtendsNode),
    Include(IncludeNode),
}

impl Node {
    pub fn location(&self) -> Location {
        match self {
            Node::Literal(n) => n.location,
            Node::Expression(n) => n.location,
            Node::Block(n) => n.location,
            Node::Loop(n) => n.location,
            Node::Conditional(n) => n.location,
            Node::Extends(n) => n.location,
            Node::Include(n) => n.location,
        }
    }
}

/// Literal text, kept verbatim.
#[derive(Debug, Clone)]
pub struct LiteralNode {
    pub text: String,
    pub location: Location,
}

/// Output: `{{ path | filter }}`
#[derive(Debug, Clone)]
pub struct ExpressionNode {
    pub expr: Expr,
    pub location: Location,
}

/// Overridable region: `{% block name %} ... {% endblock %}`
///
/// The body is the template's own content for the block; it is shared so the
/// block index and the node tree do not duplicate it.
#[derive(Debug, Clone)]
pub struct BlockNode {
    pub name: String,
    pub body: Arc<[Node]>,
    pub location: Location,
}

/// Loop: `{% for item in expr %} ... {% endfor %}`
#[derive(Debug, Clone)]
pub struct LoopNode {
    pub binding: String,
    pub iterable: Expr,
    pub body: Vec<Node>,
    pub location: Location,
}

/// Conditional: `{% if test %} ... {% elif test %} ... {% else %} ... {% endif %}`
///
/// `elif` chains are nested conditionals in `else_body`.
#[derive(Debug, Clone)]
pub struct ConditionalNode {
    pub test: Test,
    pub then_body: Vec<Node>,
    pub else_body: Vec<Node>,
    pub location: Location,
}

/// Inheritance directive: `{% extends "parent" %}`
#[derive(Debug, Clone)]
pub struct ExtendsNode {
    pub parent: String,
    pub location: Location,
}

/// Include directive: `{% include "name" %}`
#[derive(Debug, Clone)]
pub struct IncludeNode {
    pub name: String,
    pub location: Location,
}

/// A conditional test, optionally negated with `not`.
#[derive(Debug, Clone)]
pub struct Test {
    pub negated: bool,
    pub expr: Expr,
}

/// A path followed by zero or more filters.
#[derive(Debug, Clone)]
pub struct Expr {
    pub path: Path,
    pub filters: Vec<FilterCall>,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        for call in &self.filters {
            write!(f, " | {}", call.filter.name())?;
            if let Some(arg) = &call.arg {
                write!(f, "({arg:?})")?;
            }
        }
        Ok(())
    }
}

/// A variable path such as `post.url`, `posts[0]` or `page["title"]`.
#[derive(Debug, Clone)]
pub struct Path {
    root: String,
    segments: Vec<Segment>,
    location: Location,
}

impl Path {
    pub fn new(root: impl Into<String>, segments: Vec<Segment>, location: Location) -> Self {
        Self {
            root: root.into(),
            segments,
            location,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn location(&self) -> Location {
        self.location
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// One step of a path after the root name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A filter application: `| name` or `| name("arg")`.
#[derive(Debug, Clone)]
pub struct FilterCall {
    pub filter: Filter,
    pub arg: Option<String>,
    pub location: Location,
}

/// The closed set of filters the expression language knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Mark the value as safe: skip autoescaping. Also spelled `raw`.
    Safe,
    /// Escape now and mark safe so autoescape does not escape twice. Also `e`.
    Escape,
    Upper,
    Lower,
    Capitalize,
    Trim,
    Length,
    First,
    Last,
    Reverse,
    Default,
    Join,
}

impl Filter {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "safe" | "raw" => Filter::Safe,
            "escape" | "e" => Filter::Escape,
            "upper" => Filter::Upper,
            "lower" => Filter::Lower,
            "capitalize" => Filter::Capitalize,
            "trim" => Filter::Trim,
            "length" => Filter::Length,
            "first" => Filter::First,
            "last" => Filter::Last,
            "reverse" => Filter::Reverse,
            "default" => Filter::Default,
            "join" => Filter::Join,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Filter::Safe => "safe",
            Filter::Escape => "escape",
            Filter::Upper => "upper",
            Filter::Lower => "lower",
            Filter::Capitalize => "capitalize",
            Filter::Trim => "trim",
            Filter::Length => "length",
            Filter::First => "first",
            Filter::Last => "last",
            Filter::Reverse => "reverse",
            Filter::Default => "default",
            Filter::Join => "join",
        }
    }

    /// Number of string arguments the filter takes.
    pub fn arity(self) -> usize {
        match self {
            Filter::Default | Filter::Join => 1,
            _ => 0,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected character '{character}' at {location}")]
    UnexpectedCharacter { character: char, location: Location },

    #[error("unterminated tag opened at {location}")]
    UnterminatedTag { location: Location },

    #[error("unterminated string literal at {location}")]
    UnterminatedString { location: Location },

    #[error("unclosed comment opened at {location}")]
    UnclosedComment { location: Location },

    #[error("unclosed raw section opened at {location}")]
    UnclosedRaw { location: Location },

    #[error("{message} at {location}")]
    UnexpectedToken { message: String, location: Location },

    #[error("unknown directive '{name}' at {location}")]
    UnknownDirective { name: String, location: Location },

    #[error("unclosed {construct} opened at {location}")]
    UnclosedConstruct { construct: String, location: Location },

    #[error("'{tag}' without a matching opening tag at {location}")]
    UnmatchedEnd { tag: String, location: Location },

    #[error("'endblock {found}' does not close block '{expected}' at {location}")]
    MismatchedEndBlock {
        expected: String,
        found: String,
        location: Location,
    },

    #[error("unknown filter '{name}' at {location}")]
    UnknownFilter { name: String, location: Location },

    #[error("filter '{name}' takes {expected} argument(s), got {found} at {location}")]
    FilterArity {
        name: String,
        expected: usize,
        found: usize,
        location: Location,
    },

    #[error("'extends' must be the first tag of a template and appear once, at {location}")]
    MisplacedExtends { location: Location },

    #[error("block '{name}' is defined more than once, at {location}")]
    DuplicateBlock { name: String, location: Location },

    #[error("reserved word '{word}' cannot be used as a name at {location}")]
    ReservedWord { word: String, location: Location },
}

impl ParseError {
    pub fn location(&self) -> Location {
        match self {
            ParseError::UnexpectedCharacter { location, .. }
            | ParseError::UnterminatedTag { location }
            | ParseError::UnterminatedString { location }
            | ParseError::UnclosedComment { location }
            | ParseError::UnclosedRaw { location }
            | ParseError::UnexpectedToken { location, .. }
            | ParseError::UnknownDirective { location, .. }
            | ParseError::UnclosedConstruct { location, .. }
            | ParseError::UnmatchedEnd { location, .. }
            | ParseError::MismatchedEndBlock { location, .. }
            | ParseError::UnknownFilter { location, .. }
            | ParseError::FilterArity { location, .. }
            | ParseError::MisplacedExtends { location }
            | ParseError::DuplicateBlock { location, .. }
            | ParseError::ReservedWord { location, .. } => *location,
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a template with default options.
pub fn parse(source: &str) -> Result<Template, ParseError> {
    parse_with_options(source, ParseOptions::default())
}

/// Parse a template source string into an AST.
pub fn parse_with_options(source: &str, options: ParseOptions) -> Result<Template, ParseError> {
    let tokens = lexer::tokenize(source)?;
    let tokens = token_processor::process(tokens, options.whitespace);
    parser::parse(tokens)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_page_fragment() {
        let source = r#"{% extends "base.tpl" %}
{% block main %}
<ul>
{% for post in posts %}
  <li>{{ post.datetime }} <a href="{{ root }}{{ post.url }}">{{ post.title }}</a></li>
{% endfor %}
</ul>
{% endblock main %}
{% block js %}<script src="{{ root }}/static/main.js"></script>{% endblock js %}
"#;
        let template = parse(source).unwrap();
        assert_eq!(template.parent(), Some("base.tpl"));
        let names: Vec<_> = template.blocks().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["js", "main"]);
    }

    #[test]
    fn expr_display_round_trips_shape() {
        let template = parse(r#"{{ page["title"] | default("none") | upper }}"#).unwrap();
        match &template.nodes()[0] {
            Node::Expression(e) => {
                assert_eq!(e.expr.to_string(), r#"page.title | default("none") | upper"#)
            }
            other => panic!("expected expression, got {other:?}"),
        }
    }

    #[test]
    fn error_location_is_reported() {
        let err = parse("ok\n{% endif %}").unwrap_err();
        let location = err.location();
        assert_eq!(location.line, 2);
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn filter_names_resolve() {
        assert_eq!(Filter::from_name("raw"), Some(Filter::Safe));
        assert_eq!(Filter::from_name("e"), Some(Filter::Escape));
        assert_eq!(Filter::from_name("shell"), None);
        assert_eq!(Filter::Join.arity(), 1);
    }
}
