//! Recursive descent parser for Kasane templates.
//!
//! Consumes a processed token stream (after the token processor) and
//! produces a [`Template`], indexing blocks and the `extends` directive as it
//! goes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::token::{Token, TokenType};
use crate::{
    BlockNode, ConditionalNode, Expr, ExpressionNode, ExtendsNode, Filter, FilterCall,
    IncludeNode, LiteralNode, Location, LoopNode, Node, ParseError, Path, Segment, Template,
    Test,
};

/// Names that cannot be bound by `for` or used as a path root.
const RESERVED_WORDS: &[&str] = &["in", "not", "loop"];

/// Tags that only make sense while a construct is open.
const END_TAGS: &[&str] = &["endblock", "endfor", "endif", "elif", "else", "endraw"];

/// Parse a processed token stream into an AST Template.
pub fn parse(tokens: Vec<Token>) -> Result<Template, ParseError> {
    let mut parser = Parser::new(tokens);
    parser.parse()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    extends: Option<ExtendsNode>,
    blocks: BTreeMap<String, BlockNode>,
    seen_tag: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            extends: None,
            blocks: BTreeMap::new(),
            seen_tag: false,
        }
    }

    fn parse(&mut self) -> Result<Template, ParseError> {
        let nodes = self.parse_nodes_until(&[], "template", Location::new(1, 1, 0))?;
        Ok(Template::new(
            nodes,
            self.extends.take(),
            std::mem::take(&mut self.blocks),
        ))
    }

    /// Parse nodes until one of the `stops` directives (left unconsumed) or EOF.
    fn parse_nodes_until(
        &mut self,
        stops: &[&str],
        construct: &str,
        opened_at: Location,
    ) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();
        loop {
            if self.current_type() == TokenType::Eof {
                if stops.is_empty() {
                    return Ok(nodes);
                }
                return Err(ParseError::UnclosedConstruct {
                    construct: construct.to_string(),
                    location: opened_at,
                });
            }
            if self.peek_directive().is_some_and(|d| stops.contains(&d)) {
                return Ok(nodes);
            }
            nodes.push(self.parse_node()?);
        }
    }

    fn parse_node(&mut self) -> Result<Node, ParseError> {
        match self.current_type() {
            TokenType::Text => {
                let token = self.consume(TokenType::Text)?;
                Ok(Node::Literal(LiteralNode {
                    text: token.value,
                    location: token.location,
                }))
            }
            TokenType::ExprOpen => {
                self.seen_tag = true;
                self.parse_expression_node()
            }
            TokenType::StmtOpen => self.parse_statement(),
            _ => self.unexpected_token(None),
        }
    }

    fn parse_expression_node(&mut self) -> Result<Node, ParseError> {
        let open = self.consume(TokenType::ExprOpen)?;
        let expr = self.parse_expr()?;
        self.consume(TokenType::ExprClose)?;
        Ok(Node::Expression(ExpressionNode {
            expr,
            location: open.location,
        }))
    }

    fn parse_statement(&mut self) -> Result<Node, ParseError> {
        let open = self.consume(TokenType::StmtOpen)?;
        let location = open.location;
        let directive = self.consume_with(TokenType::Ident, "Expected a directive name")?;
        let name = directive.value;

        if name == "extends" {
            return self.parse_extends(location);
        }
        self.seen_tag = true;

        match name.as_str() {
            "block" => self.parse_block(location),
            "for" => self.parse_loop(location),
            "if" => self.parse_conditional(location).map(Node::Conditional),
            "include" => self.parse_include(location),
            tag if END_TAGS.contains(&tag) => Err(ParseError::UnmatchedEnd {
                tag: tag.to_string(),
                location,
            }),
            _ => Err(ParseError::UnknownDirective { name, location }),
        }
    }

    fn parse_extends(&mut self, location: Location) -> Result<Node, ParseError> {
        if self.seen_tag || self.extends.is_some() {
            return Err(ParseError::MisplacedExtends { location });
        }
        self.seen_tag = true;

        let parent = self
            .consume_with(TokenType::Str, "Expected a quoted template name after 'extends'")?
            .value;
        self.consume(TokenType::StmtClose)?;

        let node = ExtendsNode { parent, location };
        self.extends = Some(node.clone());
        Ok(Node::Extends(node))
    }

    fn parse_block(&mut self, location: Location) -> Result<Node, ParseError> {
        let name = self
            .consume_with(TokenType::Ident, "Expected a block name")?
            .value;
        self.consume(TokenType::StmtClose)?;

        let construct = format!("block '{name}'");
        let body = self.parse_nodes_until(&["endblock"], &construct, location)?;

        self.consume(TokenType::StmtOpen)?;
        self.consume(TokenType::Ident)?;
        if self.current_type() == TokenType::Ident {
            let end = self.consume(TokenType::Ident)?;
            if end.value != name {
                return Err(ParseError::MismatchedEndBlock {
                    expected: name,
                    found: end.value,
                    location: end.location,
                });
            }
        }
        self.consume(TokenType::StmtClose)?;

        if self.blocks.contains_key(&name) {
            return Err(ParseError::DuplicateBlock { name, location });
        }

        let block = BlockNode {
            name: name.clone(),
            body: Arc::from(body),
            location,
        };
        self.blocks.insert(name, block.clone());
        Ok(Node::Block(block))
    }

    fn parse_loop(&mut self, location: Location) -> Result<Node, ParseError> {
        let binding = self.parse_name()?;
        let keyword = self.consume_with(TokenType::Ident, "Expected 'in' after the loop variable")?;
        if keyword.value != "in" {
            return Err(ParseError::UnexpectedToken {
                message: format!("Expected 'in' after the loop variable, got '{}'", keyword.value),
                location: keyword.location,
            });
        }
        let iterable = self.parse_expr()?;
        self.consume(TokenType::StmtClose)?;

        let body = self.parse_nodes_until(&["endfor"], "for loop", location)?;
        self.consume_end_tag("endfor")?;

        Ok(Node::Loop(LoopNode {
            binding,
            iterable,
            body,
            location,
        }))
    }

    /// Parse the rest of an `if`/`elif` tag, its branches and the closing `endif`.
    fn parse_conditional(&mut self, location: Location) -> Result<ConditionalNode, ParseError> {
        let test = self.parse_test()?;
        self.consume(TokenType::StmtClose)?;

        let then_body = self.parse_nodes_until(&["elif", "else", "endif"], "if", location)?;

        let else_body = match self.peek_directive() {
            Some("elif") => {
                let open = self.consume(TokenType::StmtOpen)?;
                self.consume(TokenType::Ident)?;
                // The nested conditional consumes the shared endif.
                let nested = self.parse_conditional(open.location)?;
                return Ok(ConditionalNode {
                    test,
                    then_body,
                    else_body: vec![Node::Conditional(nested)],
                    location,
                });
            }
            Some("else") => {
                self.consume_end_tag("else")?;
                self.parse_nodes_until(&["endif"], "if", location)?
            }
            _ => Vec::new(),
        };

        self.consume_end_tag("endif")?;
        Ok(ConditionalNode {
            test,
            then_body,
            else_body,
            location,
        })
    }

    fn parse_include(&mut self, location: Location) -> Result<Node, ParseError> {
        let name = self
            .consume_with(TokenType::Str, "Expected a quoted template name after 'include'")?
            .value;
        self.consume(TokenType::StmtClose)?;
        Ok(Node::Include(IncludeNode { name, location }))
    }

    fn parse_test(&mut self) -> Result<Test, ParseError> {
        let negated = self.current_type() == TokenType::Ident && self.current().value == "not";
        if negated {
            self.advance_token();
        }
        let expr = self.parse_expr()?;
        Ok(Test { negated, expr })
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let path = self.parse_path()?;
        let mut filters = Vec::new();

        while self.current_type() == TokenType::Pipe {
            self.advance_token();
            filters.push(self.parse_filter_call()?);
        }

        Ok(Expr { path, filters })
    }

    fn parse_filter_call(&mut self) -> Result<FilterCall, ParseError> {
        let token = self.consume_with(TokenType::Ident, "Expected a filter name after '|'")?;
        let filter = Filter::from_name(&token.value).ok_or_else(|| ParseError::UnknownFilter {
            name: token.value.clone(),
            location: token.location,
        })?;

        let mut args = Vec::new();
        if self.current_type() == TokenType::LParen {
            self.advance_token();
            while self.current_type() != TokenType::RParen {
                if !args.is_empty() {
                    self.consume(TokenType::Comma)?;
                }
                let arg = self.consume_with(
                    TokenType::Str,
                    "Filter arguments must be quoted string literals",
                )?;
                args.push(arg.value);
            }
            self.consume(TokenType::RParen)?;
        }

        if args.len() != filter.arity() {
            return Err(ParseError::FilterArity {
                name: token.value,
                expected: filter.arity(),
                found: args.len(),
                location: token.location,
            });
        }

        Ok(FilterCall {
            filter,
            arg: args.pop(),
            location: token.location,
        })
    }

    fn parse_path(&mut self) -> Result<Path, ParseError> {
        let root = self.consume_with(TokenType::Ident, "Expected a variable name")?;
        if root.value != "loop" {
            validate_name(&root.value, root.location)?;
        }

        let mut segments = Vec::new();
        loop {
            match self.current_type() {
                TokenType::Dot => {
                    self.advance_token();
                    let token = self.current().clone();
                    match token.token_type {
                        TokenType::Ident => segments.push(Segment::Key(token.value)),
                        TokenType::Integer => segments.push(Segment::Index(parse_index(&token)?)),
                        _ => return self.unexpected_token(Some("Expected a name or index after '.'")),
                    }
                    self.advance_token();
                }
                TokenType::LBracket => {
                    self.advance_token();
                    let token = self.current().clone();
                    match token.token_type {
                        TokenType::Str => segments.push(Segment::Key(token.value)),
                        TokenType::Integer => segments.push(Segment::Index(parse_index(&token)?)),
                        _ => {
                            return self
                                .unexpected_token(Some("Expected an index or quoted key inside '[]'"))
                        }
                    }
                    self.advance_token();
                    self.consume(TokenType::RBracket)?;
                }
                _ => break,
            }
        }

        Ok(Path::new(root.value, segments, root.location))
    }

    /// A bindable name: identifier that is not reserved.
    fn parse_name(&mut self) -> Result<String, ParseError> {
        let token = self.consume_with(TokenType::Ident, "Expected a name")?;
        validate_name(&token.value, token.location)?;
        Ok(token.value)
    }

    /// `{% name %}` for tags without arguments.
    fn consume_end_tag(&mut self, name: &str) -> Result<(), ParseError> {
        self.consume(TokenType::StmtOpen)?;
        let token = self.consume(TokenType::Ident)?;
        if token.value != name {
            return Err(ParseError::UnexpectedToken {
                message: format!("Expected '{name}', got '{}'", token.value),
                location: token.location,
            });
        }
        self.consume(TokenType::StmtClose)?;
        Ok(())
    }

    /// Name of the directive at the cursor when it is a `{% name ...`.
    fn peek_directive(&self) -> Option<&str> {
        if self.current_type() != TokenType::StmtOpen {
            return None;
        }
        self.tokens
            .get(self.pos + 1)
            .filter(|t| t.token_type == TokenType::Ident)
            .map(|t| t.value.as_str())
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn current_type(&self) -> TokenType {
        self.current().token_type
    }

    fn advance_token(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn consume(&mut self, expected: TokenType) -> Result<Token, ParseError> {
        let message = format!("Expected {}", describe(expected));
        self.consume_with(expected, &message)
    }

    fn consume_with(&mut self, expected: TokenType, message: &str) -> Result<Token, ParseError> {
        let token = self.current().clone();
        if token.token_type != expected {
            return self.unexpected_token(Some(message));
        }
        self.advance_token();
        Ok(token)
    }

    fn unexpected_token<T>(&self, message: Option<&str>) -> Result<T, ParseError> {
        let token = self.current();
        let found = match token.token_type {
            TokenType::Ident | TokenType::Integer => format!("'{}'", token.value),
            TokenType::Str => format!("{:?}", token.value),
            other => describe(other),
        };
        let message = match message {
            Some(m) => format!("{m}, got {found}"),
            None => format!("Unexpected {found}"),
        };
        Err(ParseError::UnexpectedToken {
            message,
            location: token.location,
        })
    }
}

fn validate_name(name: &str, location: Location) -> Result<(), ParseError> {
    if RESERVED_WORDS.contains(&name) {
        return Err(ParseError::ReservedWord {
            word: name.to_string(),
            location,
        });
    }
    Ok(())
}

fn parse_index(token: &Token) -> Result<usize, ParseError> {
    token.value.parse().map_err(|_| ParseError::UnexpectedToken {
        message: format!("Index '{}' is out of range", token.value),
        location: token.location,
    })
}

fn describe(token_type: TokenType) -> String {
    match token_type {
        TokenType::Text => "text".to_string(),
        TokenType::Ident => "identifier".to_string(),
        TokenType::Integer => "integer".to_string(),
        TokenType::Str => "string literal".to_string(),
        TokenType::Eof => "end of template".to_string(),
        other => format!("'{}'", other.literal().unwrap_or("?")),
    }
}

#[cfg(test)]
mod tests {
    use crate::{parse, parse_with_options, Node, ParseError, ParseOptions, Segment, WhitespacePolicy};

    #[test]
    fn test_parse_text() {
        let template = parse("Hello, world!").unwrap();
        assert_eq!(template.nodes().len(), 1);
        match &template.nodes()[0] {
            Node::Literal(node) => assert_eq!(node.text, "Hello, world!"),
            other => panic!("Expected Literal node, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_expression_with_filters() {
        let template = parse(r#"{{ user.name | default("anon") | upper }}"#).unwrap();
        match &template.nodes()[0] {
            Node::Expression(node) => {
                assert_eq!(node.expr.path.root(), "user");
                assert_eq!(node.expr.path.segments(), &[Segment::Key("name".into())]);
                assert_eq!(node.expr.filters.len(), 2);
                assert_eq!(node.expr.filters[0].arg.as_deref(), Some("anon"));
            }
            other => panic!("Expected Expression node, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_bracketed_path() {
        let template = parse(r#"{{ posts[0]["title"] }}{{ posts.1.url }}"#).unwrap();
        match (&template.nodes()[0], &template.nodes()[1]) {
            (Node::Expression(a), Node::Expression(b)) => {
                assert_eq!(
                    a.expr.path.segments(),
                    &[Segment::Index(0), Segment::Key("title".into())]
                );
                assert_eq!(
                    b.expr.path.segments(),
                    &[Segment::Index(1), Segment::Key("url".into())]
                );
            }
            other => panic!("Expected two expressions, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_block_and_index() {
        let template = parse("{% block main %}<p>root</p>{% endblock %}").unwrap();
        let block = template.block("main").unwrap();
        assert_eq!(block.body.len(), 1);
        assert!(matches!(template.nodes()[0], Node::Block(_)));
    }

    #[test]
    fn test_nested_blocks_are_indexed() {
        let template =
            parse("{% block outer %}a{% block inner %}b{% endblock inner %}{% endblock outer %}")
                .unwrap();
        assert!(template.block("outer").is_some());
        assert!(template.block("inner").is_some());
    }

    #[test]
    fn test_endblock_name_must_match() {
        let result = parse("{% block main %}x{% endblock js %}");
        assert!(matches!(result, Err(ParseError::MismatchedEndBlock { .. })));
    }

    #[test]
    fn test_duplicate_block() {
        let result = parse("{% block a %}{% endblock %}{% block a %}{% endblock %}");
        assert!(matches!(result, Err(ParseError::DuplicateBlock { .. })));
    }

    #[test]
    fn test_parse_loop() {
        let template = parse("{% for post in posts %}{{ post.title }}{% endfor %}").unwrap();
        match &template.nodes()[0] {
            Node::Loop(node) => {
                assert_eq!(node.binding, "post");
                assert_eq!(node.iterable.path.root(), "posts");
                assert_eq!(node.body.len(), 1);
            }
            other => panic!("Expected Loop node, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_if_elif_else() {
        let template =
            parse("{% if a %}A{% elif not b %}B{% else %}C{% endif %}after").unwrap();
        assert_eq!(template.nodes().len(), 2);
        match &template.nodes()[0] {
            Node::Conditional(outer) => {
                assert!(!outer.test.negated);
                match &outer.else_body[0] {
                    Node::Conditional(inner) => {
                        assert!(inner.test.negated);
                        assert_eq!(inner.else_body.len(), 1);
                    }
                    other => panic!("Expected nested Conditional, got {other:?}"),
                }
            }
            other => panic!("Expected Conditional node, got {other:?}"),
        }
    }

    #[test]
    fn test_extends_must_come_first() {
        let template = parse("<!-- leaf -->\n{% extends \"base\" %}").unwrap();
        assert_eq!(template.parent(), Some("base"));

        let result = parse("{{ x }}{% extends \"base\" %}");
        assert!(matches!(result, Err(ParseError::MisplacedExtends { .. })));

        let result = parse("{% extends \"a\" %}{% extends \"b\" %}");
        assert!(matches!(result, Err(ParseError::MisplacedExtends { .. })));
    }

    #[test]
    fn test_unmatched_end_tags() {
        for source in ["{% endblock %}", "{% endfor %}", "{% endif %}", "{% for x in xs %}{% endif %}"] {
            let result = parse(source);
            assert!(
                matches!(result, Err(ParseError::UnmatchedEnd { .. })),
                "{source}: {result:?}"
            );
        }
    }

    #[test]
    fn test_unclosed_constructs() {
        let result = parse("{% block main %}never closed");
        match result {
            Err(ParseError::UnclosedConstruct { construct, location }) => {
                assert_eq!(construct, "block 'main'");
                assert_eq!(location.line, 1);
            }
            other => panic!("Expected UnclosedConstruct, got {other:?}"),
        }
        assert!(matches!(
            parse("{% if x %}yes"),
            Err(ParseError::UnclosedConstruct { .. })
        ));
    }

    #[test]
    fn test_unknown_directive_and_filter() {
        assert!(matches!(
            parse("{% macro x %}"),
            Err(ParseError::UnknownDirective { .. })
        ));
        assert!(matches!(
            parse("{{ x | system }}"),
            Err(ParseError::UnknownFilter { .. })
        ));
        assert!(matches!(
            parse("{{ x | join }}"),
            Err(ParseError::FilterArity { expected: 1, found: 0, .. })
        ));
    }

    #[test]
    fn test_malformed_expression() {
        assert!(matches!(
            parse("{{ }}"),
            Err(ParseError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            parse("{{ a. }}"),
            Err(ParseError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            parse("{{ x | default(1) }}"),
            Err(ParseError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn test_reserved_loop_binding() {
        assert!(matches!(
            parse("{% for loop in xs %}{% endfor %}"),
            Err(ParseError::ReservedWord { .. })
        ));
    }

    #[test]
    fn test_include() {
        let template = parse(r#"{% include "partials/nav.tpl" %}"#).unwrap();
        match &template.nodes()[0] {
            Node::Include(node) => assert_eq!(node.name, "partials/nav.tpl"),
            other => panic!("Expected Include node, got {other:?}"),
        }
    }

    #[test]
    fn test_trim_policy_is_applied() {
        let options = ParseOptions {
            whitespace: WhitespacePolicy::Trim,
        };
        let template =
            parse_with_options("{% for x in xs %}\n{{ x }}\n{% endfor %}\n", options).unwrap();
        match &template.nodes()[0] {
            Node::Loop(node) => {
                assert_eq!(node.body.len(), 2);
                match &node.body[1] {
                    Node::Literal(text) => assert_eq!(text.text, "\n"),
                    other => panic!("Expected Literal node, got {other:?}"),
                }
            }
            other => panic!("Expected Loop node, got {other:?}"),
        }
        assert_eq!(template.nodes().len(), 1);
    }
}
