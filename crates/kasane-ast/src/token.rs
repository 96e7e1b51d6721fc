//! Token types for the Kasane lexer.

use crate::Location;

/// Token types produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// Raw text content outside tags.
    Text,
    /// `{{` - expression open
    ExprOpen,
    /// `}}` - expression close
    ExprClose,
    /// `{%` - statement open
    StmtOpen,
    /// `%}` - statement close
    StmtClose,
    /// `{#` - comment open (content is skipped by the lexer)
    CommentOpen,
    /// `#}` - comment close
    CommentClose,
    /// `-` - whitespace control marker, only adjacent to a delimiter
    Dash,
    /// `.` - path separator
    Dot,
    /// `|` - filter separator
    Pipe,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// Identifier: [A-Za-z_][A-Za-z0-9_]*
    Ident,
    /// Unsigned integer literal
    Integer,
    /// Quoted string literal (value holds the unescaped content)
    Str,
    /// End of file
    Eof,
}

impl TokenType {
    /// Fixed source text for punctuation tokens.
    pub fn literal(self) -> Option<&'static str> {
        match self {
            TokenType::ExprOpen => Some("{{"),
            TokenType::ExprClose => Some("}}"),
            TokenType::StmtOpen => Some("{%"),
            TokenType::StmtClose => Some("%}"),
            TokenType::CommentOpen => Some("{#"),
            TokenType::CommentClose => Some("#}"),
            TokenType::Dash => Some("-"),
            TokenType::Dot => Some("."),
            TokenType::Pipe => Some("|"),
            TokenType::LParen => Some("("),
            TokenType::RParen => Some(")"),
            TokenType::LBracket => Some("["),
            TokenType::RBracket => Some("]"),
            TokenType::Comma => Some(","),
            _ => None,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(
            self,
            TokenType::ExprOpen | TokenType::StmtOpen | TokenType::CommentOpen
        )
    }

    pub fn is_close(self) -> bool {
        matches!(
            self,
            TokenType::ExprClose | TokenType::StmtClose | TokenType::CommentClose
        )
    }
}

/// A token with its type, value, and location.
#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub value: String,
    pub location: Location,
}

impl Token {
    pub fn new(token_type: TokenType, value: impl Into<String>, location: Location) -> Self {
        Self {
            token_type,
            value: value.into(),
            location,
        }
    }
}
