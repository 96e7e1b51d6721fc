//! Hand-written lexer for Kasane templates.
//!
//! Two-mode state machine:
//! - Text mode: accumulates raw text until `{{`, `{%` or `{#`
//! - Tag mode: tokenizes punctuation, literals and identifiers until the
//!   matching `}}` or `%}`
//!
//! Comments are skipped here (only their delimiters and dashes are emitted so
//! the token processor can apply whitespace control). `{% raw %}` sections
//! are folded into the surrounding text.

use crate::token::{Token, TokenType};
use crate::{Location, ParseError};

/// Tokenize a source string into a sequence of tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(source);
    lexer.tokenize()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Expr,
    Stmt,
}

/// A `{% raw %}` or `{% endraw %}` tag found in text mode.
#[derive(Debug, Clone, Copy)]
struct RawTag {
    /// Position after the closing `%}`.
    end: usize,
    /// `{%-`
    trim_before: bool,
    /// `-%}`
    trim_after: bool,
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
    tag: Option<(TagKind, Location)>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            tag: None,
        }
    }

    fn tokenize(&mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();

        while self.pos < self.bytes.len() {
            match self.tag {
                Some((kind, open)) => self.tokenize_tag(&mut tokens, kind, open)?,
                None => self.tokenize_text(&mut tokens)?,
            }
        }

        if let Some((_, open)) = self.tag {
            return Err(ParseError::UnterminatedTag { location: open });
        }

        tokens.push(Token::new(TokenType::Eof, "", self.location()));
        Ok(tokens)
    }

    /// Text mode: accumulate text until a tag delimiter.
    fn tokenize_text(&mut self, tokens: &mut Vec<Token>) -> Result<(), ParseError> {
        let start_loc = self.location();
        let mut text = String::new();

        loop {
            let Some(offset) = self.next_delimiter() else {
                text.push_str(&self.source[self.pos..]);
                self.advance_to(self.bytes.len());
                break;
            };

            let delimiter = self.pos + offset;
            text.push_str(&self.source[self.pos..delimiter]);
            self.advance_to(delimiter);

            if let Some(open) = self.match_statement(self.pos, "raw") {
                let raw_loc = self.location();
                self.advance_to(open.end);
                let (mut content, close) = self.consume_raw_section(raw_loc)?;
                if open.trim_before {
                    text.truncate(text.trim_end().len());
                }
                if open.trim_after {
                    content = content.trim_start();
                }
                if close.trim_before {
                    content = content.trim_end();
                }
                text.push_str(content);
                if close.trim_after {
                    let rest = &self.source[self.pos..];
                    self.advance_to(self.pos + rest.len() - rest.trim_start().len());
                }
                continue;
            }
            break;
        }

        if !text.is_empty() {
            tokens.push(Token::new(TokenType::Text, text, start_loc));
        }

        if self.pos >= self.bytes.len() {
            return Ok(());
        }

        let loc = self.location();
        match self.bytes[self.pos + 1] {
            b'{' => self.open_tag(tokens, TokenType::ExprOpen, TagKind::Expr, loc),
            b'%' => self.open_tag(tokens, TokenType::StmtOpen, TagKind::Stmt, loc),
            _ => self.skip_comment(tokens, loc)?,
        }
        Ok(())
    }

    /// Offset of the next `{{`, `{%` or `{#` from the current position.
    fn next_delimiter(&self) -> Option<usize> {
        let rest = &self.bytes[self.pos..];
        rest.windows(2)
            .position(|w| w[0] == b'{' && matches!(w[1], b'{' | b'%' | b'#'))
    }

    fn open_tag(&mut self, tokens: &mut Vec<Token>, open: TokenType, kind: TagKind, loc: Location) {
        self.emit_fixed(tokens, open, loc);
        if self.looking_at(b"-") {
            let dash_loc = self.location();
            self.emit_fixed(tokens, TokenType::Dash, dash_loc);
        }
        self.tag = Some((kind, loc));
    }

    /// Skip `{# ... #}`, keeping only the delimiters and any dashes.
    fn skip_comment(&mut self, tokens: &mut Vec<Token>, loc: Location) -> Result<(), ParseError> {
        self.emit_fixed(tokens, TokenType::CommentOpen, loc);
        let mut content_start = self.pos;
        if self.looking_at(b"-") {
            let dash_loc = self.location();
            self.emit_fixed(tokens, TokenType::Dash, dash_loc);
            content_start = self.pos;
        }

        let Some(offset) = find(&self.bytes[content_start..], b"#}") else {
            return Err(ParseError::UnclosedComment { location: loc });
        };
        let close = content_start + offset;

        if close > content_start && self.bytes[close - 1] == b'-' {
            self.advance_to(close - 1);
            let dash_loc = self.location();
            self.emit_fixed(tokens, TokenType::Dash, dash_loc);
        } else {
            self.advance_to(close);
        }

        let close_loc = self.location();
        self.emit_fixed(tokens, TokenType::CommentClose, close_loc);
        Ok(())
    }

    /// Consume everything up to the matching `{% endraw %}` and return it
    /// verbatim, along with the closing tag.
    fn consume_raw_section(&mut self, raw_loc: Location) -> Result<(&'a str, RawTag), ParseError> {
        let content_start = self.pos;
        let mut search = content_start;

        while let Some(offset) = find(&self.bytes[search..], b"{%") {
            let candidate = search + offset;
            if let Some(close) = self.match_statement(candidate, "endraw") {
                let content = &self.source[content_start..candidate];
                self.advance_to(close.end);
                return Ok((content, close));
            }
            search = candidate + 2;
        }

        Err(ParseError::UnclosedRaw { location: raw_loc })
    }

    /// Match `{%-? keyword -?%}` at `at`.
    fn match_statement(&self, at: usize, keyword: &str) -> Option<RawTag> {
        let bytes = self.bytes;
        if !bytes[at..].starts_with(b"{%") {
            return None;
        }
        let mut p = at + 2;
        let trim_before = bytes.get(p) == Some(&b'-');
        if trim_before {
            p += 1;
        }
        while bytes.get(p).is_some_and(|b| b.is_ascii_whitespace()) {
            p += 1;
        }
        if !bytes[p..].starts_with(keyword.as_bytes()) {
            return None;
        }
        p += keyword.len();
        if bytes.get(p).is_some_and(|&b| is_ident_continue(b)) {
            return None;
        }
        while bytes.get(p).is_some_and(|b| b.is_ascii_whitespace()) {
            p += 1;
        }
        let trim_after = bytes.get(p) == Some(&b'-');
        if trim_after {
            p += 1;
        }
        if bytes[p..].starts_with(b"%}") {
            Some(RawTag {
                end: p + 2,
                trim_before,
                trim_after,
            })
        } else {
            None
        }
    }

    /// Tag mode: one token per call.
    fn tokenize_tag(
        &mut self,
        tokens: &mut Vec<Token>,
        kind: TagKind,
        open: Location,
    ) -> Result<(), ParseError> {
        let loc = self.location();
        let ch = self.bytes[self.pos];

        match ch {
            b' ' | b'\t' | b'\r' | b'\n' => {
                let end = self.bytes[self.pos..]
                    .iter()
                    .position(|b| !b.is_ascii_whitespace())
                    .map_or(self.bytes.len(), |n| self.pos + n);
                self.advance_to(end);
            }

            b'}' if self.looking_at(b"}}") => {
                if kind != TagKind::Expr {
                    return Err(mismatched_close("}}", "%}", open, loc));
                }
                self.emit_fixed(tokens, TokenType::ExprClose, loc);
                self.tag = None;
            }

            b'%' if self.looking_at(b"%}") => {
                if kind != TagKind::Stmt {
                    return Err(mismatched_close("%}", "}}", open, loc));
                }
                self.emit_fixed(tokens, TokenType::StmtClose, loc);
                self.tag = None;
            }

            b'-' => {
                let close: &[u8] = match kind {
                    TagKind::Expr => b"}}",
                    TagKind::Stmt => b"%}",
                };
                if !self.bytes[self.pos + 1..].starts_with(close) {
                    return Err(ParseError::UnexpectedCharacter {
                        character: '-',
                        location: loc,
                    });
                }
                self.emit_fixed(tokens, TokenType::Dash, loc);
            }

            b'.' => self.emit_fixed(tokens, TokenType::Dot, loc),
            b'|' => self.emit_fixed(tokens, TokenType::Pipe, loc),
            b'(' => self.emit_fixed(tokens, TokenType::LParen, loc),
            b')' => self.emit_fixed(tokens, TokenType::RParen, loc),
            b'[' => self.emit_fixed(tokens, TokenType::LBracket, loc),
            b']' => self.emit_fixed(tokens, TokenType::RBracket, loc),
            b',' => self.emit_fixed(tokens, TokenType::Comma, loc),

            b'"' | b'\'' => self.tokenize_string(tokens, ch, loc)?,

            b'0'..=b'9' => {
                let start = self.pos;
                let end = self.scan_while(start, |b| b.is_ascii_digit());
                self.advance_to(end);
                tokens.push(Token::new(TokenType::Integer, &self.source[start..end], loc));
            }

            b'A'..=b'Z' | b'a'..=b'z' | b'_' => {
                let start = self.pos;
                let end = self.scan_while(start, is_ident_continue);
                self.advance_to(end);
                tokens.push(Token::new(TokenType::Ident, &self.source[start..end], loc));
            }

            _ => {
                let character = self.source[self.pos..].chars().next().unwrap_or('\u{fffd}');
                return Err(ParseError::UnexpectedCharacter {
                    character,
                    location: loc,
                });
            }
        }

        Ok(())
    }

    /// Tokenize a quoted string literal, resolving backslash escapes.
    fn tokenize_string(
        &mut self,
        tokens: &mut Vec<Token>,
        quote: u8,
        loc: Location,
    ) -> Result<(), ParseError> {
        let mut value = String::new();
        let mut chars = self.source[self.pos + 1..].char_indices();
        let mut escaped = false;

        let end = loop {
            let Some((i, c)) = chars.next() else {
                return Err(ParseError::UnterminatedString { location: loc });
            };
            if escaped {
                value.push(match c {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                escaped = false;
                continue;
            }
            match c {
                '\\' => escaped = true,
                '\n' => return Err(ParseError::UnterminatedString { location: loc }),
                c if c as u32 == quote as u32 => break self.pos + 1 + i + 1,
                c => value.push(c),
            }
        };

        self.advance_to(end);
        tokens.push(Token::new(TokenType::Str, value, loc));
        Ok(())
    }

    fn location(&self) -> Location {
        Location::new(self.line, self.col, self.pos)
    }

    fn looking_at(&self, pattern: &[u8]) -> bool {
        self.bytes[self.pos..].starts_with(pattern)
    }

    fn scan_while(&self, start: usize, pred: impl Fn(u8) -> bool) -> usize {
        self.bytes[start..]
            .iter()
            .position(|&b| !pred(b))
            .map_or(self.bytes.len(), |n| start + n)
    }

    /// Emit a token with fixed literal text and advance past it.
    fn emit_fixed(&mut self, tokens: &mut Vec<Token>, token_type: TokenType, loc: Location) {
        let literal = token_type.literal().unwrap_or_default();
        tokens.push(Token::new(token_type, literal, loc));
        self.advance_to(self.pos + literal.len());
    }

    /// Move to byte position `end`, updating line/column tracking.
    fn advance_to(&mut self, end: usize) {
        for c in self.source[self.pos..end].chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.pos = end;
    }
}

fn is_ident_continue(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_')
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn mismatched_close(found: &str, expected: &str, open: Location, at: Location) -> ParseError {
    ParseError::UnexpectedToken {
        message: format!("found '{found}' but the tag opened at {open} must close with '{expected}'"),
        location: at,
    }
}
