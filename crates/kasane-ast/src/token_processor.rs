//! Token processor for whitespace control and comment handling.
//!
//! - A DASH right after an open delimiter strips all whitespace at the end of
//!   the preceding TEXT; a DASH right before a close delimiter strips all
//!   whitespace at the start of the following TEXT.
//! - Under [`WhitespacePolicy::Trim`], statement and comment tags also drop
//!   the newline that follows them and the indentation before them when the
//!   tag starts its line.
//! - Comment delimiters are consumed; the parser never sees them.

use crate::token::{Token, TokenType};
use crate::{Location, WhitespacePolicy};

/// Process tokens: apply whitespace control and strip comments.
pub fn process(tokens: Vec<Token>, policy: WhitespacePolicy) -> Vec<Token> {
    let mut processor = TokenProcessor::new(policy);
    processor.process(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingStrip {
    None,
    /// From `-}}` / `-%}` / `-#}`.
    All,
    /// From a statement close under the trim policy.
    Newline,
}

struct TokenProcessor {
    policy: WhitespacePolicy,
    result: Vec<Token>,
    pending: PendingStrip,
    dash_before_close: bool,
}

impl TokenProcessor {
    fn new(policy: WhitespacePolicy) -> Self {
        Self {
            policy,
            result: Vec::new(),
            pending: PendingStrip::None,
            dash_before_close: false,
        }
    }

    fn process(&mut self, tokens: Vec<Token>) -> Vec<Token> {
        let mut tokens = tokens.into_iter().peekable();

        while let Some(token) = tokens.next() {
            match token.token_type {
                TokenType::Text => self.handle_text(token),
                t if t.is_open() => {
                    let dashed = tokens
                        .next_if(|next| next.token_type == TokenType::Dash)
                        .is_some();
                    self.handle_open(token, dashed);
                }
                TokenType::Dash => self.dash_before_close = true,
                t if t.is_close() => self.handle_close(token),
                _ => self.result.push(token),
            }
        }

        std::mem::take(&mut self.result)
    }

    fn handle_text(&mut self, token: Token) {
        let pending = std::mem::replace(&mut self.pending, PendingStrip::None);
        let (text, location) = match pending {
            PendingStrip::None => (token.value, token.location),
            PendingStrip::All => {
                let trimmed = token.value.trim_start();
                let skipped = &token.value[..token.value.len() - trimmed.len()];
                let location = location_after(token.location, skipped);
                (trimmed.to_string(), location)
            }
            PendingStrip::Newline => match strip_line_remainder(&token.value) {
                Some(rest) => {
                    let skipped = &token.value[..token.value.len() - rest.len()];
                    let location = location_after(token.location, skipped);
                    (rest.to_string(), location)
                }
                None => (token.value, token.location),
            },
        };

        // Only add non-empty text tokens
        if !text.is_empty() {
            self.result.push(Token::new(TokenType::Text, text, location));
        }
    }

    fn handle_open(&mut self, token: Token, dashed: bool) {
        self.pending = PendingStrip::None;
        self.dash_before_close = false;

        if dashed {
            self.strip_trailing_from_last_text(|text| Some(text.value.trim_end().len()));
        } else if self.policy == WhitespacePolicy::Trim
            && matches!(token.token_type, TokenType::StmtOpen | TokenType::CommentOpen)
        {
            self.strip_trailing_from_last_text(indentation_cut);
        }

        if token.token_type != TokenType::CommentOpen {
            self.result.push(token);
        }
    }

    fn handle_close(&mut self, token: Token) {
        if std::mem::take(&mut self.dash_before_close) {
            self.pending = PendingStrip::All;
        } else if self.policy == WhitespacePolicy::Trim
            && matches!(token.token_type, TokenType::StmtClose | TokenType::CommentClose)
        {
            self.pending = PendingStrip::Newline;
        }

        if token.token_type != TokenType::CommentClose {
            self.result.push(token);
        }
    }

    /// Cut the TEXT token directly before the current tag at the byte length
    /// returned by `cut`, removing it when nothing is left.
    fn strip_trailing_from_last_text(&mut self, cut: impl Fn(&Token) -> Option<usize>) {
        let Some(last) = self.result.last() else {
            return;
        };
        if last.token_type != TokenType::Text {
            return;
        }
        let Some(keep) = cut(last) else {
            return;
        };

        if keep == 0 {
            self.result.pop();
        } else if let Some(last) = self.result.last_mut() {
            last.value.truncate(keep);
        }
    }
}

/// Where to cut text so a statement tag starting its line loses its indentation.
fn indentation_cut(token: &Token) -> Option<usize> {
    let text = &token.value;
    match text.rfind('\n') {
        Some(newline) => {
            let suffix = &text[newline + 1..];
            is_blank(suffix).then_some(newline + 1)
        }
        None => (token.location.column == 1 && is_blank(text)).then_some(0),
    }
}

/// Strip `[ \t]*\r?\n` from the start of `text`, if present.
fn strip_line_remainder(text: &str) -> Option<&str> {
    let rest = text.trim_start_matches([' ', '\t']);
    rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))
}

fn is_blank(text: &str) -> bool {
    text.chars().all(|c| c == ' ' || c == '\t')
}

fn location_after(start: Location, skipped: &str) -> Location {
    let mut location = start;
    for c in skipped.chars() {
        if c == '\n' {
            location.line += 1;
            location.column = 1;
        } else {
            location.column += 1;
        }
    }
    location.byte_offset += skipped.len();
    location
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn texts(source: &str, policy: WhitespacePolicy) -> Vec<String> {
        let tokens = tokenize(source).unwrap();
        process(tokens, policy)
            .into_iter()
            .filter(|t| t.token_type == TokenType::Text)
            .map(|t| t.value)
            .collect()
    }

    #[test]
    fn test_strip_line_remainder() {
        assert_eq!(strip_line_remainder("  \nhello"), Some("hello"));
        assert_eq!(strip_line_remainder("\r\nhello"), Some("hello"));
        assert_eq!(strip_line_remainder("  hello"), None);
        assert_eq!(strip_line_remainder("\n  hello"), Some("  hello"));
    }

    #[test]
    fn test_comment_stripping() {
        let result = texts("hello{# comment #}world", WhitespacePolicy::Preserve);
        assert_eq!(result, vec!["hello", "world"]);
    }

    #[test]
    fn test_comment_tokens_removed() {
        let tokens = process(tokenize("a{# x #}b").unwrap(), WhitespacePolicy::Preserve);
        assert!(tokens
            .iter()
            .all(|t| !matches!(t.token_type, TokenType::CommentOpen | TokenType::CommentClose)));
    }

    #[test]
    fn test_dash_strips_trailing() {
        let result = texts("hello \n\t{{- name }}", WhitespacePolicy::Preserve);
        assert_eq!(result, vec!["hello"]);
    }

    #[test]
    fn test_dash_strips_leading_next() {
        let result = texts("{{ name -}}  \n\n hello", WhitespacePolicy::Preserve);
        assert_eq!(result, vec!["hello"]);
    }

    #[test]
    fn test_dash_does_not_reach_past_other_tags() {
        let result = texts("{{ a -}}{{ b }}  x", WhitespacePolicy::Preserve);
        assert_eq!(result, vec!["  x"]);
    }

    #[test]
    fn test_dashed_comment() {
        let result = texts("a  {#- note -#}  b", WhitespacePolicy::Preserve);
        assert_eq!(result, vec!["a", "b"]);
    }

    #[test]
    fn test_preserve_keeps_newlines() {
        let result = texts("<ul>\n  {% if x %}\n  <li></li>\n  {% endif %}\n</ul>", WhitespacePolicy::Preserve);
        assert_eq!(result, vec!["<ul>\n  ", "\n  <li></li>\n  ", "\n</ul>"]);
    }

    #[test]
    fn test_trim_policy_drops_tag_lines() {
        let result = texts("<ul>\n  {% if x %}\n  <li></li>\n  {% endif %}\n</ul>", WhitespacePolicy::Trim);
        assert_eq!(result, vec!["<ul>\n", "  <li></li>\n", "</ul>"]);
    }

    #[test]
    fn test_trim_policy_keeps_inline_text() {
        let result = texts("a {% if x %} b", WhitespacePolicy::Trim);
        assert_eq!(result, vec!["a ", " b"]);
    }

    #[test]
    fn test_trim_policy_ignores_expressions() {
        let result = texts("  {{ x }}\nnext", WhitespacePolicy::Trim);
        assert_eq!(result, vec!["  ", "\nnext"]);
    }

    #[test]
    fn test_trimmed_text_location_moves() {
        let tokens = process(tokenize("{{ x -}}\n\n  y").unwrap(), WhitespacePolicy::Preserve);
        let text = tokens.iter().find(|t| t.token_type == TokenType::Text).unwrap();
        assert_eq!(text.value, "y");
        assert_eq!(text.location.line, 3);
        assert_eq!(text.location.column, 3);
    }
}
