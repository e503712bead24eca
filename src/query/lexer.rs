//! Predicate lexer
//!
//! Tokenizes the filter predicates callers attach to a request. The lexer only
//! classifies characters; deciding whether a word is a column, a keyword or a
//! literal value is left to the parameter binder.
//!
//! It never panics. Input that cannot be part of a single boolean expression
//! (statement separators, comments, placeholders, unterminated strings) is
//! reported as a [`LexError`] instead.

use std::fmt;
use std::ops::Range;

/// Token type enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare word: letters, digits and `_`, not starting with a digit. Right
    /// after `LIKE`/`ILIKE` it may also contain `%` (an unquoted pattern).
    Word(String),
    /// `qualifier.name`
    Qualified { qualifier: String, name: String },
    /// Integer or decimal literal.
    Number(String),
    /// Single-quoted string, with `''` unescaped.
    Quoted(String),
    /// Operator or punctuation, rendered verbatim.
    Symbol(String),
}

/// Token with position information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

impl Token {
    /// Create a new token
    pub fn new(kind: TokenKind, span: Range<usize>) -> Self {
        Self { kind, span }
    }
}

/// Why a predicate could not be tokenized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

/// Predicate lexer
pub struct PredicateLexer {
    input: Vec<char>,
    pos: usize,
    /// The previous token was `LIKE` or `ILIKE`
    in_pattern: bool,
}

impl PredicateLexer {
    /// Create a new lexer from input string
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            in_pattern: false,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Self::new(input);
        let mut tokens = Vec::new();

        while let Some(token) = lexer.next_token()? {
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        self.skip_whitespace();

        let start = self.pos;
        if self.is_at_end() {
            return Ok(None);
        }

        let ch = self.current_char();
        let token = match ch {
            '\'' => self.scan_string(start)?,
            '0'..='9' => self.scan_number(start),
            c if c.is_alphabetic() || c == '_' => self.scan_word(start),
            '%' if self.in_pattern => self.scan_word(start),
            '(' | ')' | ',' | '+' | '*' | '.' | '%' => {
                self.advance();
                Token::new(TokenKind::Symbol(ch.to_string()), start..self.pos)
            }
            '-' => {
                if self.peek_char() == '-' {
                    return Err(self.error("comments are not allowed", start));
                }
                self.advance();
                Token::new(TokenKind::Symbol("-".to_string()), start..self.pos)
            }
            '/' => {
                if self.peek_char() == '*' {
                    return Err(self.error("comments are not allowed", start));
                }
                self.advance();
                Token::new(TokenKind::Symbol("/".to_string()), start..self.pos)
            }
            '=' | '<' | '>' | '!' | '~' => self.scan_run(start, |c| "=<>!~*".contains(c)),
            '|' => self.scan_run(start, |c| c == '|'),
            ':' => self.scan_run(start, |c| c == ':'),
            ';' => return Err(self.error("statement separators are not allowed", start)),
            '$' => return Err(self.error("positional placeholders are not allowed", start)),
            '"' => return Err(self.error("quoted identifiers are not supported", start)),
            other => return Err(self.error(&format!("unexpected character '{other}'"), start)),
        };

        self.in_pattern = matches!(
            &token.kind,
            TokenKind::Word(w) if w.eq_ignore_ascii_case("like") || w.eq_ignore_ascii_case("ilike")
        );
        Ok(Some(token))
    }

    /// Scan a single-quoted string literal
    fn scan_string(&mut self, start: usize) -> Result<Token, LexError> {
        self.advance(); // Skip opening quote

        let mut value = String::new();
        loop {
            if self.is_at_end() {
                return Err(self.error("unterminated string literal", start));
            }
            let ch = self.current_char();
            self.advance();
            if ch == '\'' {
                if self.current_char() == '\'' {
                    value.push('\'');
                    self.advance();
                } else {
                    break;
                }
            } else {
                value.push(ch);
            }
        }

        Ok(Token::new(TokenKind::Quoted(value), start..self.pos))
    }

    /// Scan a number (integer or decimal)
    fn scan_number(&mut self, start: usize) -> Token {
        let mut value = String::new();

        while !self.is_at_end() && self.current_char().is_ascii_digit() {
            value.push(self.current_char());
            self.advance();
        }

        // Handle decimal point
        if self.current_char() == '.' && self.peek_char().is_ascii_digit() {
            value.push('.');
            self.advance();
            while !self.is_at_end() && self.current_char().is_ascii_digit() {
                value.push(self.current_char());
                self.advance();
            }
        }

        Token::new(TokenKind::Number(value), start..self.pos)
    }

    /// Scan a word, joining `a.b` into a qualified reference
    fn scan_word(&mut self, start: usize) -> Token {
        let first = self.read_word();

        if self.current_char() == '.' {
            let next = self.peek_char();
            if next.is_alphabetic() || next == '_' {
                self.advance();
                let name = self.read_word();
                return Token::new(
                    TokenKind::Qualified {
                        qualifier: first,
                        name,
                    },
                    start..self.pos,
                );
            }
        }

        Token::new(TokenKind::Word(first), start..self.pos)
    }

    fn read_word(&mut self) -> String {
        let mut value = String::new();
        while !self.is_at_end() {
            let ch = self.current_char();
            if ch.is_alphanumeric() || ch == '_' || (ch == '%' && self.in_pattern) {
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        value
    }

    fn scan_run(&mut self, start: usize, accepts: impl Fn(char) -> bool) -> Token {
        let mut value = String::new();
        while !self.is_at_end() && accepts(self.current_char()) {
            value.push(self.current_char());
            self.advance();
        }
        Token::new(TokenKind::Symbol(value), start..self.pos)
    }

    /// Skip whitespace characters
    fn skip_whitespace(&mut self) {
        while !self.is_at_end() && self.current_char().is_whitespace() {
            self.advance();
        }
    }

    fn error(&self, message: &str, position: usize) -> LexError {
        LexError {
            message: message.to_string(),
            position,
        }
    }

    fn current_char(&self) -> char {
        self.input.get(self.pos).copied().unwrap_or('\0')
    }

    fn peek_char(&self) -> char {
        self.input.get(self.pos + 1).copied().unwrap_or('\0')
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        PredicateLexer::tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_comparison() {
        assert_eq!(
            kinds("status='completed'"),
            vec![
                TokenKind::Word("status".into()),
                TokenKind::Symbol("=".into()),
                TokenKind::Quoted("completed".into()),
            ]
        );
    }

    #[test]
    fn test_qualified_and_like_pattern() {
        assert_eq!(
            kinds("granules.granule_id LIKE %MOD09%"),
            vec![
                TokenKind::Qualified {
                    qualifier: "granules".into(),
                    name: "granule_id".into()
                },
                TokenKind::Word("LIKE".into()),
                TokenKind::Word("%MOD09%".into()),
            ]
        );
    }

    #[test]
    fn test_operators_and_numbers() {
        assert_eq!(
            kinds("duration >= 1.5 and port <> 21"),
            vec![
                TokenKind::Word("duration".into()),
                TokenKind::Symbol(">=".into()),
                TokenKind::Number("1.5".into()),
                TokenKind::Word("and".into()),
                TokenKind::Word("port".into()),
                TokenKind::Symbol("<>".into()),
                TokenKind::Number("21".into()),
            ]
        );
    }

    #[test]
    fn test_percent_is_modulo_outside_like() {
        assert_eq!(
            kinds("duration%60 = 0 and name ilike MOD%"),
            vec![
                TokenKind::Word("duration".into()),
                TokenKind::Symbol("%".into()),
                TokenKind::Number("60".into()),
                TokenKind::Symbol("=".into()),
                TokenKind::Number("0".into()),
                TokenKind::Word("and".into()),
                TokenKind::Word("name".into()),
                TokenKind::Word("ilike".into()),
                TokenKind::Word("MOD%".into()),
            ]
        );
        assert_eq!(
            kinds("port % 2"),
            vec![
                TokenKind::Word("port".into()),
                TokenKind::Symbol("%".into()),
                TokenKind::Number("2".into()),
            ]
        );
    }

    #[test]
    fn test_doubled_quote_is_unescaped() {
        assert_eq!(kinds("'it''s'"), vec![TokenKind::Quoted("it's".into())]);
    }

    #[test]
    fn test_rejects_statement_breakers() {
        assert!(PredicateLexer::tokenize("status = 'a'; drop table granules").is_err());
        assert!(PredicateLexer::tokenize("status = 'a' -- comment").is_err());
        assert!(PredicateLexer::tokenize("status = $1").is_err());
        let err = PredicateLexer::tokenize("status = 'open").unwrap_err();
        assert_eq!(err.position, 9);
    }

    #[test]
    fn test_spans_cover_source() {
        let tokens = PredicateLexer::tokenize("a in (1, 2)").unwrap();
        assert_eq!(tokens[0].span, 0..1);
        assert_eq!(tokens.last().unwrap().span, 10..11);
    }
}
