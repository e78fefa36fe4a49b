//! Tokenizer
//!
//! Splits map source text into a flat token stream. The tokenizer never
//! fails: an unterminated string or comment simply runs to the end of the
//! input and the parser reports the structural problem.

use crate::ParseError;
use std::fmt;

/// Token categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier, keyword, `%variable` or backtick-quoted name
    Symbol,
    /// Quoted string literal (quotes removed, escapes resolved)
    String,
    /// Integer or decimal literal
    Number,
    /// `@`-prefixed date/time literal (prefix removed)
    DateTime,
    /// Operator or punctuation
    Punct,
}

/// 1-based source location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// A single token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub position: Position,
}

impl Token {
    /// True if this is a non-string token with exactly `value`
    #[must_use]
    pub fn is(&self, value: &str) -> bool {
        self.kind != TokenKind::String && self.value == value
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

const TWO_CHAR_PUNCT: [&str; 8] = ["->", "<<", ">>", "==", "!=", "!~", "<=", ">="];
const ONE_CHAR_PUNCT: &str = ".:,;=(){}[]+-*/&|<>~";

/// Tokenize map or expression source text
#[must_use]
pub fn tokenize(text: &str) -> Vec<Token> {
    Lexer::new(text).run()
}

struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn push(&mut self, kind: TokenKind, value: String, position: Position) {
        self.tokens.push(Token {
            kind,
            value,
            position,
        });
    }

    fn run(mut self) -> Vec<Token> {
        while let Some(c) = self.peek(0) {
            let start = self.position();
            match c {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '/' if self.peek(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek(1) == Some('*') => self.skip_block_comment(),
                '\'' | '"' => {
                    self.bump();
                    let value = self.read_quoted(c);
                    self.push(TokenKind::String, value, start);
                }
                '`' => {
                    self.bump();
                    let value = self.read_quoted('`');
                    self.push(TokenKind::Symbol, value, start);
                }
                c if c.is_ascii_digit() => {
                    let value = self.read_number();
                    self.push(TokenKind::Number, value, start);
                }
                '@' => {
                    self.bump();
                    let value = self.read_while(|c| c.is_ascii_alphanumeric() || "-:.+".contains(c));
                    self.push(TokenKind::DateTime, value, start);
                }
                c if c.is_alphabetic() || c == '_' || c == '%' || c == '$' => {
                    let mut value = String::new();
                    if let Some(prefix) = self.bump() {
                        value.push(prefix);
                    }
                    value.push_str(&self.read_while(|c| c.is_alphanumeric() || c == '_'));
                    self.push(TokenKind::Symbol, value, start);
                }
                _ => {
                    let value = self.read_punct();
                    self.push(TokenKind::Punct, value, start);
                }
            }
        }
        self.tokens
    }

    fn read_while(&mut self, accept: impl Fn(char) -> bool) -> String {
        let mut value = String::new();
        while let Some(c) = self.peek(0) {
            if !accept(c) {
                break;
            }
            value.push(c);
            self.bump();
        }
        value
    }

    fn read_number(&mut self) -> String {
        let mut value = self.read_while(|c| c.is_ascii_digit());
        if self.peek(0) == Some('.') && self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            value.push('.');
            value.push_str(&self.read_while(|c| c.is_ascii_digit()));
        }
        value
    }

    fn read_quoted(&mut self, quote: char) -> String {
        let mut value = String::new();
        while let Some(c) = self.bump() {
            if c == quote {
                break;
            }
            if c != '\\' {
                value.push(c);
                continue;
            }
            match self.bump() {
                Some('n') => value.push('\n'),
                Some('r') => value.push('\r'),
                Some('t') => value.push('\t'),
                Some('f') => value.push('\u{000C}'),
                Some('u') => {
                    let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(decoded) => value.push(decoded),
                        None => {
                            value.push_str("\\u");
                            value.push_str(&hex);
                        }
                    }
                }
                Some(other) => value.push(other),
                None => break,
            }
        }
        value
    }

    fn read_punct(&mut self) -> String {
        if let (Some(a), Some(b)) = (self.peek(0), self.peek(1)) {
            let pair: String = [a, b].iter().collect();
            if TWO_CHAR_PUNCT.contains(&pair.as_str()) {
                self.bump();
                self.bump();
                return pair;
            }
        }
        self.bump().map(String::from).unwrap_or_default()
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) {
        self.bump();
        self.bump();
        while let Some(c) = self.bump() {
            if c == '*' && self.peek(0) == Some('/') {
                self.bump();
                break;
            }
        }
    }
}

/// Cursor over a token vector
#[derive(Debug, Clone, Default)]
pub struct TokenStream {
    tokens: Vec<Token>,
    index: usize,
}

impl TokenStream {
    #[must_use]
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, index: 0 }
    }

    /// Tokenize `text` and wrap the result
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self::new(tokenize(text))
    }

    #[must_use]
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    /// Look `offset` tokens past the current one
    #[must_use]
    pub fn peek_nth(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.index + offset)
    }

    #[must_use]
    pub fn peek_value(&self) -> Option<&str> {
        self.peek().map(|t| t.value.as_str())
    }

    /// Take the current token
    pub fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned()?;
        self.index += 1;
        Some(token)
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.index < self.tokens.len()
    }

    /// True if the current token is the non-string `value`
    #[must_use]
    pub fn is_at(&self, value: &str) -> bool {
        self.peek().is_some_and(|t| t.is(value))
    }

    /// Consume the current token if it is `value`
    pub fn eat(&mut self, value: &str) -> bool {
        if self.is_at(value) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    /// Consume a token that must be `value`
    ///
    /// # Errors
    ///
    /// Returns `Unexpected token` for any other token and
    /// `Unexpected end of input` when the stream is exhausted.
    pub fn expect(&mut self, value: &str) -> Result<Token, ParseError> {
        match self.consume() {
            Some(token) if token.is(value) => Ok(token),
            Some(token) => Err(ParseError::unexpected(&token)),
            None => Err(ParseError::end_of_input()),
        }
    }

    /// Consume a symbol token and return its text
    ///
    /// # Errors
    ///
    /// Fails on any non-symbol token or at end of input.
    pub fn expect_symbol(&mut self) -> Result<String, ParseError> {
        match self.consume() {
            Some(token) if token.kind == TokenKind::Symbol => Ok(token.value),
            Some(token) => Err(ParseError::unexpected(&token)),
            None => Err(ParseError::end_of_input()),
        }
    }

    /// Consume a string token and return its text
    ///
    /// # Errors
    ///
    /// Fails on any non-string token or at end of input.
    pub fn expect_string(&mut self) -> Result<String, ParseError> {
        match self.consume() {
            Some(token) if token.kind == TokenKind::String => Ok(token.value),
            Some(token) => Err(ParseError::unexpected(&token)),
            None => Err(ParseError::end_of_input()),
        }
    }

    /// Position of the current token
    #[must_use]
    pub fn position(&self) -> Option<Position> {
        self.peek().map(|t| t.position)
    }
}
