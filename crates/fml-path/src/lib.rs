//! # fml-path
//!
//! Text front end shared by the mapping language and its embedded path
//! expressions: a forgiving tokenizer, an expression AST with a Pratt parser,
//! and the [`PathEvaluator`] seam used by the interpreter together with the
//! default [`FhirPathEvaluator`].

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::{BinaryOp, Expr, Literal, UnaryOp};
pub use eval::{FhirPathEvaluator, PathEvaluator, Variables, to_boolean};
pub use lexer::{Position, Token, TokenKind, TokenStream, tokenize};
pub use parser::{parse_expression, parse_expression_str};

use thiserror::Error;

/// Parse error with optional source location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl ParseError {
    /// Error without a location
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    /// Error located at `position`
    pub fn at(message: impl Into<String>, position: Position) -> Self {
        Self {
            message: message.into(),
            line: Some(position.line),
            column: Some(position.column),
        }
    }

    /// `Unexpected token: <value>` at the token's position
    #[must_use]
    pub fn unexpected(token: &Token) -> Self {
        Self::at(format!("Unexpected token: {}", token.value), token.position)
    }

    /// Input ran out while more tokens were required
    #[must_use]
    pub fn end_of_input() -> Self {
        Self::new("Unexpected end of input")
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let (Some(line), Some(col)) = (self.line, self.column) {
            write!(f, " at line {line}, column {col}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Errors raised while evaluating path expressions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Wrong number of arguments for {name}(): got {got}")]
    Arity { name: String, got: usize },

    #[error("Undefined variable: %{0}")]
    UndefinedVariable(String),

    #[error("Invalid regular expression '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Evaluation error: {0}")]
    Evaluation(String),
}

impl Error {
    /// Build an evaluation error
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation(message.into())
    }
}

/// Result type for path evaluation
pub type Result<T> = std::result::Result<T, Error>;
