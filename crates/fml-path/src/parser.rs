//! Pratt parser for path expressions
//!
//! The parser consumes tokens from a shared [`TokenStream`] and stops at the
//! first token that cannot continue the expression, so the mapping language
//! parser can resume with its own keywords (`as`, `then`, `check`, `;`, ...).

use crate::ParseError;
use crate::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::lexer::{TokenKind, TokenStream};

const PREFIX_POWER: u8 = 11;
const POSTFIX_POWER: u8 = 12;

/// Parse one expression from the stream, leaving trailing tokens in place
///
/// # Errors
///
/// Returns `Unexpected token` / `Unexpected end of input` on malformed input.
pub fn parse_expression(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    parse_with_power(stream, 0)
}

/// Parse a complete expression string
///
/// # Errors
///
/// Fails on malformed input or when tokens remain after the expression.
pub fn parse_expression_str(text: &str) -> Result<Expr, ParseError> {
    let mut stream = TokenStream::from_text(text);
    let expr = parse_expression(&mut stream)?;
    match stream.peek() {
        Some(token) => Err(ParseError::unexpected(token)),
        None => Ok(expr),
    }
}

fn parse_with_power(stream: &mut TokenStream, min_power: u8) -> Result<Expr, ParseError> {
    let mut left = parse_prefix(stream)?;

    loop {
        let Some(token) = stream.peek() else {
            break;
        };
        if token.kind == TokenKind::String {
            break;
        }

        if token.is(".") {
            if POSTFIX_POWER <= min_power {
                break;
            }
            stream.consume();
            let name = stream.expect_symbol()?;
            left = if stream.eat("(") {
                let args = parse_arguments(stream)?;
                Expr::Function {
                    base: Some(Box::new(left)),
                    name,
                    args,
                }
            } else {
                Expr::Member {
                    base: Box::new(left),
                    name,
                }
            };
            continue;
        }

        if token.is("[") {
            if POSTFIX_POWER <= min_power {
                break;
            }
            stream.consume();
            let index = parse_with_power(stream, 0)?;
            stream.expect("]")?;
            left = Expr::Index {
                base: Box::new(left),
                index: Box::new(index),
            };
            continue;
        }

        let Some(op) = BinaryOp::from_token(&token.value) else {
            break;
        };
        let power = op.binding_power();
        if power <= min_power {
            break;
        }
        stream.consume();
        let right = parse_with_power(stream, power)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }

    Ok(left)
}

fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let token = stream.consume().ok_or_else(ParseError::end_of_input)?;

    match token.kind {
        TokenKind::String => Ok(Expr::Literal(Literal::String(token.value))),
        TokenKind::DateTime => Ok(Expr::Literal(Literal::DateTime(token.value))),
        TokenKind::Number => parse_number(&token.value)
            .map(Expr::Literal)
            .ok_or_else(|| ParseError::unexpected(&token)),
        TokenKind::Symbol => {
            if let Some(name) = token.value.strip_prefix('%') {
                return Ok(Expr::Variable(name.to_string()));
            }
            match token.value.as_str() {
                "true" => return Ok(Expr::Literal(Literal::Boolean(true))),
                "false" => return Ok(Expr::Literal(Literal::Boolean(false))),
                _ => {}
            }
            if stream.eat("(") {
                let args = parse_arguments(stream)?;
                Ok(Expr::Function {
                    base: None,
                    name: token.value,
                    args,
                })
            } else {
                Ok(Expr::Symbol(token.value))
            }
        }
        TokenKind::Punct => match token.value.as_str() {
            "(" => {
                let inner = parse_with_power(stream, 0)?;
                stream.expect(")")?;
                Ok(Expr::Group(Box::new(inner)))
            }
            "{" => {
                stream.expect("}")?;
                Ok(Expr::Empty)
            }
            "-" | "+" => {
                let op = if token.value == "-" {
                    UnaryOp::Minus
                } else {
                    UnaryOp::Plus
                };
                let operand = parse_with_power(stream, PREFIX_POWER)?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            _ => Err(ParseError::unexpected(&token)),
        },
    }
}

fn parse_number(text: &str) -> Option<Literal> {
    if text.contains('.') {
        text.parse().ok().map(Literal::Decimal)
    } else {
        text.parse()
            .ok()
            .map(Literal::Integer)
            .or_else(|| text.parse().ok().map(Literal::Decimal))
    }
}

/// Parse `arg, arg, ...)` after the opening parenthesis
fn parse_arguments(stream: &mut TokenStream) -> Result<Vec<Expr>, ParseError> {
    let mut args = Vec::new();
    if stream.eat(")") {
        return Ok(args);
    }
    loop {
        args.push(parse_with_power(stream, 0)?);
        if stream.eat(",") {
            continue;
        }
        stream.expect(")")?;
        return Ok(args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let expr = parse_expression_str("a + b * c = d and e").unwrap();
        let Expr::Binary { op, left, .. } = &expr else {
            panic!("expected binary, got {expr:?}");
        };
        assert_eq!(*op, BinaryOp::And);
        let Expr::Binary { op, left, .. } = left.as_ref() else {
            panic!("expected equality");
        };
        assert_eq!(*op, BinaryOp::Equal);
        let Expr::Binary { op, right, .. } = left.as_ref() else {
            panic!("expected addition");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.as_ref(),
            Expr::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_left_associative() {
        let expr = parse_expression_str("a - b - c").unwrap();
        assert_eq!(expr.to_string(), "a - b - c");
        let Expr::Binary { left, .. } = &expr else {
            panic!("expected binary");
        };
        assert!(matches!(left.as_ref(), Expr::Binary { .. }));
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse_expression_str("name.where(use = 'official').given[0]").unwrap();
        assert_eq!(expr.to_string(), "name.where(use = 'official').given[0]");
        assert!(matches!(expr, Expr::Index { .. }));
    }

    #[test]
    fn test_unary_binds_tighter_than_infix() {
        let expr = parse_expression_str("-a.b + 1").unwrap();
        let Expr::Binary { left, .. } = &expr else {
            panic!("expected binary");
        };
        let Expr::Unary { operand, .. } = left.as_ref() else {
            panic!("expected unary");
        };
        assert!(matches!(operand.as_ref(), Expr::Member { .. }));
    }

    #[test]
    fn test_stops_at_foreign_tokens() {
        let mut stream = TokenStream::from_text("a.b check c.d");
        let expr = parse_expression(&mut stream).unwrap();
        assert_eq!(expr.to_string(), "a.b");
        assert_eq!(stream.peek_value(), Some("check"));

        let mut stream = TokenStream::from_text("x 'rule name';");
        parse_expression(&mut stream).unwrap();
        assert_eq!(stream.peek().map(|t| t.kind), Some(TokenKind::String));
    }

    #[test]
    fn test_literals_and_variables() {
        assert_eq!(
            parse_expression_str("3").unwrap(),
            Expr::Literal(Literal::Integer(3))
        );
        assert_eq!(
            parse_expression_str("3.5").unwrap(),
            Expr::Literal(Literal::Decimal(3.5))
        );
        assert_eq!(parse_expression_str("{}").unwrap(), Expr::Empty);
        assert_eq!(
            parse_expression_str("%vs").unwrap(),
            Expr::Variable("vs".into())
        );
        assert_eq!(
            parse_expression_str("(1 + 2) * 3").unwrap().to_string(),
            "(1 + 2) * 3"
        );
    }

    #[test]
    fn test_errors() {
        let err = parse_expression_str("a +").unwrap_err();
        assert_eq!(err.message, "Unexpected end of input");
        let err = parse_expression_str("a b").unwrap_err();
        assert_eq!(err.message, "Unexpected token: b");
        assert_eq!(err.column, Some(3));
        assert!(parse_expression_str("f(a, ").is_err());
    }
}
