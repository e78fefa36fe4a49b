//! Expression AST
//!
//! `Display` renders an expression back to canonical source text that the
//! parser accepts again. Mapping documents store embedded expressions in
//! this form.

use std::fmt;

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    /// Date, date-time or time text without the `@` prefix
    DateTime(String),
}

/// Prefix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

/// Infix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Implies,
    Or,
    Xor,
    And,
    In,
    Contains,
    Equal,
    NotEqual,
    Equivalent,
    NotEquivalent,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Is,
    Union,
    Add,
    Subtract,
    Concat,
    Multiply,
    Divide,
    Div,
    Mod,
}

impl BinaryOp {
    /// Look up an infix operator by its token text
    #[must_use]
    pub fn from_token(text: &str) -> Option<Self> {
        let op = match text {
            "implies" => Self::Implies,
            "or" => Self::Or,
            "xor" => Self::Xor,
            "and" => Self::And,
            "in" => Self::In,
            "contains" => Self::Contains,
            "=" => Self::Equal,
            "!=" => Self::NotEqual,
            "~" => Self::Equivalent,
            "!~" => Self::NotEquivalent,
            "<" => Self::Less,
            ">" => Self::Greater,
            "<=" => Self::LessOrEqual,
            ">=" => Self::GreaterOrEqual,
            "is" => Self::Is,
            "|" => Self::Union,
            "+" => Self::Add,
            "-" => Self::Subtract,
            "&" => Self::Concat,
            "*" => Self::Multiply,
            "/" => Self::Divide,
            "div" => Self::Div,
            "mod" => Self::Mod,
            _ => return None,
        };
        Some(op)
    }

    /// Left binding power; higher binds tighter
    #[must_use]
    pub fn binding_power(self) -> u8 {
        match self {
            Self::Implies => 1,
            Self::Or | Self::Xor => 2,
            Self::And => 3,
            Self::In | Self::Contains => 4,
            Self::Equal | Self::NotEqual | Self::Equivalent | Self::NotEquivalent => 5,
            Self::Less | Self::Greater | Self::LessOrEqual | Self::GreaterOrEqual | Self::Is => 6,
            Self::Union => 7,
            Self::Add | Self::Subtract | Self::Concat => 9,
            Self::Multiply | Self::Divide | Self::Div | Self::Mod => 10,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Implies => "implies",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::And => "and",
            Self::In => "in",
            Self::Contains => "contains",
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Equivalent => "~",
            Self::NotEquivalent => "!~",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessOrEqual => "<=",
            Self::GreaterOrEqual => ">=",
            Self::Is => "is",
            Self::Union => "|",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Concat => "&",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Div => "div",
            Self::Mod => "mod",
        }
    }
}

/// Parsed path expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// The empty collection `{}`
    Empty,
    /// Identifier: a variable or a property of the focus (also `$this`)
    Symbol(String),
    /// `%name`
    Variable(String),
    /// `base.name`
    Member { base: Box<Expr>, name: String },
    /// `base[index]`
    Index { base: Box<Expr>, index: Box<Expr> },
    /// `name(args)` or `base.name(args)`
    Function {
        base: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Parenthesised sub-expression
    Group(Box<Expr>),
}

impl Expr {
    /// Simple type name carried by a type specifier expression
    /// (`Patient`, `FHIR.Patient`)
    #[must_use]
    pub fn type_specifier(&self) -> Option<&str> {
        match self {
            Self::Symbol(name)
            | Self::Member { name, .. }
            | Self::Literal(Literal::String(name)) => Some(name.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => {
                f.write_str("'")?;
                for c in s.chars() {
                    match c {
                        '\'' => f.write_str("\\'")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\r' => f.write_str("\\r")?,
                        '\t' => f.write_str("\\t")?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("'")
            }
            Self::Integer(i) => write!(f, "{i}"),
            Self::Decimal(d) if d.fract() == 0.0 && d.is_finite() => write!(f, "{d:.1}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::DateTime(s) => write!(f, "@{s}"),
        }
    }
}

fn write_symbol(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    let mut chars = name.chars();
    let plain = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_');
    if plain {
        f.write_str(name)
    } else {
        write!(f, "`{name}`")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(literal) => write!(f, "{literal}"),
            Self::Empty => f.write_str("{}"),
            Self::Symbol(name) => write_symbol(f, name),
            Self::Variable(name) => write!(f, "%{name}"),
            Self::Member { base, name } => {
                write!(f, "{base}.")?;
                write_symbol(f, name)
            }
            Self::Index { base, index } => write!(f, "{base}[{index}]"),
            Self::Function { base, name, args } => {
                if let Some(base) = base {
                    write!(f, "{base}.")?;
                }
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Self::Unary { op, operand } => match op {
                UnaryOp::Plus => write!(f, "+{operand}"),
                UnaryOp::Minus => write!(f, "-{operand}"),
            },
            Self::Binary { op, left, right } => write!(f, "{left} {} {right}", op.as_str()),
            Self::Group(inner) => write!(f, "({inner})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_powers_ordered() {
        assert!(BinaryOp::Multiply.binding_power() > BinaryOp::Add.binding_power());
        assert!(BinaryOp::Add.binding_power() > BinaryOp::Equal.binding_power());
        assert!(BinaryOp::And.binding_power() > BinaryOp::Or.binding_power());
        assert_eq!(BinaryOp::from_token("div"), Some(BinaryOp::Div));
        assert_eq!(BinaryOp::from_token("then"), None);
    }

    #[test]
    fn test_display_literals() {
        assert_eq!(Literal::String("it's".into()).to_string(), "'it\\'s'");
        assert_eq!(Literal::Decimal(2.0).to_string(), "2.0");
        assert_eq!(Literal::Decimal(1.25).to_string(), "1.25");
        assert_eq!(Literal::DateTime("2020-01-01".into()).to_string(), "@2020-01-01");
    }

    #[test]
    fn test_display_quotes_odd_symbols() {
        let expr = Expr::Member {
            base: Box::new(Expr::Symbol("a".into())),
            name: "weird name".into(),
        };
        assert_eq!(expr.to_string(), "a.`weird name`");
    }
}
