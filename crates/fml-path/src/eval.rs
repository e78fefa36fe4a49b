//! Path expression evaluation
//!
//! [`PathEvaluator`] is the seam the mapping interpreter evaluates `where`,
//! `check`, `log` and `evaluate(...)` expressions through. The default
//! [`FhirPathEvaluator`] covers the expression subset rules need: property
//! navigation with choice-type fallback, variables, the usual operators with
//! three-valued boolean logic, and a fixed function library.

use crate::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::parser::parse_expression_str;
use crate::{Error, Result};
use dashmap::DashMap;
use fml_ir::{TypedValue, types};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Named variable bindings visible to an expression
pub type Variables = HashMap<String, Vec<TypedValue>>;

/// Evaluates path expressions against typed values
pub trait PathEvaluator {
    /// Evaluate `expression` with `context` as the focus
    ///
    /// Bare identifiers resolve against `variables` first and then navigate
    /// the context.
    ///
    /// # Errors
    ///
    /// Fails when the expression does not parse or cannot be evaluated.
    fn evaluate(
        &self,
        expression: &str,
        context: &[TypedValue],
        variables: &Variables,
    ) -> Result<Vec<TypedValue>>;
}

/// Truthiness of an evaluation result: the first value decides, empty is false
#[must_use]
pub fn to_boolean(values: &[TypedValue]) -> bool {
    values.first().is_some_and(TypedValue::is_truthy)
}

/// Default evaluator with a per-instance parsed expression cache
#[derive(Debug, Default)]
pub struct FhirPathEvaluator {
    cache: DashMap<String, Arc<Expr>>,
}

impl FhirPathEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an expression, reusing a cached AST when available
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for malformed expressions.
    pub fn compile(&self, expression: &str) -> Result<Arc<Expr>> {
        if let Some(cached) = self.cache.get(expression) {
            trace!(expression, "Expression cache hit");
            return Ok(Arc::clone(cached.value()));
        }

        let parsed = Arc::new(parse_expression_str(expression)?);
        self.cache
            .insert(expression.to_string(), Arc::clone(&parsed));
        trace!(expression, "Expression compiled");
        Ok(parsed)
    }

    /// Number of distinct expressions parsed so far
    #[must_use]
    pub fn cached_expressions(&self) -> usize {
        self.cache.len()
    }

    /// Evaluate an already parsed expression
    ///
    /// # Errors
    ///
    /// Fails on type errors, unknown functions or undefined `%` variables.
    pub fn evaluate_expr(
        &self,
        expr: &Expr,
        context: &[TypedValue],
        variables: &Variables,
    ) -> Result<Vec<TypedValue>> {
        let env = Env {
            variables,
            context,
            this: None,
        };
        eval(expr, &env)
    }
}

impl PathEvaluator for FhirPathEvaluator {
    fn evaluate(
        &self,
        expression: &str,
        context: &[TypedValue],
        variables: &Variables,
    ) -> Result<Vec<TypedValue>> {
        let expr = self.compile(expression)?;
        self.evaluate_expr(&expr, context, variables)
    }
}

struct Env<'a> {
    variables: &'a Variables,
    context: &'a [TypedValue],
    this: Option<&'a TypedValue>,
}

impl Env<'_> {
    /// Environment for one iteration of `where`, `select`, `all`, ...
    fn with_item<'b>(&'b self, item: &'b TypedValue) -> Env<'b> {
        Env {
            variables: self.variables,
            context: std::slice::from_ref(item),
            this: Some(item),
        }
    }
}

fn eval(expr: &Expr, env: &Env<'_>) -> Result<Vec<TypedValue>> {
    match expr {
        Expr::Literal(literal) => Ok(vec![literal_value(literal)]),
        Expr::Empty => Ok(Vec::new()),
        Expr::Group(inner) => eval(inner, env),
        Expr::Symbol(name) => Ok(resolve_symbol(name, env)),
        Expr::Variable(name) => env
            .variables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UndefinedVariable(name.clone())),
        Expr::Member { base, name } => {
            let focus = eval(base, env)?;
            Ok(focus.iter().flat_map(|item| item.property(name)).collect())
        }
        Expr::Index { base, index } => {
            let focus = eval(base, env)?;
            let position = eval(index, env)?;
            Ok(position
                .first()
                .and_then(TypedValue::as_i64)
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| focus.get(i).cloned())
                .into_iter()
                .collect())
        }
        Expr::Function { base, name, args } => {
            let focus = match base {
                Some(base) => eval(base, env)?,
                None => env.context.to_vec(),
            };
            call_function(name, &focus, args, env)
        }
        Expr::Unary { op, operand } => {
            let values = eval(operand, env)?;
            negate(*op, values)
        }
        Expr::Binary {
            op: BinaryOp::Is,
            left,
            right,
        } => {
            let values = eval(left, env)?;
            let Some(value) = single(&values)? else {
                return Ok(Vec::new());
            };
            let name = type_name_arg(right)?;
            Ok(vec![TypedValue::boolean(type_matches(value, name))])
        }
        Expr::Binary { op, left, right } => {
            let lhs = eval(left, env)?;
            let rhs = eval(right, env)?;
            binary(*op, &lhs, &rhs)
        }
    }
}

fn literal_value(literal: &Literal) -> TypedValue {
    match literal {
        Literal::String(s) => TypedValue::string(s.clone()),
        Literal::Integer(i) => TypedValue::integer(*i),
        Literal::Decimal(d) => TypedValue::decimal(*d),
        Literal::Boolean(b) => TypedValue::boolean(*b),
        Literal::DateTime(text) => {
            if let Some(time) = text.strip_prefix('T') {
                TypedValue::new(types::TIME, Value::String(time.to_string()))
            } else if text.contains('T') {
                TypedValue::date_time(text.clone())
            } else {
                TypedValue::new(types::DATE, Value::String(text.clone()))
            }
        }
    }
}

fn resolve_symbol(name: &str, env: &Env<'_>) -> Vec<TypedValue> {
    if name == "$this" {
        return env
            .this
            .map_or_else(|| env.context.to_vec(), |item| vec![item.clone()]);
    }
    if let Some(bound) = env.variables.get(name) {
        return bound.clone();
    }
    env.context
        .iter()
        .flat_map(|item| {
            if name.starts_with(char::is_uppercase) && item.type_name == name {
                vec![item.clone()]
            } else {
                item.property(name)
            }
        })
        .collect()
}

fn single(values: &[TypedValue]) -> Result<Option<&TypedValue>> {
    match values {
        [] => Ok(None),
        [value] => Ok(Some(value)),
        _ => Err(Error::evaluation(format!(
            "Expected a single value, got {}",
            values.len()
        ))),
    }
}

fn truth(values: &[TypedValue]) -> Option<bool> {
    (!values.is_empty()).then(|| to_boolean(values))
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Integer(i64),
    Decimal(f64),
}

impl Num {
    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Self::Integer(i) => i as f64,
            Self::Decimal(d) => d,
        }
    }
}

fn number(value: &TypedValue) -> Option<Num> {
    match &value.value {
        Value::Number(n) => n
            .as_i64()
            .map(Num::Integer)
            .or_else(|| n.as_f64().map(Num::Decimal)),
        _ => None,
    }
}

fn negate(op: UnaryOp, values: Vec<TypedValue>) -> Result<Vec<TypedValue>> {
    if op == UnaryOp::Plus {
        return Ok(values);
    }
    let Some(value) = single(&values)? else {
        return Ok(Vec::new());
    };
    match number(value) {
        Some(Num::Integer(i)) => i
            .checked_neg()
            .map(|n| vec![TypedValue::integer(n)])
            .ok_or_else(|| Error::evaluation("Integer overflow")),
        Some(Num::Decimal(d)) => Ok(vec![TypedValue::decimal(-d)]),
        None => Err(Error::evaluation(format!(
            "Cannot negate a {}",
            value.type_name
        ))),
    }
}

fn binary(op: BinaryOp, lhs: &[TypedValue], rhs: &[TypedValue]) -> Result<Vec<TypedValue>> {
    match op {
        BinaryOp::And | BinaryOp::Or | BinaryOp::Xor | BinaryOp::Implies => {
            Ok(logic(op, truth(lhs), truth(rhs)))
        }
        BinaryOp::Equal | BinaryOp::NotEqual => {
            if lhs.is_empty() || rhs.is_empty() {
                return Ok(Vec::new());
            }
            let equal = lhs.len() == rhs.len()
                && lhs
                    .iter()
                    .zip(rhs)
                    .all(|(a, b)| values_equal(&a.value, &b.value));
            Ok(vec![TypedValue::boolean(equal == (op == BinaryOp::Equal))])
        }
        BinaryOp::Equivalent | BinaryOp::NotEquivalent => {
            let equivalent = lhs.len() == rhs.len()
                && lhs
                    .iter()
                    .zip(rhs)
                    .all(|(a, b)| values_equivalent(&a.value, &b.value));
            Ok(vec![TypedValue::boolean(
                equivalent == (op == BinaryOp::Equivalent),
            )])
        }
        BinaryOp::Less | BinaryOp::Greater | BinaryOp::LessOrEqual | BinaryOp::GreaterOrEqual => {
            compare(op, lhs, rhs)
        }
        BinaryOp::Union => {
            let mut out = Vec::new();
            for value in lhs.iter().chain(rhs) {
                push_distinct(&mut out, value);
            }
            Ok(out)
        }
        BinaryOp::In => membership(lhs, rhs),
        BinaryOp::Contains => membership(rhs, lhs),
        BinaryOp::Concat => {
            let left = single(lhs)?.and_then(TypedValue::to_text).unwrap_or_default();
            let right = single(rhs)?.and_then(TypedValue::to_text).unwrap_or_default();
            Ok(vec![TypedValue::string(left + &right)])
        }
        BinaryOp::Add
        | BinaryOp::Subtract
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::Div
        | BinaryOp::Mod => arithmetic(op, lhs, rhs),
        BinaryOp::Is => Err(Error::evaluation("'is' requires a type specifier")),
    }
}

fn logic(op: BinaryOp, left: Option<bool>, right: Option<bool>) -> Vec<TypedValue> {
    let result = match op {
        BinaryOp::And => match (left, right) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BinaryOp::Or => match (left, right) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        BinaryOp::Xor => match (left, right) {
            (Some(a), Some(b)) => Some(a != b),
            _ => None,
        },
        _ => match (left, right) {
            (Some(false), _) | (_, Some(true)) => Some(true),
            (Some(true), other) => other,
            (None, _) => None,
        },
    };
    result.map(TypedValue::boolean).into_iter().collect()
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
            _ => false,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| values_equal(value, other)))
        }
        _ => a == b,
    }
}

fn values_equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => normalize(x) == normalize(y),
        _ => values_equal(a, b),
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn push_distinct(out: &mut Vec<TypedValue>, value: &TypedValue) {
    if !out.iter().any(|o| values_equal(&o.value, &value.value)) {
        out.push(value.clone());
    }
}

fn compare(op: BinaryOp, lhs: &[TypedValue], rhs: &[TypedValue]) -> Result<Vec<TypedValue>> {
    let (Some(a), Some(b)) = (single(lhs)?, single(rhs)?) else {
        return Ok(Vec::new());
    };
    let ordering = match (&a.value, &b.value) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return Err(Error::evaluation(format!(
            "Cannot compare {} with {}",
            a.type_name, b.type_name
        )));
    };
    let result = match op {
        BinaryOp::Less => ordering.is_lt(),
        BinaryOp::Greater => ordering.is_gt(),
        BinaryOp::LessOrEqual => ordering.is_le(),
        _ => ordering.is_ge(),
    };
    Ok(vec![TypedValue::boolean(result)])
}

fn membership(item: &[TypedValue], collection: &[TypedValue]) -> Result<Vec<TypedValue>> {
    let Some(item) = single(item)? else {
        return Ok(Vec::new());
    };
    let found = collection
        .iter()
        .any(|candidate| values_equal(&candidate.value, &item.value));
    Ok(vec![TypedValue::boolean(found)])
}

fn arithmetic(op: BinaryOp, lhs: &[TypedValue], rhs: &[TypedValue]) -> Result<Vec<TypedValue>> {
    let (Some(a), Some(b)) = (single(lhs)?, single(rhs)?) else {
        return Ok(Vec::new());
    };

    if op == BinaryOp::Add {
        if let (Value::String(x), Value::String(y)) = (&a.value, &b.value) {
            return Ok(vec![TypedValue::string(format!("{x}{y}"))]);
        }
    }

    let (Some(x), Some(y)) = (number(a), number(b)) else {
        return Err(Error::evaluation(format!(
            "Cannot apply '{}' to {} and {}",
            op.as_str(),
            a.type_name,
            b.type_name
        )));
    };

    match (x, y) {
        (Num::Integer(x), Num::Integer(y)) if op != BinaryOp::Divide => integer_op(op, x, y),
        _ => Ok(decimal_op(op, x.as_f64(), y.as_f64())),
    }
}

fn integer_op(op: BinaryOp, x: i64, y: i64) -> Result<Vec<TypedValue>> {
    let result = match op {
        BinaryOp::Add => x.checked_add(y),
        BinaryOp::Subtract => x.checked_sub(y),
        BinaryOp::Multiply => x.checked_mul(y),
        BinaryOp::Div if y == 0 => return Ok(Vec::new()),
        BinaryOp::Div => x.checked_div(y),
        BinaryOp::Mod if y == 0 => return Ok(Vec::new()),
        BinaryOp::Mod => x.checked_rem(y),
        _ => return Err(Error::evaluation(format!("Unsupported operator '{}'", op.as_str()))),
    };
    result
        .map(|n| vec![TypedValue::integer(n)])
        .ok_or_else(|| Error::evaluation("Integer overflow"))
}

fn decimal_op(op: BinaryOp, x: f64, y: f64) -> Vec<TypedValue> {
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Subtract => x - y,
        BinaryOp::Multiply => x * y,
        _ if y == 0.0 => return Vec::new(),
        BinaryOp::Div => (x / y).trunc(),
        BinaryOp::Mod => x % y,
        _ => x / y,
    };
    vec![TypedValue::decimal(result)]
}

fn type_matches(value: &TypedValue, name: &str) -> bool {
    value.type_name == name || value.type_name.eq_ignore_ascii_case(name)
}

fn type_name_arg(expr: &Expr) -> Result<&str> {
    expr.type_specifier()
        .ok_or_else(|| Error::evaluation(format!("Invalid type specifier: {expr}")))
}

fn arity(name: &str, args: &[Expr], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(Error::Arity {
            name: name.to_string(),
            got: args.len(),
        });
    }
    Ok(())
}

fn count_arg(name: &str, values: &[TypedValue]) -> Result<usize> {
    values
        .first()
        .and_then(TypedValue::as_i64)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| {
            Error::evaluation(format!("{name}() requires a non-negative integer argument"))
        })
}

fn text_arg(values: &[TypedValue]) -> Result<String> {
    Ok(single(values)?
        .and_then(TypedValue::to_text)
        .unwrap_or_default())
}

fn map_single(
    focus: &[TypedValue],
    convert: impl Fn(&TypedValue) -> Option<TypedValue>,
) -> Result<Vec<TypedValue>> {
    Ok(single(focus)?.and_then(convert).into_iter().collect())
}

fn filter(focus: &[TypedValue], criteria: &Expr, env: &Env<'_>) -> Result<Vec<TypedValue>> {
    let mut out = Vec::new();
    for item in focus {
        if to_boolean(&eval(criteria, &env.with_item(item))?) {
            out.push(item.clone());
        }
    }
    Ok(out)
}

fn count(len: usize) -> TypedValue {
    TypedValue::integer(i64::try_from(len).unwrap_or(i64::MAX))
}

fn call_function(
    name: &str,
    focus: &[TypedValue],
    args: &[Expr],
    env: &Env<'_>,
) -> Result<Vec<TypedValue>> {
    let arg = |index: usize| eval(&args[index], env);

    match name {
        "empty" => {
            arity(name, args, 0, 0)?;
            Ok(vec![TypedValue::boolean(focus.is_empty())])
        }
        "exists" => {
            arity(name, args, 0, 1)?;
            let found = match args.first() {
                Some(criteria) => !filter(focus, criteria, env)?.is_empty(),
                None => !focus.is_empty(),
            };
            Ok(vec![TypedValue::boolean(found)])
        }
        "all" => {
            arity(name, args, 1, 1)?;
            for item in focus {
                if !to_boolean(&eval(&args[0], &env.with_item(item))?) {
                    return Ok(vec![TypedValue::boolean(false)]);
                }
            }
            Ok(vec![TypedValue::boolean(true)])
        }
        "where" => {
            arity(name, args, 1, 1)?;
            filter(focus, &args[0], env)
        }
        "select" => {
            arity(name, args, 1, 1)?;
            let mut out = Vec::new();
            for item in focus {
                out.extend(eval(&args[0], &env.with_item(item))?);
            }
            Ok(out)
        }
        "first" => {
            arity(name, args, 0, 0)?;
            Ok(focus.first().cloned().into_iter().collect())
        }
        "last" => {
            arity(name, args, 0, 0)?;
            Ok(focus.last().cloned().into_iter().collect())
        }
        "tail" => {
            arity(name, args, 0, 0)?;
            Ok(focus.iter().skip(1).cloned().collect())
        }
        "skip" => {
            arity(name, args, 1, 1)?;
            let n = count_arg(name, &arg(0)?)?;
            Ok(focus.iter().skip(n).cloned().collect())
        }
        "take" => {
            arity(name, args, 1, 1)?;
            let n = count_arg(name, &arg(0)?)?;
            Ok(focus.iter().take(n).cloned().collect())
        }
        "count" => {
            arity(name, args, 0, 0)?;
            Ok(vec![count(focus.len())])
        }
        "distinct" => {
            arity(name, args, 0, 0)?;
            let mut out = Vec::new();
            for value in focus {
                push_distinct(&mut out, value);
            }
            Ok(out)
        }
        "not" => {
            arity(name, args, 0, 0)?;
            Ok(truth(focus)
                .map(|b| TypedValue::boolean(!b))
                .into_iter()
                .collect())
        }
        "hasValue" => {
            arity(name, args, 0, 0)?;
            let has_value = matches!(focus, [value] if !value.is_record() && !value.value.is_null());
            Ok(vec![TypedValue::boolean(has_value)])
        }
        "iif" => {
            arity(name, args, 2, 3)?;
            if to_boolean(&arg(0)?) {
                arg(1)
            } else if args.len() > 2 {
                arg(2)
            } else {
                Ok(Vec::new())
            }
        }
        "ofType" => {
            arity(name, args, 1, 1)?;
            let type_name = type_name_arg(&args[0])?;
            Ok(focus
                .iter()
                .filter(|value| type_matches(value, type_name))
                .cloned()
                .collect())
        }
        "join" => {
            arity(name, args, 0, 1)?;
            let separator = match args.first() {
                Some(_) => text_arg(&arg(0)?)?,
                None => String::new(),
            };
            let parts: Vec<String> = focus.iter().filter_map(TypedValue::to_text).collect();
            Ok(vec![TypedValue::string(parts.join(&separator))])
        }
        "toString" => {
            arity(name, args, 0, 0)?;
            map_single(focus, |value| value.to_text().map(TypedValue::string))
        }
        "toInteger" => {
            arity(name, args, 0, 0)?;
            map_single(focus, |value| to_integer(value).map(TypedValue::integer))
        }
        "toDecimal" => {
            arity(name, args, 0, 0)?;
            map_single(focus, |value| to_decimal(value).map(TypedValue::decimal))
        }
        "length" | "upper" | "lower" | "trim" | "startsWith" | "endsWith" | "contains"
        | "matches" | "replace" | "substring" | "indexOf" => {
            let Some(text) = single(focus)?.and_then(TypedValue::to_text) else {
                return Ok(Vec::new());
            };
            string_function(name, &text, args, env)
        }
        _ => Err(Error::UnknownFunction(name.to_string())),
    }
}

fn string_function(name: &str, text: &str, args: &[Expr], env: &Env<'_>) -> Result<Vec<TypedValue>> {
    let arg = |index: usize| eval(&args[index], env);

    let value = match name {
        "length" => {
            arity(name, args, 0, 0)?;
            count(text.chars().count())
        }
        "upper" => {
            arity(name, args, 0, 0)?;
            TypedValue::string(text.to_uppercase())
        }
        "lower" => {
            arity(name, args, 0, 0)?;
            TypedValue::string(text.to_lowercase())
        }
        "trim" => {
            arity(name, args, 0, 0)?;
            TypedValue::string(text.trim())
        }
        "startsWith" => {
            arity(name, args, 1, 1)?;
            TypedValue::boolean(text.starts_with(&text_arg(&arg(0)?)?))
        }
        "endsWith" => {
            arity(name, args, 1, 1)?;
            TypedValue::boolean(text.ends_with(&text_arg(&arg(0)?)?))
        }
        "contains" => {
            arity(name, args, 1, 1)?;
            TypedValue::boolean(text.contains(&text_arg(&arg(0)?)?))
        }
        "matches" => {
            arity(name, args, 1, 1)?;
            let pattern = text_arg(&arg(0)?)?;
            let regex = Regex::new(&pattern).map_err(|e| Error::InvalidRegex {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            TypedValue::boolean(regex.is_match(text))
        }
        "replace" => {
            arity(name, args, 2, 2)?;
            let pattern = text_arg(&arg(0)?)?;
            let substitution = text_arg(&arg(1)?)?;
            TypedValue::string(text.replace(&pattern, &substitution))
        }
        "substring" => {
            arity(name, args, 1, 2)?;
            let start = count_arg(name, &arg(0)?)?;
            if start >= text.chars().count() {
                return Ok(Vec::new());
            }
            let length = match args.get(1) {
                Some(_) => count_arg(name, &arg(1)?)?,
                None => usize::MAX,
            };
            TypedValue::string(text.chars().skip(start).take(length).collect::<String>())
        }
        "indexOf" => {
            arity(name, args, 1, 1)?;
            let needle = text_arg(&arg(0)?)?;
            match text.find(&needle) {
                Some(byte) => count(text[..byte].chars().count()),
                None => TypedValue::integer(-1),
            }
        }
        _ => return Err(Error::UnknownFunction(name.to_string())),
    };

    Ok(vec![value])
}

fn to_integer(value: &TypedValue) -> Option<i64> {
    match &value.value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn to_decimal(value: &TypedValue) -> Option<f64> {
    match &value.value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(expression: &str, context: Value) -> Vec<TypedValue> {
        FhirPathEvaluator::new()
            .evaluate(expression, &[TypedValue::from_json(context)], &Variables::new())
            .unwrap()
    }

    fn json_values(values: &[TypedValue]) -> Vec<Value> {
        values.iter().map(|v| v.value.clone()).collect()
    }

    #[test]
    fn test_navigation() {
        let patient = json!({
            "resourceType": "Patient",
            "name": [{"given": ["a", "b"]}, {"given": ["c"]}]
        });
        assert_eq!(json_values(&run("name.given", patient.clone())), vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(json_values(&run("Patient.name.given.count()", patient.clone())), vec![json!(3)]);
        assert_eq!(json_values(&run("name.given[1]", patient)), vec![json!("b")]);
    }

    #[test]
    fn test_variables_resolve_before_navigation() {
        let evaluator = FhirPathEvaluator::new();
        let mut variables = Variables::new();
        variables.insert("a".to_string(), vec![TypedValue::string("bound")]);
        let result = evaluator
            .evaluate("a", &[TypedValue::from_json(json!({"a": "navigated"}))], &variables)
            .unwrap();
        assert_eq!(result[0].as_str(), Some("bound"));

        let result = evaluator.evaluate("%a & '!'", &[], &variables).unwrap();
        assert_eq!(result[0].as_str(), Some("bound!"));

        let err = evaluator.evaluate("%missing", &[], &variables).unwrap_err();
        assert_eq!(err, Error::UndefinedVariable("missing".to_string()));
    }

    #[test]
    fn test_where_and_select() {
        let context = json!({"item": [{"code": "x", "n": 1}, {"code": "y", "n": 2}]});
        assert_eq!(json_values(&run("item.where(code = 'y').n", context.clone())), vec![json!(2)]);
        assert_eq!(json_values(&run("item.select(n * 10)", context.clone())), vec![json!(10), json!(20)]);
        assert_eq!(json_values(&run("item.all(n > 0)", context.clone())), vec![json!(true)]);
        assert_eq!(json_values(&run("item.exists(code = 'z')", context)), vec![json!(false)]);
    }

    #[test]
    fn test_three_valued_logic() {
        let context = json!({"t": true, "f": false});
        assert_eq!(json_values(&run("t and missing", context.clone())), Vec::<Value>::new());
        assert_eq!(json_values(&run("f and missing", context.clone())), vec![json!(false)]);
        assert_eq!(json_values(&run("t or missing", context.clone())), vec![json!(true)]);
        assert_eq!(json_values(&run("f implies missing", context.clone())), vec![json!(true)]);
        assert_eq!(json_values(&run("t xor f", context)), vec![json!(true)]);
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let context = json!({});
        assert_eq!(json_values(&run("1 + 2 * 3", context.clone())), vec![json!(7)]);
        assert_eq!(json_values(&run("7 div 2", context.clone())), vec![json!(3)]);
        assert_eq!(json_values(&run("7 mod 2", context.clone())), vec![json!(1)]);
        assert_eq!(json_values(&run("1 / 0", context.clone())), Vec::<Value>::new());
        assert_eq!(json_values(&run("1.5 + 1", context.clone())), vec![json!(2.5)]);
        assert_eq!(json_values(&run("'a' + 'b'", context.clone())), vec![json!("ab")]);
        assert_eq!(json_values(&run("2 >= 2", context.clone())), vec![json!(true)]);
        assert_eq!(json_values(&run("'abc' < 'abd'", context.clone())), vec![json!(true)]);
        assert_eq!(json_values(&run("-(3)", context)), vec![json!(-3)]);
    }

    #[test]
    fn test_string_functions() {
        let context = json!({"s": "  Hello World  "});
        assert_eq!(json_values(&run("s.trim().upper()", context.clone())), vec![json!("HELLO WORLD")]);
        assert_eq!(json_values(&run("s.trim().substring(6, 3)", context.clone())), vec![json!("Wor")]);
        assert_eq!(json_values(&run("s.trim().indexOf('World')", context.clone())), vec![json!(6)]);
        assert_eq!(json_values(&run("s.matches('H.*d')", context.clone())), vec![json!(true)]);
        assert_eq!(json_values(&run("s.trim().replace('World', 'There')", context.clone())), vec![json!("Hello There")]);
        assert_eq!(json_values(&run("s ~ 'hello world'", context)), vec![json!(true)]);
    }

    #[test]
    fn test_collections() {
        let context = json!({"a": [1, 2, 2, 3]});
        assert_eq!(json_values(&run("a.distinct().count()", context.clone())), vec![json!(3)]);
        assert_eq!(json_values(&run("a.tail().first()", context.clone())), vec![json!(2)]);
        assert_eq!(json_values(&run("a.skip(1).take(2)", context.clone())), vec![json!(2), json!(2)]);
        assert_eq!(json_values(&run("(a | a).count()", context.clone())), vec![json!(3)]);
        assert_eq!(json_values(&run("3 in a", context.clone())), vec![json!(true)]);
        assert_eq!(json_values(&run("a.empty()", context.clone())), vec![json!(false)]);
        assert_eq!(json_values(&run("iif(a.exists(), 'yes', 'no')", context)), vec![json!("yes")]);
    }

    #[test]
    fn test_conversions() {
        let context = json!({"n": "42", "d": "1.5"});
        assert_eq!(json_values(&run("n.toInteger() + 1", context.clone())), vec![json!(43)]);
        assert_eq!(json_values(&run("d.toDecimal()", context.clone())), vec![json!(1.5)]);
        assert_eq!(json_values(&run("(1).toString()", context.clone())), vec![json!("1")]);
        assert_eq!(json_values(&run("n is string", context)), vec![json!(true)]);
    }

    #[test]
    fn test_errors_and_cache() {
        let evaluator = FhirPathEvaluator::new();
        let err = evaluator.evaluate("nope()", &[], &Variables::new()).unwrap_err();
        assert_eq!(err, Error::UnknownFunction("nope".to_string()));
        assert!(matches!(
            evaluator.evaluate("a +", &[], &Variables::new()),
            Err(Error::Parse(_))
        ));

        evaluator.evaluate("1 + 1", &[], &Variables::new()).unwrap();
        evaluator.evaluate("1 + 1", &[], &Variables::new()).unwrap();
        assert_eq!(evaluator.cached_expressions(), 2);
    }

    #[test]
    fn test_to_boolean() {
        assert!(!to_boolean(&[]));
        assert!(to_boolean(&[TypedValue::boolean(true)]));
        assert!(!to_boolean(&[TypedValue::boolean(false)]));
        assert!(to_boolean(&[TypedValue::string("x")]));
    }
}
