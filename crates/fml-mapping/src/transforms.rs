//! Transform operations
//!
//! Built-in transforms that only need their resolved arguments. Each
//! argument is the collection a parameter resolved to; `evaluate` and
//! `translate` need the evaluation context and live in the runtime.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use fml_ir::{TypedValue, types};
use fml_model::TransformKind;
use serde_json::{Map, Value, json};
use tracing::debug;
use uuid::Uuid;

/// Text reported for an argument that was never supplied
pub(crate) const UNDEFINED: &str = "undefined";

/// Apply a transform to resolved arguments
///
/// # Errors
///
/// Returns [`Error::MissingTargetParameter`] when a required argument is
/// absent, [`Error::Transform`] when an argument has the wrong shape and
/// [`Error::UnsupportedTransform`] for transforms not handled here.
pub fn apply_transform(kind: &TransformKind, args: &[Vec<TypedValue>]) -> Result<Vec<TypedValue>> {
    match kind {
        TransformKind::Copy => Ok(transform_copy(args)),
        TransformKind::Truncate => transform_truncate(kind, args),
        TransformKind::Append => Ok(vec![transform_append(args)]),
        TransformKind::Cc => transform_cc(kind, args),
        TransformKind::Cast => transform_cast(kind, args),
        TransformKind::Create => Ok(vec![transform_create(args)]),
        TransformKind::Uuid => Ok(vec![TypedValue::string(Uuid::new_v4().to_string())]),
        TransformKind::Evaluate | TransformKind::Translate | TransformKind::Other(_) => {
            Err(Error::UnsupportedTransform(kind.to_string()))
        }
    }
}

/// The collection at `index`, or `Missing target parameter: undefined`
pub(crate) fn required<'a>(
    kind: &TransformKind,
    args: &'a [Vec<TypedValue>],
    index: usize,
) -> Result<&'a [TypedValue]> {
    args.get(index).map(Vec::as_slice).ok_or_else(|| {
        debug!(transform = %kind, argument = index + 1, "transform argument absent");
        Error::MissingTargetParameter(UNDEFINED.to_string())
    })
}

/// Text of the first value at `index`, if it has one
pub(crate) fn text_argument(
    kind: &TransformKind,
    args: &[Vec<TypedValue>],
    index: usize,
) -> Result<Option<String>> {
    Ok(required(kind, args, index)?.first().and_then(TypedValue::to_text))
}

/// Every resolved argument, in order
#[must_use]
pub fn transform_copy(args: &[Vec<TypedValue>]) -> Vec<TypedValue> {
    args.iter().flatten().cloned().collect()
}

/// Clamp a string to at most `length` characters; other values pass through
///
/// # Errors
///
/// Fails when the length is missing or not an integer.
pub fn transform_truncate(kind: &TransformKind, args: &[Vec<TypedValue>]) -> Result<Vec<TypedValue>> {
    let Some(value) = required(kind, args, 0)?.first() else {
        return Ok(Vec::new());
    };
    let length = required(kind, args, 1)?
        .first()
        .and_then(TypedValue::as_i64)
        .ok_or_else(|| Error::Transform("truncate length must be an integer".to_string()))?;
    let length = usize::try_from(length).unwrap_or(0);

    match &value.value {
        Value::String(text) => Ok(vec![TypedValue::new(
            value.type_name.clone(),
            Value::String(text.chars().take(length).collect()),
        )]),
        _ => Ok(vec![value.clone()]),
    }
}

/// Concatenate the text of every argument
#[must_use]
pub fn transform_append(args: &[Vec<TypedValue>]) -> TypedValue {
    let text: String = args
        .iter()
        .filter_map(|arg| arg.first().and_then(TypedValue::to_text))
        .collect();
    TypedValue::string(text)
}

/// `cc(text)` or `cc(system, code[, display])`
///
/// # Errors
///
/// Fails when called without arguments.
pub fn transform_cc(kind: &TransformKind, args: &[Vec<TypedValue>]) -> Result<Vec<TypedValue>> {
    let first = text_argument(kind, args, 0)?;
    let value = match args.len() {
        1 => json!({ "text": first }),
        _ => {
            let mut coding = Map::new();
            if let Some(system) = first {
                coding.insert("system".to_string(), Value::String(system));
            }
            if let Some(code) = text_argument(kind, args, 1)? {
                coding.insert("code".to_string(), Value::String(code));
            }
            if args.len() > 2 {
                if let Some(display) = text_argument(kind, args, 2)? {
                    coding.insert("display".to_string(), Value::String(display));
                }
            }
            json!({ "coding": [coding] })
        }
    };
    Ok(vec![TypedValue::new(types::CODEABLE_CONCEPT, value)])
}

/// New empty record, tagged with its resource type when one is given
#[must_use]
pub fn transform_create(args: &[Vec<TypedValue>]) -> TypedValue {
    match args.first().and_then(|arg| arg.first()).and_then(TypedValue::to_text) {
        Some(type_name) => TypedValue::new(type_name.clone(), json!({ "resourceType": type_name })),
        None => TypedValue::empty_record(types::BACKBONE_ELEMENT),
    }
}

const STRING_LIKE: [&str; 7] = ["string", "code", "id", "uri", "url", "canonical", "markdown"];

/// Coerce a value to a primitive type
///
/// # Errors
///
/// Fails for unknown type names and values that do not convert.
pub fn transform_cast(kind: &TransformKind, args: &[Vec<TypedValue>]) -> Result<Vec<TypedValue>> {
    let Some(value) = required(kind, args, 0)?.first() else {
        return Ok(Vec::new());
    };
    let type_name = text_argument(kind, args, 1)?
        .ok_or_else(|| Error::Transform("cast type must be a string".to_string()))?;
    let cast_error = || Error::Transform(format!("Cannot cast {} to {type_name}", value.value));

    let result = match type_name.as_str() {
        t if STRING_LIKE.contains(&t) => {
            TypedValue::new(t, Value::String(value.to_text().ok_or_else(cast_error)?))
        }
        types::INTEGER => match &value.value {
            Value::Number(n) if n.is_i64() => TypedValue::new(types::INTEGER, value.value.clone()),
            Value::String(s) => TypedValue::integer(s.trim().parse().map_err(|_| cast_error())?),
            _ => return Err(cast_error()),
        },
        types::DECIMAL => match &value.value {
            Value::Number(n) => TypedValue::decimal(n.as_f64().ok_or_else(cast_error)?),
            Value::String(s) => TypedValue::decimal(s.trim().parse().map_err(|_| cast_error())?),
            _ => return Err(cast_error()),
        },
        types::BOOLEAN => match &value.value {
            Value::Bool(b) => TypedValue::boolean(*b),
            Value::String(s) if s == "true" => TypedValue::boolean(true),
            Value::String(s) if s == "false" => TypedValue::boolean(false),
            _ => return Err(cast_error()),
        },
        types::DATE | types::DATE_TIME | "instant" | types::TIME => {
            let text = value.as_str().ok_or_else(cast_error)?;
            if !is_temporal(&type_name, text) {
                return Err(cast_error());
            }
            TypedValue::new(type_name.clone(), Value::String(text.to_string()))
        }
        other => return Err(Error::Transform(format!("Unsupported cast type: {other}"))),
    };

    Ok(vec![result])
}

fn is_temporal(type_name: &str, text: &str) -> bool {
    let date = || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok();
    let instant = || DateTime::parse_from_rfc3339(text).is_ok();
    let local = || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok();
    let time = || NaiveTime::parse_from_str(text, "%H:%M:%S%.f").is_ok();

    match type_name {
        types::DATE => date(),
        types::DATE_TIME => date() || instant() || local(),
        types::TIME => time(),
        _ => instant(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(value: TypedValue) -> Vec<TypedValue> {
        vec![value]
    }

    #[test]
    fn test_truncate() {
        let kind = TransformKind::Truncate;
        let result = apply_transform(
            &kind,
            &[one(TypedValue::string("abcdef")), one(TypedValue::integer(3))],
        )
        .unwrap();
        assert_eq!(result, vec![TypedValue::string("abc")]);

        let number = apply_transform(
            &kind,
            &[one(TypedValue::integer(12345)), one(TypedValue::integer(2))],
        )
        .unwrap();
        assert_eq!(number, vec![TypedValue::integer(12345)]);
    }

    #[test]
    fn test_truncate_missing_length() {
        let err = apply_transform(&TransformKind::Truncate, &[one(TypedValue::string("abc"))])
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing target parameter: undefined");
    }

    #[test]
    fn test_append() {
        let result = transform_append(&[
            one(TypedValue::string("a")),
            one(TypedValue::integer(1)),
            Vec::new(),
            one(TypedValue::string("b")),
        ]);
        assert_eq!(result, TypedValue::string("a1b"));
    }

    #[test]
    fn test_cc() {
        let kind = TransformKind::Cc;
        let text = apply_transform(&kind, &[one(TypedValue::string("Headache"))]).unwrap();
        assert_eq!(text[0].value, json!({"text": "Headache"}));

        let coded = apply_transform(
            &kind,
            &[
                one(TypedValue::string("http://loinc.org")),
                one(TypedValue::string("1234-5")),
                one(TypedValue::string("Thing")),
            ],
        )
        .unwrap();
        assert_eq!(coded[0].type_name, "CodeableConcept");
        assert_eq!(
            coded[0].value,
            json!({"coding": [{"system": "http://loinc.org", "code": "1234-5", "display": "Thing"}]})
        );

        assert_eq!(
            apply_transform(&kind, &[]).unwrap_err().to_string(),
            "Missing target parameter: undefined"
        );
    }

    #[test]
    fn test_cast() {
        let kind = TransformKind::Cast;
        let cast = |value: TypedValue, to: &str| {
            apply_transform(&kind, &[one(value), one(TypedValue::string(to))])
        };

        assert_eq!(
            cast(TypedValue::string("42"), "integer").unwrap(),
            vec![TypedValue::integer(42)]
        );
        assert_eq!(
            cast(TypedValue::integer(7), "string").unwrap(),
            vec![TypedValue::string("7")]
        );
        assert_eq!(
            cast(TypedValue::string("true"), "boolean").unwrap(),
            vec![TypedValue::boolean(true)]
        );
        assert_eq!(cast(TypedValue::string("1.5"), "decimal").unwrap()[0].as_f64(), Some(1.5));
        assert_eq!(
            cast(TypedValue::string("2020-02-29"), "date").unwrap()[0].type_name,
            "date"
        );
        assert!(cast(TypedValue::string("2020-02-30"), "date").is_err());
        assert!(cast(TypedValue::string("2020-01-01T10:00:00Z"), "instant").is_ok());
        assert!(cast(TypedValue::string("10:15:00"), "time").is_ok());
        assert!(cast(TypedValue::string("abc"), "integer").is_err());

        let err = cast(TypedValue::string("x"), "Quantity").unwrap_err();
        assert_eq!(err.to_string(), "Transform error: Unsupported cast type: Quantity");
    }

    #[test]
    fn test_create() {
        let patient = transform_create(&[one(TypedValue::string("Patient"))]);
        assert_eq!(patient.type_name, "Patient");
        assert_eq!(patient.value, json!({"resourceType": "Patient"}));

        let backbone = transform_create(&[]);
        assert_eq!(backbone.type_name, "BackboneElement");
        assert_eq!(backbone.value, json!({}));
    }

    #[test]
    fn test_uuid_is_fresh() {
        let a = apply_transform(&TransformKind::Uuid, &[]).unwrap();
        let b = apply_transform(&TransformKind::Uuid, &[]).unwrap();
        assert_ne!(a, b);
        assert_eq!(a[0].as_str().map(str::len), Some(36));
    }

    #[test]
    fn test_unsupported() {
        let err = apply_transform(&TransformKind::Other("dateOp".into()), &[]).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported transform: dateOp");
    }
}
