//! Typed values flowing through a map

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Well-known type names used when tagging values
pub mod types {
    pub const STRING: &str = "string";
    pub const BOOLEAN: &str = "boolean";
    pub const INTEGER: &str = "integer";
    pub const DECIMAL: &str = "decimal";
    pub const DATE: &str = "date";
    pub const DATE_TIME: &str = "dateTime";
    pub const TIME: &str = "time";
    pub const CODE: &str = "code";
    pub const CODING: &str = "Coding";
    pub const CODEABLE_CONCEPT: &str = "CodeableConcept";
    pub const BACKBONE_ELEMENT: &str = "BackboneElement";
}

/// A `(type-name, value)` pair
///
/// The value is an arbitrary JSON tree: a structured record, a scalar, or an
/// array of either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    /// Type name (e.g. `string`, `Patient`, `BackboneElement`)
    #[serde(rename = "type")]
    pub type_name: String,

    /// Underlying JSON value
    pub value: Value,
}

impl TypedValue {
    /// Create a typed value from its parts
    pub fn new(type_name: impl Into<String>, value: Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }

    /// Create a `string` value
    pub fn string(value: impl Into<String>) -> Self {
        Self::new(types::STRING, Value::String(value.into()))
    }

    /// Create a `boolean` value
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::new(types::BOOLEAN, Value::Bool(value))
    }

    /// Create an `integer` value
    #[must_use]
    pub fn integer(value: i64) -> Self {
        Self::new(types::INTEGER, Value::Number(value.into()))
    }

    /// Create a `decimal` value. Non-finite numbers become JSON null.
    #[must_use]
    pub fn decimal(value: f64) -> Self {
        let json = Number::from_f64(value).map_or(Value::Null, Value::Number);
        Self::new(types::DECIMAL, json)
    }

    /// Create a `dateTime` value from its ISO-8601 text
    pub fn date_time(value: impl Into<String>) -> Self {
        Self::new(types::DATE_TIME, Value::String(value.into()))
    }

    /// Create an empty structured record tagged with `type_name`
    pub fn empty_record(type_name: impl Into<String>) -> Self {
        Self::new(type_name, Value::Object(Map::new()))
    }

    /// Wrap an untyped JSON value, inferring its type name
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        let type_name = infer_type(&value);
        Self { type_name, value }
    }

    /// Borrow the value as a string slice
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Read the value as an integer
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.value.as_i64()
    }

    /// Read the value as a float
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// Read the value as a boolean
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    /// True if the value is a structured record
    #[must_use]
    pub fn is_record(&self) -> bool {
        self.value.is_object()
    }

    /// Render a scalar as text. Records and arrays have no text form.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match &self.value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Loose truthiness: null, `false`, zero and the empty string are false
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match &self.value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Navigate one property, flattening array-valued properties
    ///
    /// Falls back to choice-typed properties (`value` matches `valueString`,
    /// `valueQuantity`, ...) when the exact name is absent.
    #[must_use]
    pub fn property(&self, name: &str) -> Vec<TypedValue> {
        let Value::Object(map) = &self.value else {
            return Vec::new();
        };

        if let Some(found) = map.get(name) {
            return flatten(found, None);
        }

        map.iter()
            .find_map(|(key, found)| {
                let suffix = key.strip_prefix(name)?;
                suffix
                    .starts_with(char::is_uppercase)
                    .then(|| flatten(found, Some(choice_type(suffix, found))))
            })
            .unwrap_or_default()
    }

    /// True if navigating the dotted `path` passes through an array
    ///
    /// Used to decide whether a rule is fanning out over a repeating element.
    #[must_use]
    pub fn is_repeating(&self, path: &str) -> bool {
        let mut current = vec![&self.value];
        let mut repeating = false;

        for segment in path.split('.') {
            let mut next = Vec::new();
            for value in current {
                match value.get(segment) {
                    Some(Value::Array(items)) => {
                        repeating = true;
                        next.extend(items.iter());
                    }
                    Some(Value::Null) | None => {}
                    Some(other) => next.push(other),
                }
            }
            if next.is_empty() {
                break;
            }
            current = next;
        }

        repeating
    }
}

impl From<Value> for TypedValue {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}

/// Infer the type name of an untyped JSON value
#[must_use]
pub fn infer_type(value: &Value) -> String {
    match value {
        Value::Bool(_) => types::BOOLEAN.to_string(),
        Value::Number(n) if n.is_i64() || n.is_u64() => types::INTEGER.to_string(),
        Value::Number(_) => types::DECIMAL.to_string(),
        Value::String(_) => types::STRING.to_string(),
        Value::Object(map) => map
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or(types::BACKBONE_ELEMENT)
            .to_string(),
        Value::Array(_) | Value::Null => types::BACKBONE_ELEMENT.to_string(),
    }
}

fn flatten(found: &Value, type_name: Option<String>) -> Vec<TypedValue> {
    let wrap = |value: &Value| match &type_name {
        Some(name) => TypedValue::new(name.clone(), value.clone()),
        None => TypedValue::from_json(value.clone()),
    };

    match found {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().filter(|v| !v.is_null()).map(wrap).collect(),
        other => vec![wrap(other)],
    }
}

/// Primitive choice suffixes are lowercased (`valueString` -> `string`),
/// complex ones keep their name (`valueQuantity` -> `Quantity`).
fn choice_type(suffix: &str, found: &Value) -> String {
    let primitive = matches!(found, Value::String(_) | Value::Number(_) | Value::Bool(_));
    if !primitive {
        return suffix.to_string();
    }
    let mut chars = suffix.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_types() {
        assert_eq!(infer_type(&json!("x")), "string");
        assert_eq!(infer_type(&json!(3)), "integer");
        assert_eq!(infer_type(&json!(3.5)), "decimal");
        assert_eq!(infer_type(&json!(true)), "boolean");
        assert_eq!(infer_type(&json!({"resourceType": "Patient"})), "Patient");
        assert_eq!(infer_type(&json!({"a": 1})), "BackboneElement");
    }

    #[test]
    fn test_property_flattens_arrays() {
        let value = TypedValue::from_json(json!({"a": ["x", null, "y"], "b": "z"}));
        let a = value.property("a");
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].as_str(), Some("x"));
        assert_eq!(a[1].as_str(), Some("y"));
        assert_eq!(value.property("b")[0].type_name, "string");
        assert!(value.property("missing").is_empty());
    }

    #[test]
    fn test_property_choice_type() {
        let value = TypedValue::from_json(json!({
            "valueString": "hello",
            "codeQuantity": {"value": 3}
        }));
        let found = value.property("value");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].type_name, "string");
        assert_eq!(value.property("code")[0].type_name, "Quantity");
    }

    #[test]
    fn test_is_repeating() {
        let value = TypedValue::from_json(json!({
            "a": ["x"],
            "b": "y",
            "c": {"d": [1, 2]}
        }));
        assert!(value.is_repeating("a"));
        assert!(!value.is_repeating("b"));
        assert!(value.is_repeating("c.d"));
        assert!(!value.is_repeating("missing"));
    }

    #[test]
    fn test_truthiness_and_text() {
        assert!(!TypedValue::string("").is_truthy());
        assert!(TypedValue::string("a").is_truthy());
        assert!(!TypedValue::integer(0).is_truthy());
        assert!(TypedValue::empty_record("X").is_truthy());
        assert_eq!(TypedValue::integer(42).to_text().as_deref(), Some("42"));
        assert_eq!(TypedValue::empty_record("X").to_text(), None);
    }

    #[test]
    fn test_serde_shape() {
        let value = TypedValue::string("a");
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, json!({"type": "string", "value": "a"}));
    }
}
