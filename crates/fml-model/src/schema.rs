//! Structural type schema
//!
//! The interpreter asks the schema two questions about a target element:
//! whether it repeats, and what its declared type is. [`SchemaSet`] is a
//! plain table of type definitions that answers both; anything else can
//! plug in through [`TypeSchema`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lookup of element definitions by owning type
pub trait TypeSchema {
    /// Definition of `element` on `type_name`, if known
    fn element(&self, type_name: &str, element: &str) -> Option<&ElementDefinition>;
}

/// One element of a type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinition {
    pub name: String,

    /// Allowed type codes
    #[serde(rename = "type", default)]
    pub types: Vec<String>,

    #[serde(default)]
    pub is_array: bool,
}

impl ElementDefinition {
    pub fn new(name: impl Into<String>, type_code: impl Into<String>, is_array: bool) -> Self {
        Self {
            name: name.into(),
            types: vec![type_code.into()],
            is_array,
        }
    }

    /// The element's type when exactly one is allowed
    #[must_use]
    pub fn single_type(&self) -> Option<&str> {
        match self.types.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}

/// A named type and its elements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    #[serde(default)]
    pub elements: Vec<ElementDefinition>,
}

impl TypeDefinition {
    #[must_use]
    pub fn element(&self, name: &str) -> Option<&ElementDefinition> {
        self.elements.iter().find(|e| e.name == name)
    }
}

/// Table of type definitions keyed by type name
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    types: HashMap<String, TypeDefinition>,
}

impl SchemaSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a type definition
    pub fn insert(&mut self, definition: TypeDefinition) {
        self.types.insert(definition.name.clone(), definition);
    }

    /// Look up a type; URL-qualified names match on their last segment
    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<&TypeDefinition> {
        self.types
            .get(type_name)
            .or_else(|| self.types.get(type_name.rsplit('/').next()?))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<TypeDefinition> for SchemaSet {
    fn from_iter<I: IntoIterator<Item = TypeDefinition>>(iter: I) -> Self {
        let mut set = Self::new();
        for definition in iter {
            set.insert(definition);
        }
        set
    }
}

impl TypeSchema for SchemaSet {
    fn element(&self, type_name: &str, element: &str) -> Option<&ElementDefinition> {
        self.get(type_name)?.element(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient() -> TypeDefinition {
        TypeDefinition {
            name: "Patient".into(),
            elements: vec![
                ElementDefinition::new("name", "HumanName", true),
                ElementDefinition::new("gender", "code", false),
            ],
        }
    }

    #[test]
    fn test_element_lookup() {
        let schema: SchemaSet = [patient()].into_iter().collect();
        let name = schema.element("Patient", "name").unwrap();
        assert!(name.is_array);
        assert_eq!(name.single_type(), Some("HumanName"));
        assert!(!schema.element("Patient", "gender").unwrap().is_array);
        assert!(schema.element("Patient", "missing").is_none());
        assert!(schema.element("Observation", "name").is_none());
    }

    #[test]
    fn test_url_qualified_type() {
        let mut schema = SchemaSet::new();
        schema.insert(patient());
        assert!(schema.get("http://hl7.org/fhir/StructureDefinition/Patient").is_some());
        assert_eq!(schema.len(), 1);
    }
}
