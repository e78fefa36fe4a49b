//! Concept map translation

use fml_model::{ConceptMap, ConceptMapEquivalence};

/// A target concept found for a source code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateMatch {
    /// Target code system, when the group declares one
    pub system: Option<String>,
    pub code: String,
    pub equivalence: Option<ConceptMapEquivalence>,
}

/// Translate `code` through `concept_map`
///
/// Groups are searched in order; when `system` is given only groups with
/// that source system are considered. Targets marked `unmatched` or
/// `disjoint` never match.
#[must_use]
pub fn translate(
    concept_map: &ConceptMap,
    system: Option<&str>,
    code: &str,
) -> Option<TranslateMatch> {
    concept_map
        .group
        .iter()
        .filter(|group| system.is_none() || group.source.as_deref() == system)
        .find_map(|group| {
            let element = group
                .element
                .iter()
                .find(|element| element.code.as_deref() == Some(code))?;
            element.target.iter().find_map(|target| {
                if target.equivalence.is_some_and(ConceptMapEquivalence::is_negative) {
                    return None;
                }
                Some(TranslateMatch {
                    system: group.target.clone(),
                    code: target.code.clone()?,
                    equivalence: target.equivalence,
                })
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fml_model::{ConceptMapGroup, SourceElement, TargetElement};

    fn element(code: &str, target: &str, equivalence: Option<ConceptMapEquivalence>) -> SourceElement {
        SourceElement {
            code: Some(code.into()),
            target: vec![TargetElement {
                code: Some(target.into()),
                equivalence,
            }],
        }
    }

    fn gender_map() -> ConceptMap {
        let mut concept_map = ConceptMap::new("#gender");
        concept_map.group.push(ConceptMapGroup {
            source: Some("http://left".into()),
            target: Some("http://right".into()),
            element: vec![
                element("M", "male", Some(ConceptMapEquivalence::Equal)),
                element("F", "female", None),
                element("U", "unknown", Some(ConceptMapEquivalence::Disjoint)),
            ],
        });
        concept_map
    }

    #[test]
    fn test_translate_code() {
        let found = translate(&gender_map(), None, "M").unwrap();
        assert_eq!(found.code, "male");
        assert_eq!(found.system.as_deref(), Some("http://right"));
        assert_eq!(translate(&gender_map(), None, "F").unwrap().code, "female");
    }

    #[test]
    fn test_translate_filters_by_system() {
        assert!(translate(&gender_map(), Some("http://left"), "M").is_some());
        assert!(translate(&gender_map(), Some("http://other"), "M").is_none());
    }

    #[test]
    fn test_negative_equivalence_and_unknown_code() {
        assert!(translate(&gender_map(), None, "U").is_none());
        assert!(translate(&gender_map(), None, "X").is_none());
    }
}
