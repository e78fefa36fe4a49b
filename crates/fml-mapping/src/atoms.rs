//! Parse tree of a mapping language document
//!
//! The parser produces a [`DocumentAtom`]: the top-level declarations in
//! source order. Lowering it into a [`StructureMap`] splits dotted contexts,
//! fills in default rule names and groups concept map lines by system pair.

use fml_model::{
    ConceptMap, ConceptMapEquivalence, ConceptMapGroup, ContextType, Dependent, Group,
    GroupInput, InputMode, Parameter, Rule, RuleSource, RuleTarget, SourceElement,
    SourceListMode, Structure, StructureMap, StructureMode, TargetElement, TargetListMode,
    TransformKind, TypeMode,
};

/// A top-level declaration
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    /// `map "<url>" = <name>`
    Map { url: String, name: String },
    /// `uses "<url>" [alias <name>] as <mode>`
    Uses {
        url: String,
        alias: Option<String>,
        mode: StructureMode,
    },
    /// `imports "<url>"`
    Imports(String),
    ConceptMap(ConceptMapAtom),
    Group(GroupAtom),
}

/// A parsed document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentAtom {
    pub atoms: Vec<Atom>,
}

/// `conceptmap "<url>" { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptMapAtom {
    pub url: String,
    /// `prefix` declarations, in order
    pub prefixes: Vec<(String, String)>,
    pub mappings: Vec<ConceptMappingAtom>,
}

impl ConceptMapAtom {
    fn system(&self, prefix: &str) -> Option<String> {
        self.prefixes
            .iter()
            .rev()
            .find(|(name, _)| name == prefix)
            .map(|(_, url)| url.clone())
    }
}

/// `s:<code> [<op>] t:<code>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptMappingAtom {
    pub source_prefix: String,
    pub source_code: String,
    pub equivalence: Option<ConceptMapEquivalence>,
    pub target_prefix: String,
    pub target_code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupAtom {
    pub name: String,
    pub parameters: Vec<ParameterAtom>,
    pub extends: Option<String>,
    pub type_mode: TypeMode,
    pub rules: Vec<RuleAtom>,
}

/// `(source|target) <name> [: <type>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterAtom {
    pub mode: InputMode,
    pub name: String,
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleAtom {
    /// Explicit `"<name>"` suffix
    pub name: Option<String>,
    pub sources: Vec<RuleSourceAtom>,
    pub targets: Vec<RuleTargetAtom>,
    pub dependents: Vec<DependentAtom>,
    pub rules: Vec<RuleAtom>,
}

/// One comma-separated entry before `->`
///
/// Expressions are kept as canonical text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSourceAtom {
    /// Dotted context, e.g. `src.name.given`
    pub context: String,
    pub type_name: Option<String>,
    pub default_value: Option<String>,
    pub list_mode: Option<SourceListMode>,
    pub alias: Option<String>,
    pub condition: Option<String>,
    pub check: Option<String>,
    pub log: Option<String>,
}

/// One comma-separated entry after `->`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleTargetAtom {
    /// Dotted context; absent for a bare invocation such as `create('Patient') as p`
    pub context: Option<String>,
    pub value: Option<TargetValue>,
    pub alias: Option<String>,
    pub share: Option<String>,
    pub list_mode: Option<TargetListMode>,
}

/// Right-hand side of a rule target
#[derive(Debug, Clone, PartialEq)]
pub enum TargetValue {
    /// `name(arg, ...)`
    Invocation {
        name: String,
        parameters: Vec<Parameter>,
    },
    /// A literal copied as-is
    Literal(Parameter),
    /// A bare identifier
    Variable(String),
    /// Any other expression, as canonical text
    Expression(String),
}

/// `then <name>(<variable>, ...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentAtom {
    pub name: String,
    pub variables: Vec<String>,
}

/// Split `a.b.c` into `("a", Some("b.c"))`
fn split_context(dotted: &str) -> (String, Option<String>) {
    match dotted.split_once('.') {
        Some((head, rest)) => (head.to_string(), Some(rest.to_string())),
        None => (dotted.to_string(), None),
    }
}

impl From<DocumentAtom> for StructureMap {
    fn from(document: DocumentAtom) -> Self {
        let mut map = StructureMap::new();
        for atom in document.atoms {
            match atom {
                Atom::Map { url, name } => {
                    map.url = Some(url);
                    map.name = Some(name);
                }
                Atom::Uses { url, alias, mode } => {
                    map.structure.push(Structure { url, mode, alias });
                }
                Atom::Imports(url) => map.import.push(url),
                Atom::ConceptMap(concept_map) => map.contained.push(concept_map.into()),
                Atom::Group(group) => map.group.push(group.into()),
            }
        }
        map
    }
}

impl From<ConceptMapAtom> for ConceptMap {
    fn from(atom: ConceptMapAtom) -> Self {
        let mut concept_map = ConceptMap::new(atom.url.clone());
        for mapping in &atom.mappings {
            let source = atom.system(&mapping.source_prefix);
            let target = atom.system(&mapping.target_prefix);

            let position = concept_map
                .group
                .iter()
                .position(|g| g.source == source && g.target == target);
            let index = position.unwrap_or_else(|| {
                concept_map.group.push(ConceptMapGroup {
                    source,
                    target,
                    element: Vec::new(),
                });
                concept_map.group.len() - 1
            });

            concept_map.group[index].element.push(SourceElement {
                code: Some(mapping.source_code.clone()),
                target: vec![TargetElement {
                    code: Some(mapping.target_code.clone()),
                    equivalence: mapping.equivalence,
                }],
            });
        }
        concept_map
    }
}

impl From<GroupAtom> for Group {
    fn from(atom: GroupAtom) -> Self {
        Self {
            name: atom.name,
            extends: atom.extends,
            type_mode: atom.type_mode,
            input: atom
                .parameters
                .into_iter()
                .map(|p| GroupInput {
                    name: p.name,
                    type_name: p.type_name,
                    mode: p.mode,
                })
                .collect(),
            rule: atom.rules.into_iter().map(Rule::from).collect(),
        }
    }
}

impl From<RuleAtom> for Rule {
    fn from(atom: RuleAtom) -> Self {
        let source: Vec<RuleSource> = atom.sources.into_iter().map(RuleSource::from).collect();
        let name = atom
            .name
            .or_else(|| source.first().and_then(|s| s.element.clone()));

        Self {
            name,
            source,
            target: atom.targets.into_iter().map(RuleTarget::from).collect(),
            rule: atom.rules.into_iter().map(Rule::from).collect(),
            dependent: atom
                .dependents
                .into_iter()
                .map(|d| Dependent {
                    name: d.name,
                    variable: d.variables,
                })
                .collect(),
        }
    }
}

impl From<RuleSourceAtom> for RuleSource {
    fn from(atom: RuleSourceAtom) -> Self {
        let (context, element) = split_context(&atom.context);
        Self {
            context,
            type_name: atom.type_name,
            element,
            variable: atom.alias,
            condition: atom.condition,
            check: atom.check,
            default_value_string: atom.default_value,
            list_mode: atom.list_mode,
            log_message: atom.log,
        }
    }
}

impl From<RuleTargetAtom> for RuleTarget {
    fn from(atom: RuleTargetAtom) -> Self {
        let (context, element) = match atom.context.as_deref().map(split_context) {
            Some((context, element)) => (Some(context), element),
            None => (None, None),
        };

        let (transform, parameter) = match atom.value {
            None => (None, Vec::new()),
            Some(TargetValue::Invocation { name, parameters }) => {
                (Some(TransformKind::from(name)), parameters)
            }
            Some(TargetValue::Literal(parameter)) => (Some(TransformKind::Copy), vec![parameter]),
            Some(TargetValue::Variable(name)) => {
                (Some(TransformKind::Copy), vec![Parameter::Id(name)])
            }
            Some(TargetValue::Expression(text)) => {
                (Some(TransformKind::Evaluate), vec![Parameter::String(text)])
            }
        };

        let mut list_mode = Vec::new();
        if atom.share.is_some() {
            list_mode.push(TargetListMode::Share);
        }
        list_mode.extend(atom.list_mode);

        Self {
            context,
            context_type: ContextType::Variable,
            element,
            variable: atom.alias,
            transform,
            parameter,
            list_mode,
            list_rule_id: atom.share,
        }
    }
}
