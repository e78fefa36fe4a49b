//! Map Document wire model

use serde::{Deserialize, Serialize};
use std::fmt;

fn structure_map_type() -> String {
    "StructureMap".to_string()
}

fn concept_map_type() -> String {
    "ConceptMap".to_string()
}

fn active() -> String {
    "active".to_string()
}

/// A compiled map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureMap {
    /// Always `StructureMap`
    #[serde(default = "structure_map_type")]
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default = "active")]
    pub status: String,

    /// Declared input/output structures (`uses`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub structure: Vec<Structure>,

    /// Import URLs, possibly ending in `*`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub import: Vec<String>,

    /// Concept maps declared inline
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contained: Vec<ConceptMap>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<Group>,
}

impl Default for StructureMap {
    fn default() -> Self {
        Self {
            resource_type: structure_map_type(),
            url: None,
            name: None,
            status: active(),
            structure: Vec::new(),
            import: Vec::new(),
            contained: Vec::new(),
            group: Vec::new(),
        }
    }
}

impl StructureMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a group by name
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.group.iter().find(|g| g.name == name)
    }

    /// Find a contained concept map by url; `#`-prefixed references are accepted
    #[must_use]
    pub fn concept_map(&self, reference: &str) -> Option<&ConceptMap> {
        let local = reference.strip_prefix('#');
        self.contained.iter().find(|cm| {
            let url = cm.url.as_deref();
            url == Some(reference) || (local.is_some() && url == local)
        })
    }
}

/// A `uses` declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    pub url: String,
    pub mode: StructureMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureMode {
    Source,
    Queried,
    Target,
    Produced,
}

impl StructureMode {
    /// Parse the keyword used in `uses ... as <mode>`
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "source" => Some(Self::Source),
            "queried" => Some(Self::Queried),
            "target" => Some(Self::Target),
            "produced" => Some(Self::Produced),
            _ => None,
        }
    }
}

/// Concept map embedded in a map document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMap {
    #[serde(default = "concept_map_type")]
    pub resource_type: String,

    #[serde(default = "active")]
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<ConceptMapGroup>,
}

impl ConceptMap {
    /// Empty concept map with the given url
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            resource_type: concept_map_type(),
            status: active(),
            url: Some(url.into()),
            group: Vec::new(),
        }
    }
}

/// Mappings from one code system to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptMapGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub element: Vec<SourceElement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<TargetElement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equivalence: Option<ConceptMapEquivalence>,
}

/// Relationship between a source and target concept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptMapEquivalence {
    Relatedto,
    Equivalent,
    Equal,
    Wider,
    Subsumes,
    Narrower,
    Specializes,
    Inexact,
    Unmatched,
    Disjoint,
}

impl ConceptMapEquivalence {
    /// Map a mapping-language operator to its equivalence code
    #[must_use]
    pub fn from_operator(operator: &str) -> Option<Self> {
        match operator {
            "==" => Some(Self::Equal),
            "=" => Some(Self::Equivalent),
            "-" => Some(Self::Disjoint),
            "!=" => Some(Self::Unmatched),
            ">=" => Some(Self::Wider),
            "<=" => Some(Self::Narrower),
            "~" => Some(Self::Inexact),
            _ => None,
        }
    }

    /// True when the relationship means the codes do not map
    #[must_use]
    pub fn is_negative(self) -> bool {
        matches!(self, Self::Unmatched | Self::Disjoint)
    }
}

/// A named group of rules, the unit of invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    #[serde(default)]
    pub type_mode: TypeMode,

    #[serde(default)]
    pub input: Vec<GroupInput>,

    #[serde(default)]
    pub rule: Vec<Rule>,
}

impl Group {
    /// Inputs declared with the given mode, in declaration order
    pub fn inputs(&self, mode: InputMode) -> impl Iterator<Item = &GroupInput> {
        self.input.iter().filter(move |input| input.mode == mode)
    }

    /// Type of the first source input, with any URL prefix removed
    #[must_use]
    pub fn source_type(&self) -> Option<&str> {
        let input = self.input.first().filter(|i| i.mode == InputMode::Source)?;
        input
            .type_name
            .as_deref()
            .map(|t| t.rsplit('/').next().unwrap_or(t))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TypeMode {
    #[default]
    None,
    Types,
    TypeAndTypes,
}

/// A group parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInput {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub mode: InputMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Source,
    Target,
}

/// A transformation rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub source: Vec<RuleSource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<RuleTarget>,

    /// Nested rules run for each source binding
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule: Vec<Rule>,

    /// Named group invocations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependent: Vec<Dependent>,
}

/// Where a rule reads from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSource {
    pub context: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,

    /// `where` expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value_string: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_mode: Option<SourceListMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceListMode {
    First,
    NotFirst,
    Last,
    NotLast,
    OnlyOne,
}

impl SourceListMode {
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "first" => Some(Self::First),
            "not_first" => Some(Self::NotFirst),
            "last" => Some(Self::Last),
            "not_last" => Some(Self::NotLast),
            "only_one" => Some(Self::OnlyOne),
            _ => None,
        }
    }

    /// Modes that reduce the match to at most one value
    #[must_use]
    pub fn is_singular(self) -> bool {
        matches!(self, Self::First | Self::Last | Self::OnlyOne)
    }
}

/// Where a rule writes to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default)]
    pub context_type: ContextType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformKind>,

    /// Each parameter is a single-key map (`valueId: a`) in JSON and YAML alike
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub parameter: Vec<Parameter>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list_mode: Vec<TargetListMode>,

    /// Identifier carried by `share`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_rule_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    #[default]
    Variable,
    Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetListMode {
    First,
    Share,
    Last,
    Collate,
}

impl TargetListMode {
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "first" => Some(Self::First),
            "share" => Some(Self::Share),
            "last" => Some(Self::Last),
            "collate" => Some(Self::Collate),
            _ => None,
        }
    }
}

/// Transform discriminator of a target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransformKind {
    Create,
    Copy,
    Truncate,
    Cast,
    Append,
    Translate,
    Evaluate,
    Uuid,
    Cc,
    /// Any transform name without built-in support
    Other(String),
}

impl TransformKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Copy => "copy",
            Self::Truncate => "truncate",
            Self::Cast => "cast",
            Self::Append => "append",
            Self::Translate => "translate",
            Self::Evaluate => "evaluate",
            Self::Uuid => "uuid",
            Self::Cc => "cc",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for TransformKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "create" => Self::Create,
            "copy" => Self::Copy,
            "truncate" => Self::Truncate,
            "cast" => Self::Cast,
            "append" => Self::Append,
            "translate" => Self::Translate,
            "evaluate" => Self::Evaluate,
            "uuid" => Self::Uuid,
            "cc" => Self::Cc,
            _ => Self::Other(name),
        }
    }
}

impl From<&str> for TransformKind {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<TransformKind> for String {
    fn from(kind: TransformKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transform argument: a variable reference or a typed literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Parameter {
    #[serde(rename = "valueId")]
    Id(String),
    #[serde(rename = "valueString")]
    String(String),
    #[serde(rename = "valueBoolean")]
    Boolean(bool),
    #[serde(rename = "valueInteger")]
    Integer(i64),
    #[serde(rename = "valueDecimal")]
    Decimal(f64),
    #[serde(rename = "valueDateTime")]
    DateTime(String),
}

/// Invocation of a named group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependent {
    pub name: String,
    #[serde(default)]
    pub variable: Vec<String>,
}
