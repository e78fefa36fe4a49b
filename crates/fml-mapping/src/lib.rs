//! # fml-mapping
//!
//! Mapping language front end and transform interpreter.
//!
//! Map source text is parsed into a [`StructureMap`](fml_model::StructureMap)
//! by [`parse_mapping_language`]; [`structure_map_transform`] (or a
//! configured [`MappingRuntime`]) then executes the document against input
//! values, dispatching dependent groups across the document and its
//! imports.

pub mod atoms;
pub mod conceptmap;
pub mod parser;
pub mod runtime;
pub mod transforms;

pub use fml_path::ParseError;
pub use parser::{MappingLanguage, parse_mapping_language};
pub use runtime::{MappingRuntime, structure_map_transform};

use thiserror::Error;

/// Errors that can occur while evaluating a map
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Map document has no groups")]
    NoGroups,

    #[error("Missing source definitions")]
    MissingSourceDefinitions,

    #[error("Missing target definitions")]
    MissingTargetDefinitions,

    #[error("Not enough arguments (got {got}, min {min})")]
    NotEnoughArguments { got: usize, min: usize },

    #[error("Too many arguments (got {got}, max {max})")]
    TooManyArguments { got: usize, max: usize },

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Dependent group not found: {0}")]
    DependentGroupNotFound(String),

    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error("Unsupported transform: {0}")]
    UnsupportedTransform(String),

    /// Carries the parameter text, or `undefined` when the argument is absent
    #[error("Missing target parameter: {0}")]
    MissingTargetParameter(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Check failed: {0}")]
    CheckFailed(String),

    #[error("Expected only one value")]
    ExpectedOnlyOne,

    #[error("Transform error: {0}")]
    Transform(String),

    #[error(transparent)]
    Element(fml_ir::Error),

    #[error(transparent)]
    Path(#[from] fml_path::Error),
}

impl From<fml_ir::Error> for Error {
    fn from(error: fml_ir::Error) -> Self {
        match error {
            fml_ir::Error::InvalidKey(key) => Self::InvalidKey(key),
            other => Self::Element(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
