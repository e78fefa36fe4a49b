//! # fml-model
//!
//! Map Document model, type schema, loader, and registry.
//!
//! The Map Document is the compiled, serialisable form of a map: groups of
//! rules with their sources, targets and dependents, plus declared
//! structures, imports and contained concept maps. Field names follow the
//! JSON wire contract. Documents are loaded from JSON or YAML and can be
//! kept in a concurrent [`MapRegistry`] that also resolves (wildcard)
//! imports.

pub mod loader;
pub mod model;
pub mod registry;
pub mod schema;

pub use loader::MapLoader;
pub use model::{
    ConceptMap, ConceptMapEquivalence, ConceptMapGroup, ContextType, Dependent, Group,
    GroupInput, InputMode, Parameter, Rule, RuleSource, RuleTarget, SourceElement,
    SourceListMode, Structure, StructureMap, StructureMode, TargetElement, TargetListMode,
    TransformKind, TypeMode,
};
pub use registry::{ImportResolver, MapRegistry, import_matches};
pub use schema::{ElementDefinition, SchemaSet, TypeDefinition, TypeSchema};

use thiserror::Error;

/// Errors that can occur when loading or registering map documents
#[derive(Error, Debug)]
pub enum Error {
    #[error("Map not found: {0}")]
    NotFound(String),

    #[error("Invalid map format: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
