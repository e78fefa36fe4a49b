#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # fml-ir
//!
//! Runtime value representation for the mapping engine.
//!
//! Records flowing through a map are plain JSON trees tagged with a type
//! name. This crate provides that pairing ([`TypedValue`]) together with the
//! element path helpers used to read from and write into nested records.

/// Element paths and the read/write helpers built on them.
pub mod path;
/// Typed values and JSON type inference.
pub mod value;

/// Path primitives and record navigation.
pub use path::{ElementPath, PathSegment, RESERVED_KEYS, resolve, resolve_mut, validate_key, write_value};
/// Typed value pair and well-known type names.
pub use value::{TypedValue, types};

use thiserror::Error;

/// Errors that can occur when working with records
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Path not found: {path}")]
    PathNotFound { path: String },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Type mismatch at '{path}': expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },
}

impl Error {
    /// Build a path-not-found error.
    pub fn path_not_found(path: impl ToString) -> Self {
        Self::PathNotFound {
            path: path.to_string(),
        }
    }

    /// Build an invalid-path error with the offending input and reason.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Build a type mismatch error for a location in a record.
    pub fn type_mismatch(
        path: impl ToString,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            path: path.to_string(),
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Crate-local result type for record operations.
pub type Result<T> = std::result::Result<T, Error>;
