//! Error types for resources, documents and structural validation.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which half of a resource body a field name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Attribute,
    Relationship,
    /// Either kind; used where the caller did not say which.
    Field,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Attribute => f.write_str("attribute"),
            FieldKind::Relationship => f.write_str("relationship"),
            FieldKind::Field => f.write_str("field"),
        }
    }
}

/// Contract violations raised while building or mutating the resource model.
///
/// These stop the operation. Field-level validation problems are not reported
/// here; they are recorded on the resource itself (see `Resource::errors`).
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("malformed input for {resource}: unrecognized key(s) {}", keys.join(", "))]
    MalformedInput { resource: String, keys: Vec<String> },

    #[error("unknown {kind}(s) for {resource}: {}", names.join(", "))]
    UnknownField {
        resource: String,
        kind: FieldKind,
        names: Vec<String>,
    },

    #[error("{field} is already set to \"{current}\" and cannot change to \"{attempted}\"")]
    DuplicateIdentity {
        field: &'static str,
        current: String,
        attempted: String,
    },

    #[error("relationship '{name}' has an unresolvable payload: {message}")]
    UnresolvedRelationshipShape { name: String, message: String },

    #[error("relationship '{name}' expects {expected} data")]
    CardinalityMismatch { name: String, expected: &'static str },

    #[error("cannot convert a '{from}' resource into a '{to}' resource")]
    IncompatibleConversion { from: String, to: String },

    #[error("no resource type registered for '{resource_type}'")]
    UnknownResourceType { resource_type: String },

    #[error("resource object has no type")]
    MissingType,

    #[error("invalid error object: {}", problems.join("; "))]
    InvalidErrorObject { problems: Vec<String> },

    #[error("invalid link '{name}': {message}")]
    InvalidLink { name: String, message: String },

    #[error("duplicate member name '{name}'")]
    DuplicateMember { name: String },

    #[error("member at key '{key}' has no name")]
    UnnamedMember { key: String },

    #[error("invalid collection key '{key}': {message}")]
    InvalidKey { key: String, message: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("resource {resource_type}/{id} not found")]
    ResourceNotFound { resource_type: String, id: String },

    #[error("datasource failure: {message}")]
    Datasource { message: String },
}

impl ResourceError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResourceError::Datasource { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors while loading or assembling a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot serialize document: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed document: unrecognized top-level key(s) {}", keys.join(", "))]
    MalformedInput { keys: Vec<String> },

    #[error("invalid '{section}' section: expected {expected}, got {actual}")]
    InvalidSection {
        section: &'static str,
        expected: &'static str,
        actual: String,
    },

    #[error("invalid registry entry '{resource_type}': {message}")]
    InvalidRegistry {
        resource_type: String,
        message: String,
    },

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl DocumentError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            DocumentError::FileNotFound { .. } | DocumentError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            DocumentError::NetworkError { .. } => 3,
            DocumentError::Resource(e) => e.exit_code(),
            _ => 2,
        }
    }
}

/// Errors during structural validation of a raw document.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("document failed validation with {} error(s)", errors.len())]
    Invalid { errors: Vec<ShapeError> },
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Document(e) => e.exit_code(),
            ValidateError::Invalid { .. } => 1,
        }
    }
}

/// Single structural violation with path context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ShapeError {
    /// JSON Pointer (RFC 6901) to the offending value.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}
