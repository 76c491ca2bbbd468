//! Error types.
//!
//! Startup errors ([`MappingError`], [`MergeConflictError`], [`ConfigurationError`], wrapped
//! in [`BuildError`]) abort schema construction. Runtime errors are collected in
//! [`FieldError`] and only ever null the field they occurred on.
use displaydoc::Display;
use serde_json::json;
use thiserror::Error;

pub use crate::configuration::ConfigurationError;
use crate::graphql;
use crate::graphql::Path;

/// Error while translating a field mapping into a typed field tree.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MappingError {
    /// unsupported field kind '{kind}' at '{path}'
    UnsupportedKind { path: String, kind: String },

    /// field '{path}' declares neither a type nor properties
    MissingKind { path: String },

    /// object field '{path}' declares no properties
    EmptyObject { path: String },

    /// field name '{name}' at '{path}' cannot be used in a GraphQL schema
    InvalidName { path: String, name: String },

    /// generated name '{name}' is used twice (second use at '{path}')
    NameCollision { path: String, name: String },

    /// mapping document is malformed: {reason}
    Malformed { reason: String },
}

/// Error in the filter, sort or paging arguments of a query.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueryError {
    /// unknown field '{field}' in {context}
    UnknownField { field: String, context: &'static str },

    /// operator '{operator}' is not supported on field '{field}' of type {kind}
    UnsupportedOperator {
        field: String,
        operator: String,
        kind: &'static str,
    },

    /// field '{field}' cannot be used for sorting
    UnsortableField { field: String },

    /// invalid value for '{argument}': {reason}
    InvalidArgument { argument: String, reason: String },
}

/// Error decoding a connection cursor.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CursorError {
    /// cursor is not valid base64
    Encoding,

    /// cursor payload is malformed: {0}
    Payload(String),

    /// cursor was issued for a different sort order
    SortMismatch,
}

/// Error raised by a search capability.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// document store is unavailable: {0}
    Unavailable(String),

    /// index '{0}' does not exist
    MissingIndex(String),

    /// query was rejected by the document store: {0}
    Rejected(String),
}

/// Error raised by a batch lookup capability.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LookupError {
    /// lookup for relation '{relation}' failed: {reason}
    Failed { relation: String, reason: String },

    /// relation '{0}' is not known to the lookup capability
    UnknownRelation(String),
}

/// Error while merging subgraph units into a federated schema.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MergeConflictError {
    /// type definitions of unit {unit} cannot be parsed: {message}
    InvalidTypeDefinitions { unit: usize, message: String },

    /// type '{type_name}' is defined differently by more than one unit
    DuplicateType { type_name: String },

    /// field '{type_name}.{field}' is defined by more than one unit
    DuplicateField { type_name: String, field: String },

    /// resolver for '{type_name}.{field}' is bound more than once
    DuplicateResolver { type_name: String, field: String },

    /// type '{0}' is owned by this subgraph and cannot be declared as an extension
    ExtendsLocalType(String),

    /// external field '{type_name}.{field}' is declared with conflicting types
    ConflictingExternalField { type_name: String, field: String },

    /// key field '{field}' of '{type_name}' is not declared as an external field
    UnknownKeyField { type_name: String, field: String },

    /// field '{type_name}.{field}' has no resolver
    MissingResolver { type_name: String, field: String },

    /// resolver is bound to '{type_name}.{field}' which does not exist in the schema
    UnknownField { type_name: String, field: String },

    /// relation field '{type_name}.{field}' requires a batch lookup capability
    MissingLookup { type_name: String, field: String },

    /// merged schema is invalid: {0}
    InvalidSchema(String),
}

/// Fatal error while building a federated schema from configuration.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum BuildError {
    /// {0}
    Configuration(#[from] ConfigurationError),

    /// mapping of entity '{entity}' is invalid: {source}
    Mapping {
        entity: String,
        source: MappingError,
    },

    /// {0}
    Merge(#[from] MergeConflictError),
}

/// Error rejecting a whole request before any field is resolved.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RequestError {
    /// query validation failed
    Validation(Vec<String>),

    /// {0}
    UnknownOperation(String),

    /// {0} operations are not supported
    UnsupportedOperation(&'static str),

    /// variable '${0}' of a non-null type has no value
    MissingVariable(String),
}

impl RequestError {
    pub fn extension_code(&self) -> &'static str {
        match self {
            RequestError::Validation(_) | RequestError::UnknownOperation(_) => {
                "GRAPHQL_VALIDATION_FAILED"
            }
            RequestError::UnsupportedOperation(_) => "OPERATION_NOT_SUPPORTED",
            RequestError::MissingVariable(_) => "BAD_USER_INPUT",
        }
    }

    /// One GraphQL error per problem found in the request.
    pub fn to_graphql_errors(&self) -> Vec<graphql::Error> {
        let messages = match self {
            RequestError::Validation(messages) => messages.clone(),
            _ => vec![self.to_string()],
        };
        messages
            .into_iter()
            .map(|message| {
                graphql::Error::builder()
                    .message(message)
                    .extension_code(self.extension_code())
                    .build()
            })
            .collect()
    }
}

/// Error resolving a single field. Sibling fields keep resolving.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FieldError {
    /// {0}
    Query(#[from] QueryError),

    /// {0}
    Cursor(#[from] CursorError),

    /// {0}
    Lookup(#[from] LookupError),

    /// {0}
    Store(#[from] StoreError),

    /// {0}
    Execution(String),
}

impl FieldError {
    pub fn extension_code(&self) -> &'static str {
        match self {
            FieldError::Query(_) => "QUERY_ERROR",
            FieldError::Cursor(_) => "CURSOR_ERROR",
            FieldError::Lookup(_) => "LOOKUP_ERROR",
            FieldError::Store(_) => "STORE_ERROR",
            FieldError::Execution(_) => "EXECUTION_ERROR",
        }
    }

    /// Convert the field error to a GraphQL error located at `path`.
    pub fn to_graphql_error(&self, path: Path) -> graphql::Error {
        graphql::Error::builder()
            .message(self.to_string())
            .path(path)
            .extension("code", json!(self.extension_code()))
            .build()
    }
}
