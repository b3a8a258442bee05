//! Error types for the scene graph engine.

use thiserror::Error;

use crate::value::ValueKind;

/// Failure decoding a wire value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("unknown value type '{0}'")]
    UnknownKind(String),

    #[error("field '{field}' of {kind} has the wrong type")]
    InvalidField { kind: &'static str, field: String },

    #[error("{kind} is missing '{part}'")]
    PartialTransform { kind: &'static str, part: String },

    #[error("could not resolve {class} at '{path}'")]
    Unresolved { path: String, class: String },
}

/// Failure operating on a scene tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("type '{type_name}' has no property '{property}'")]
    UnknownProperty { type_name: String, property: String },

    #[error("property '{property}' expects {expected}, got {actual}")]
    TypeMismatch {
        property: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("type '{type_name}' has no signal '{signal}'")]
    UnknownChannel { type_name: String, signal: String },

    #[error("type '{type_name}' has no method '{method}'")]
    UnknownMethod { type_name: String, method: String },

    #[error("method '{method}' {reason}")]
    BadArguments { method: String, reason: String },

    #[error("cannot delete the scene root")]
    CannotDeleteRoot,

    #[error("cannot reparent the scene root")]
    CannotReparentRoot,

    #[error("cannot duplicate the scene root without a new parent")]
    CannotDuplicateRoot,

    #[error("cannot move '{0}' under its own subtree")]
    InvalidReparent(String),

    #[error("invalid node name '{0}'")]
    InvalidName(String),

    #[error("invalid property name '{0}'")]
    InvalidPropertyName(String),

    #[error("connection {signal} -> {target}::{method} already exists")]
    AlreadyConnected {
        signal: String,
        target: String,
        method: String,
    },

    #[error("connection {signal} -> {target}::{method} does not exist")]
    NotConnected {
        signal: String,
        target: String,
        method: String,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

pub type EngineResult<T> = Result<T, EngineError>;
