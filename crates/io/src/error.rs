use scenewire_engine::error::{DecodeError, EngineError};
use thiserror::Error;

use crate::scene_text::ParseError;

/// Failure of a scene load, edit or save.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("scene not found: {0}")]
    NotFound(String),

    #[error("scene already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid locator '{0}'")]
    InvalidLocator(String),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ParseError,
    },

    #[error("failed to save {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("property '{property}': {source}")]
    Property {
        property: String,
        #[source]
        source: DecodeError,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl EditError {
    /// The decode failure behind this error, if any.
    pub fn decode_error(&self) -> Option<&DecodeError> {
        match self {
            EditError::Property { source, .. } => Some(source),
            EditError::Engine(EngineError::Decode(source)) => Some(source),
            _ => None,
        }
    }
}

pub type EditResult<T> = Result<T, EditError>;
