//! Configuration loading.

pub mod settings;

use std::path::PathBuf;

use thiserror::Error;

pub use settings::{CaptureFormat, CaptureSettings, ClientSettings, HostSettings, ServerSettings, Settings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `source_name` names where the text came from (a file path or `<inline>`).
    #[error("invalid settings in {source_name}: {message}")]
    Parse { source_name: String, message: String },

    #[error("invalid settings: {0}")]
    Invalid(String),
}
