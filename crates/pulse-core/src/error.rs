use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the Pulse Monitor.
#[derive(Error, Debug)]
pub enum PulseError {
    /// The uploaded file's extension or declared type is not CSV or JSON.
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    /// The input bytes do not parse as the declared type.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A batch could not be written to the record store.
    #[error("Failed to persist batch to {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PulseError {
    /// Stable error-kind tag reported to API callers as `errorKind`.
    pub fn kind(&self) -> &'static str {
        match self {
            PulseError::UnsupportedType(_) => "UnsupportedTypeError",
            PulseError::MalformedInput(_) | PulseError::JsonParse(_) => "MalformedInputError",
            PulseError::Persistence { .. } => "PersistenceError",
            PulseError::FileRead { .. } => "IoError",
            PulseError::Other(_) => "InternalError",
        }
    }

    /// `true` when the caller can fix the problem by changing the upload.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PulseError::UnsupportedType(_) | PulseError::MalformedInput(_) | PulseError::JsonParse(_)
        )
    }
}

/// Convenience alias used throughout the pulse crates.
pub type Result<T> = std::result::Result<T, PulseError>;
