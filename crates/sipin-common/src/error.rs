//! Error types for SIP packaging
//!
//! The variants mirror how a notification can fail. [`SipError::is_transient`]
//! is the only place that decides whether a failure is worth a redelivery.

use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for packaging operations
pub type Result<T> = std::result::Result<T, SipError>;

/// Main error type for SIP packaging
#[derive(Error, Debug)]
pub enum SipError {
    /// The notification or sidecar could not be parsed or lacks mandatory data
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A file referenced by the notification is absent
    #[error("Missing file: {}", .0.display())]
    MissingFile(PathBuf),

    /// An outside service (directory service, event sink) is temporarily unavailable
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The directory service answered, but knows no such content partner
    #[error("Unknown content partner: {0}")]
    UnknownContentPartner(String),

    /// Writing, moving or compressing the package failed
    #[error("Filesystem failure on '{}': {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("XML error: {0}")]
    Xml(String),

    /// A broken internal invariant (e.g. a PREMIS relationship to an unknown object)
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SipError {
    /// Attach a path to an IO error
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SipError::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn xml(err: impl std::fmt::Display) -> Self {
        SipError::Xml(err.to_string())
    }

    /// Whether a redelivery of the same notification could succeed.
    ///
    /// Filesystem errors are terminal unless their kind says the resource
    /// was only momentarily unavailable.
    pub fn is_transient(&self) -> bool {
        match self {
            SipError::DependencyUnavailable(_) => true,
            SipError::Filesystem { source, .. } | SipError::Io(source) => matches!(
                source.kind(),
                ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
