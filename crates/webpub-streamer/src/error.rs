//! Error types for the publication server.
//!
//! All errors use thiserror for consistent error handling across the codebase.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Identifier decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Identifier was empty
    #[error("Identifier is empty")]
    Empty,

    /// Identifier is not valid URL-safe base64
    #[error("Identifier is not valid base64: {0}")]
    InvalidBase64(String),

    /// Decoded bytes are not a valid path on this platform
    #[error("Identifier does not decode to a valid path")]
    InvalidPath,
}

/// Publication parsing errors.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Failed to open the publication file
    #[error("Failed to open publication {path}: {source}")]
    Open {
        /// Path to the publication
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// File is not a readable ZIP archive
    #[error("Invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// I/O error while reading an archive entry
    #[error("I/O error while reading archive: {0}")]
    Io(#[from] std::io::Error),

    /// A required archive entry is missing
    #[error("Missing archive entry: {0}")]
    MissingEntry(String),

    /// A document inside the archive is malformed
    #[error("Malformed {document}: {reason}")]
    Malformed {
        /// Name of the malformed document
        document: String,
        /// Reason the document was rejected
        reason: String,
    },

    /// The blocking parse task did not complete
    #[error("Parse task failed: {0}")]
    Task(String),
}

/// Asset fetching errors.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Asset is not part of the publication
    #[error("Asset not found: {0}")]
    NotFound(String),

    /// Failed to open the publication archive
    #[error("Failed to open archive: {0}")]
    Io(#[from] std::io::Error),

    /// Archive entry could not be read
    #[error("Failed to read archive entry: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// The blocking fetch task did not complete
    #[error("Fetch task failed: {0}")]
    Task(String),
}

/// Errors surfaced by the publication cache.
///
/// Cloneable so that every caller waiting on the same load observes the same
/// failure.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// Identifier could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Publication could not be parsed
    #[error("Failed to load publication: {0}")]
    Parse(Arc<ParseError>),
}

impl From<ParseError> for ResolveError {
    fn from(err: ParseError) -> Self {
        Self::Parse(Arc::new(err))
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Publication file does not exist
    #[error("Publication not found: {}", .0.display())]
    BookNotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid {field}: {reason}")]
    InvalidValue {
        /// Field name that failed validation
        field: String,
        /// Reason for invalidity
        reason: String,
    },
}

/// Server runtime errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind HTTP server
    #[error("Failed to bind HTTP server to {addr}: {source}")]
    BindFailed {
        /// Address that failed to bind
        addr: std::net::SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Preloading the announced publication failed
    #[error("Failed to preload publication: {0}")]
    Preload(#[from] ResolveError),

    /// Server shutdown error
    #[error("Server shutdown error: {0}")]
    Shutdown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_messages() {
        assert_eq!(DecodeError::Empty.to_string(), "Identifier is empty");
        assert_eq!(
            DecodeError::InvalidPath.to_string(),
            "Identifier does not decode to a valid path"
        );
    }

    #[test]
    fn test_resolve_error_shares_parse_error() {
        let err: ResolveError = ParseError::MissingEntry("META-INF/container.xml".to_string()).into();
        let cloned = err.clone();
        match (&err, &cloned) {
            (ResolveError::Parse(a), ResolveError::Parse(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected parse errors"),
        }
        assert!(err.to_string().contains("META-INF/container.xml"));
    }

    #[test]
    fn test_server_error_conversion() {
        let config_err = ConfigError::BookNotFound(PathBuf::from("missing.epub"));
        let server_err: ServerError = config_err.into();
        assert!(server_err.to_string().contains("missing.epub"));
    }
}
