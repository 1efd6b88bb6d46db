//! Error types for `cryptschema` operations.
//!
//! Every failure belongs to one of three kinds (see [`ErrorKind`]) so callers
//! can branch on remediation: fix configuration, fix the schema, or look at
//! the key vault / KMS back-end.

use std::fmt;
use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad connection string, unsupported KMS provider, missing key-vault namespace.
    Configuration,
    /// Malformed input file, wrong shape, schema violations.
    Validation,
    /// Data-key lookup or creation failed, schema generation aborted.
    Encryption,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Validation => write!(f, "validation"),
            Self::Encryption => write!(f, "encryption"),
        }
    }
}

/// Main error type for `cryptschema` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Generic configuration problem
    #[error("configuration error: {0}")]
    Configuration(String),

    /// KMS provider tag outside the supported set
    #[error("unsupported KMS provider \"{provider}\" (supported: {supported})")]
    UnsupportedKmsProvider {
        /// The tag that was supplied
        provider: String,
        /// Comma-separated list of supported tags
        supported: String,
    },

    /// Configuration file could not be read or parsed
    #[error("invalid configuration file {}: {message}", .path.display())]
    ConfigFile {
        /// Path of the configuration file
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Schema file could not be read or is not valid JSON
    #[error("invalid schema file {}: {message}", .path.display())]
    SchemaFile {
        /// Path of the schema file
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Simplified schema input has the wrong shape
    #[error("invalid schema input at {location}: {message}")]
    InvalidInput {
        /// Index or field path of the offending element
        location: String,
        /// What went wrong
        message: String,
    },

    /// A simplified field uses a type tag outside the supported set
    #[error("unknown type \"{found}\" for field {field_path} (valid types: {valid})")]
    UnknownType {
        /// Field path of the offending field
        field_path: String,
        /// The tag as written
        found: String,
        /// Comma-separated list of supported tags
        valid: String,
    },

    /// Verbose schema violates a structural rule
    #[error("invalid schema at {path}: {reason}")]
    InvalidSchema {
        /// Dotted path of the offending node
        path: String,
        /// The rule that was violated
        reason: String,
    },

    /// Deterministic encryption requested for a type that cannot support it
    #[error(
        "invalid schema at {path}: deterministic encryption does not support bsonType \"{bson_type}\" (allowed: {allowed})"
    )]
    IncompatibleAlgorithm {
        /// Dotted path of the offending field
        path: String,
        /// The declared type
        bson_type: String,
        /// Comma-separated list of deterministic-compatible types
        allowed: String,
    },

    /// Data-key lookup or creation failed for a field
    #[error("failed to resolve data key for {field_path}: {source}")]
    KeyResolution {
        /// Field path used as the key's alternate name
        field_path: String,
        /// Underlying collaborator failure
        #[source]
        source: KeyProviderError,
    },

    /// Expansion aborted because a field could not be processed
    #[error("schema generation failed at {field_path}: {source}")]
    SchemaGeneration {
        /// Field path of the leaf being expanded
        field_path: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// The external encrypted-client constructor failed
    #[error("failed to construct encrypted client: {0}")]
    ClientConstruction(String),
}

impl Error {
    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_)
            | Self::UnsupportedKmsProvider { .. }
            | Self::ConfigFile { .. }
            | Self::ClientConstruction(_) => ErrorKind::Configuration,
            Self::SchemaFile { .. }
            | Self::InvalidInput { .. }
            | Self::UnknownType { .. }
            | Self::InvalidSchema { .. }
            | Self::IncompatibleAlgorithm { .. } => ErrorKind::Validation,
            Self::KeyResolution { .. } | Self::SchemaGeneration { .. } => ErrorKind::Encryption,
        }
    }

    pub(crate) fn invalid_schema(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSchema { path: path.to_string(), reason: reason.into() }
    }

    pub(crate) fn invalid_input(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput { location: location.into(), message: message.into() }
    }
}

/// Errors raised by the key vault store or a KMS back-end.
#[derive(Debug)]
pub enum KeyProviderError {
    /// Could not open a connection to the key vault
    ConnectionFailed(String),

    /// Key vault lookup failed
    QueryFailed(String),

    /// Key vault insert failed
    InsertFailed(String),

    /// Another record already carries this alternate name
    DuplicateAltName(String),

    /// A stored record could not be decoded
    MalformedRecord(String),

    /// KMS back-end does not match the configured provider
    ProviderMismatch {
        /// Provider the resolver was configured for
        expected: String,
        /// Provider the back-end implements
        actual: String,
    },

    /// Master key material is unusable
    InvalidMasterKey(String),

    /// DEK wrapping failed
    WrapFailed(String),

    /// DEK unwrapping failed
    UnwrapFailed(String),

    /// I/O operation failed
    Io(std::io::Error),
}

impl fmt::Display for KeyProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "key vault connection failed: {msg}"),
            Self::QueryFailed(msg) => write!(f, "key vault query failed: {msg}"),
            Self::InsertFailed(msg) => write!(f, "key vault insert failed: {msg}"),
            Self::DuplicateAltName(name) => {
                write!(f, "a data key with alternate name \"{name}\" already exists")
            }
            Self::MalformedRecord(msg) => write!(f, "malformed key vault record: {msg}"),
            Self::ProviderMismatch { expected, actual } => {
                write!(f, "KMS back-end is \"{actual}\" but \"{expected}\" is configured")
            }
            Self::InvalidMasterKey(msg) => write!(f, "invalid master key: {msg}"),
            Self::WrapFailed(msg) => write!(f, "DEK wrap failed: {msg}"),
            Self::UnwrapFailed(msg) => write!(f, "DEK unwrap failed: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for KeyProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KeyProviderError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::Configuration("x".into()).kind(), ErrorKind::Configuration);
        assert_eq!(Error::invalid_schema("root", "bad").kind(), ErrorKind::Validation);

        let err = Error::KeyResolution {
            field_path: "app.users.ssn".into(),
            source: KeyProviderError::QueryFailed("timeout".into()),
        };
        assert_eq!(err.kind(), ErrorKind::Encryption);

        let wrapped =
            Error::SchemaGeneration { field_path: "app.users.ssn".into(), source: Box::new(err) };
        assert_eq!(wrapped.kind(), ErrorKind::Encryption);
    }

    #[test]
    fn test_key_resolution_message_carries_path_and_cause() {
        let err = Error::KeyResolution {
            field_path: "app.users.ssn".into(),
            source: KeyProviderError::ConnectionFailed("refused".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("app.users.ssn"));
        assert!(msg.contains("refused"));
    }

    #[test]
    fn test_io_error_source() {
        let err = KeyProviderError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("disk"));
    }
}
