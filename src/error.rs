use std::path::PathBuf;

use thiserror::Error;

/// Which side of the system a failure belongs to.
///
/// Document problems never show up here: those are returned as
/// [`Diagnostic`](crate::Diagnostic) values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input from the caller, detected before any parsing starts.
    CallerInput,
    /// The validator itself could not run (network, disk, decoding, libxml2).
    Infrastructure,
}

/// Main error type for everything that is not a document diagnostic
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown project: {name}")]
    UnknownProject { name: String },

    #[error("Cannot open document {path}: {source}")]
    DocumentUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Cache write error: {path} - {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed URL: {url} - {reason}")]
    MalformedUrl { url: String, reason: String },

    #[error("Cannot decode diagnostic location: {location} - {reason}")]
    LocationDecode { location: String, reason: String },

    #[error("Entity resolution exceeded {limit} rewrites: {system_id}")]
    TooManyRewrites { system_id: String, limit: usize },

    #[error("XPath query error: {expression} - {details}")]
    Query { expression: String, details: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LibXML2 internal error: {details}")]
    LibXml2Internal { details: String },

    #[error("Validation task failed: {0}")]
    Task(String),
}

impl ValidationError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ValidationError::UnknownProject { .. } | ValidationError::DocumentUnreadable { .. } => {
                ErrorCategory::CallerInput
            }
            _ => ErrorCategory::Infrastructure,
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        self.category() == ErrorCategory::Infrastructure
    }
}

/// Network-specific error types
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status error: {status} for {url} - {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Request timeout: {url} after {timeout_seconds} seconds")]
    Timeout { url: String, timeout_seconds: u64 },

    #[error("Transfer interrupted: {url} - {source}")]
    Interrupted {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// LibXML2-specific error types
#[derive(Error, Debug)]
pub enum LibXml2Error {
    #[error("Text reader creation failed: {path}")]
    ReaderCreationFailed { path: PathBuf },

    #[error("Schema parser context creation failed: {location}")]
    SchemaContextFailed { location: String },

    #[error("Path contains an interior NUL byte: {path}")]
    InvalidPath { path: String },

    #[error("Document could not be loaded: {path}")]
    DocumentLoadFailed { path: PathBuf },

    #[error("XPath context creation failed")]
    XPathContextFailed,
}

impl From<LibXml2Error> for ValidationError {
    fn from(err: LibXml2Error) -> Self {
        ValidationError::LibXml2Internal {
            details: err.to_string(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ValidationError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
