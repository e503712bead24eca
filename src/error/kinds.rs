use std::{fmt, io};

use serde::{Deserialize, Serialize};

/// Crate-wide `Result` type using [`ExportError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Top-level error type for export jobs.
///
/// Composer failures (`UnsupportedEntity`, `QueryBuild`) happen before any I/O.
/// Everything else is raised by the streaming pipeline and ends up in the
/// job manifest instead of being returned to the caller.
#[derive(Debug)]
pub enum ExportError {
    /// The requested target entity has no composition strategy.
    UnsupportedEntity(String),

    /// A projected or filtered reference could not be resolved.
    QueryBuild(QueryBuildError),

    /// Statement execution failure.
    Database { entity: String, message: String },

    /// The relational store could not be reached.
    Connection { endpoint: String, message: String },

    /// Object storage failure. Multipart sessions are aborted before this is raised.
    Upload(String),

    /// The caller cancelled the job (timeout or interrupt).
    Cancelled(String),

    /// Configuration errors.
    Config(ConfigError),

    /// I/O errors.
    Io(io::Error),

    /// Catch-all carrying whatever diagnostic context was available.
    Unexpected {
        message: String,
        context: Option<String>,
    },
}

/// Reasons the query composer refuses to build a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryBuildError {
    /// Column is not part of the target entity's view.
    UnknownColumn { entity: String, column: String },

    /// A qualified reference names an entity that is not part of the view.
    UnknownQualifier { qualifier: String, column: String },

    /// Filter keyed by something that is neither the target nor one of its secondaries.
    UnknownFilterScope { entity: String, scope: String },

    /// A scoped filter that mentions none of its scope's columns.
    UnreferencedFilter { scope: String, predicate: String },

    /// Column list was given but contained no names.
    EmptyProjection,

    /// Predicate text that cannot be tokenized (e.g. an unterminated string).
    InvalidPredicate(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Missing required field.
    MissingField(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

/// Stable error classification written to job manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedEntity,
    QueryBuildError,
    DatabaseError,
    UploadError,
    Cancelled,
    ConfigError,
    IoError,
    Unexpected,
}

impl ExportError {
    /// Build a `Database` error for a job targeting `entity`.
    pub fn database(entity: &str, err: impl fmt::Display) -> Self {
        ExportError::Database {
            entity: entity.to_string(),
            message: err.to_string(),
        }
    }

    /// Build a `Connection` error for `endpoint` (`host:port/database`).
    pub fn connection(endpoint: impl Into<String>, err: impl fmt::Display) -> Self {
        ExportError::Connection {
            endpoint: endpoint.into(),
            message: err.to_string(),
        }
    }

    /// Build an `Upload` error from any displayable cause.
    pub fn upload(err: impl fmt::Display) -> Self {
        ExportError::Upload(err.to_string())
    }

    /// Classification used in manifests and logs.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::UnsupportedEntity(_) => ErrorKind::UnsupportedEntity,
            ExportError::QueryBuild(_) => ErrorKind::QueryBuildError,
            ExportError::Database { .. } | ExportError::Connection { .. } => {
                ErrorKind::DatabaseError
            }
            ExportError::Upload(_) => ErrorKind::UploadError,
            ExportError::Cancelled(_) => ErrorKind::Cancelled,
            ExportError::Config(_) => ErrorKind::ConfigError,
            ExportError::Io(_) => ErrorKind::IoError,
            ExportError::Unexpected { .. } => ErrorKind::Unexpected,
        }
    }

    /// True for errors raised by the composer, before any I/O happened.
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            ExportError::UnsupportedEntity(_) | ExportError::QueryBuild(_)
        )
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::UnsupportedEntity(entity) => {
                write!(f, "Unsupported entity: {entity}")
            }
            ExportError::QueryBuild(e) => write!(f, "Query build error: {e}"),
            ExportError::Database { entity, message } => {
                write!(f, "Database error while exporting {entity}: {message}")
            }
            ExportError::Connection { endpoint, message } => {
                write!(f, "Connection to {endpoint} failed: {message}")
            }
            ExportError::Upload(msg) => write!(f, "Upload error: {msg}"),
            ExportError::Cancelled(msg) => write!(f, "Export cancelled: {msg}"),
            ExportError::Config(e) => write!(f, "Configuration error: {e}"),
            ExportError::Io(e) => write!(f, "I/O error: {e}"),
            ExportError::Unexpected { message, context } => match context {
                Some(ctx) => write!(f, "Unexpected error: {message} ({ctx})"),
                None => write!(f, "Unexpected error: {message}"),
            },
        }
    }
}

impl fmt::Display for QueryBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryBuildError::UnknownColumn { entity, column } => {
                write!(f, "column '{column}' is not available when exporting {entity}")
            }
            QueryBuildError::UnknownQualifier { qualifier, column } => {
                write!(f, "'{qualifier}.{column}' does not name a known entity column")
            }
            QueryBuildError::UnknownFilterScope { entity, scope } => {
                write!(f, "filter scope '{scope}' cannot be applied when exporting {entity}")
            }
            QueryBuildError::UnreferencedFilter { scope, predicate } => {
                write!(f, "filter for '{scope}' references none of its columns: {predicate}")
            }
            QueryBuildError::EmptyProjection => write!(f, "no columns requested"),
            QueryBuildError::InvalidPredicate(msg) => write!(f, "invalid predicate: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UnsupportedEntity => "UnsupportedEntity",
            ErrorKind::QueryBuildError => "QueryBuildError",
            ErrorKind::DatabaseError => "DatabaseError",
            ErrorKind::UploadError => "UploadError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::ConfigError => "ConfigError",
            ErrorKind::IoError => "IoError",
            ErrorKind::Unexpected => "Unexpected",
        };
        f.write_str(name)
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::QueryBuild(e) => Some(e),
            ExportError::Config(e) => Some(e),
            ExportError::Io(e) => Some(e),
            _ => None,
        }
    }
}
impl std::error::Error for QueryBuildError {}
impl std::error::Error for ConfigError {}

/* ========================= Conversions to ExportError ========================= */

impl From<io::Error> for ExportError {
    fn from(err: io::Error) -> Self {
        ExportError::Io(err)
    }
}

impl From<QueryBuildError> for ExportError {
    fn from(err: QueryBuildError) -> Self {
        ExportError::QueryBuild(err)
    }
}

impl From<ConfigError> for ExportError {
    fn from(err: ConfigError) -> Self {
        ExportError::Config(err)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Unexpected {
            message: format!("JSON serialization failed: {err}"),
            context: Some(format!("line {}, column {}", err.line(), err.column())),
        }
    }
}

impl From<tokio::task::JoinError> for ExportError {
    fn from(err: tokio::task::JoinError) -> Self {
        ExportError::Unexpected {
            message: err.to_string(),
            context: Some("background task".to_string()),
        }
    }
}
