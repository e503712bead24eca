use serde::{Deserialize, Serialize};

use super::kinds::{ErrorKind, ExportError};

/// Structured error information written into a job manifest.
///
/// Callers must check for its presence: pipeline failures are reported
/// here rather than returned as `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ErrorInfo {
    /// Extract the manifest form of an error.
    pub fn from_error(error: &ExportError) -> Self {
        let context = match error {
            ExportError::Unexpected { context, .. } => context.clone(),
            ExportError::Database { entity, .. } => Some(format!("entity={entity}")),
            ExportError::Connection { endpoint, .. } => Some(format!("endpoint={endpoint}")),
            _ => None,
        };

        let message = match error {
            ExportError::Database { message, .. } | ExportError::Connection { message, .. } => {
                message.clone()
            }
            ExportError::Unexpected { message, .. } => message.clone(),
            other => other.to_string(),
        };

        Self {
            kind: error.kind(),
            message,
            context,
        }
    }

    /// Convert error info to pretty-printed JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Convert error info to compact JSON string (single line).
    pub fn to_json_compact(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&ExportError> for ErrorInfo {
    fn from(error: &ExportError) -> Self {
        Self::from_error(error)
    }
}
