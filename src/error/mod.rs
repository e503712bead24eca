//! Error handling for export jobs.
//!
//! This module provides:
//! - The crate-wide [`ExportError`] taxonomy and `Result` alias
//! - Composer-specific [`QueryBuildError`] reasons
//! - [`ErrorInfo`], the JSON form written into job manifests
//!
//! # Example
//!
//! ```rust
//! use rds_export::error::{ErrorInfo, ExportError};
//!
//! let err = ExportError::upload("SlowDown");
//! let info = ErrorInfo::from_error(&err);
//! println!("{}", info.to_json_compact().unwrap());
//! ```

pub mod kinds;
pub mod report;

// Re-export commonly used types
pub use kinds::{ConfigError, ErrorKind, ExportError, QueryBuildError, Result};
pub use report::ErrorInfo;
