//! Metadata export library
//!
//! This library composes read-only queries over the archive metadata tables
//! (granules, collections, providers, PDRs, executions, files, async
//! operations), streams the results through a server-side cursor and writes
//! them as one JSON array into object storage.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `connection`: Connection parameters and pool construction
//! - `error`: Error types and manifest error records
//! - `export`: Result streaming, sinks and export jobs
//! - `query`: Schema catalog, join resolution and statement composition
//! - `storage`: Object storage backends
//!
//! # Example
//!
//! ```
//! use rds_export::query::{ExportRequest, QueryComposer};
//!
//! let request = ExportRequest::new("providers").columns("name,protocol").limit(10);
//! let query = QueryComposer::new().compose(&request).unwrap();
//! assert_eq!(query.sql, "SELECT name, protocol FROM providers LIMIT 10");
//! ```

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod export;
pub mod query;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use connection::ConnectionParams;
pub use error::{ExportError, Result};
pub use export::{ExportJob, JobManifest};
pub use query::{ExportRequest, QueryComposer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
