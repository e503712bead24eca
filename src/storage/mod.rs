//! Object storage
//!
//! The sinks talk to storage only through [`ObjectStore`]. Two backends ship
//! with the binary: S3 and a local directory tree that mimics buckets and
//! multipart sessions.

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

pub mod filesystem;
#[cfg(test)]
pub mod memory;
pub mod s3;

pub use filesystem::FilesystemStore;
pub use s3::S3Store;

/// Where an exported object lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// An uploaded part of a multipart session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: i32,
    /// Integrity tag returned by the store
    pub tag: String,
}

/// Storage collaborator used by the sinks.
///
/// Every failure is reported as `ExportError::Upload`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Write a whole object in one call.
    async fn put(&self, location: &ObjectLocation, body: Vec<u8>) -> Result<()>;

    /// Open a multipart session and return its id.
    async fn begin_multipart(&self, location: &ObjectLocation) -> Result<String>;

    /// Upload one part and return its tag.
    async fn upload_part(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String>;

    /// Assemble the object from `parts`, which must be in ascending order.
    async fn complete_multipart(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()>;

    /// Discard a session and every part uploaded to it.
    async fn abort_multipart(&self, location: &ObjectLocation, upload_id: &str) -> Result<()>;
}
