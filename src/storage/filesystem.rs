//! Local directory object store
//!
//! Objects are written to `<root>/<bucket>/<key>`. Single puts are written to
//! a temporary file under `<root>/.multipart/` and renamed into place.
//! Multipart parts are staged under `<root>/.multipart/<upload id>/` and
//! concatenated on completion. Either way an object is never visible half
//! written.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ExportError, Result};

use super::{CompletedPart, ObjectLocation, ObjectStore};

const STAGING_DIR: &str = ".multipart";

pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path an object is written to.
    pub fn object_path(&self, location: &ObjectLocation) -> PathBuf {
        self.root.join(&location.bucket).join(&location.key)
    }

    fn staging_path(&self, upload_id: &str) -> Result<PathBuf> {
        // Session ids are generated here; anything else could escape the root.
        if Uuid::parse_str(upload_id).is_err() {
            return Err(ExportError::upload(format!("unknown upload id {upload_id}")));
        }
        Ok(self.root.join(STAGING_DIR).join(upload_id))
    }

    fn part_path(dir: &Path, part_number: i32) -> PathBuf {
        dir.join(format!("{part_number:05}.part"))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> ExportError {
    ExportError::upload(format!("{}: {}", path.display(), err))
}

async fn write_file(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    fs::write(path, body).await.map_err(|e| io_error(path, e))
}

async fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    fs::rename(from, to).await.map_err(|e| io_error(to, e))
}

fn part_tag(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn put(&self, location: &ObjectLocation, body: Vec<u8>) -> Result<()> {
        let path = self.object_path(location);
        let temp = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}.put", Uuid::new_v4()));
        write_file(&temp, &body).await?;

        if let Err(err) = move_into_place(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err);
        }
        debug!("Wrote {} bytes to {}", body.len(), path.display());
        Ok(())
    }

    async fn begin_multipart(&self, location: &ObjectLocation) -> Result<String> {
        let upload_id = Uuid::new_v4().to_string();
        let dir = self.staging_path(&upload_id)?;
        fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
        debug!("Opened multipart session {} for {}", upload_id, location);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _location: &ObjectLocation,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String> {
        let dir = self.staging_path(upload_id)?;
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(ExportError::upload(format!("no multipart session {upload_id}")));
        }
        write_file(&Self::part_path(&dir, part_number), &body).await?;
        Ok(part_tag(&body))
    }

    async fn complete_multipart(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let dir = self.staging_path(upload_id)?;
        let path = self.object_path(location);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        let assembled = dir.join("assembled");
        let mut previous = 0;
        let mut object = fs::File::create(&assembled)
            .await
            .map_err(|e| io_error(&assembled, e))?;
        for part in parts {
            if part.part_number <= previous {
                return Err(ExportError::upload(format!(
                    "parts out of order at part {}",
                    part.part_number
                )));
            }
            previous = part.part_number;

            let part_path = Self::part_path(&dir, part.part_number);
            let body = fs::read(&part_path)
                .await
                .map_err(|e| io_error(&part_path, e))?;
            if part_tag(&body) != part.tag {
                return Err(ExportError::upload(format!(
                    "tag mismatch for part {}",
                    part.part_number
                )));
            }
            object
                .write_all(&body)
                .await
                .map_err(|e| io_error(&assembled, e))?;
        }
        object
            .flush()
            .await
            .map_err(|e| io_error(&assembled, e))?;
        drop(object);

        fs::rename(&assembled, &path)
            .await
            .map_err(|e| io_error(&path, e))?;
        fs::remove_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
        debug!("Completed {} with {} part(s)", location, parts.len());
        Ok(())
    }

    async fn abort_multipart(&self, location: &ObjectLocation, upload_id: &str) -> Result<()> {
        let dir = self.staging_path(upload_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&dir, e)),
        }
        debug!("Aborted multipart session {} for {}", upload_id, location);
        Ok(())
    }
}
