//! S3 object store

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use tracing::debug;

use crate::error::{ExportError, Result};

use super::{CompletedPart, ObjectLocation, ObjectStore};

const CONTENT_TYPE: &str = "application/json";

/// Amazon S3 (or an S3 compatible endpoint).
pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient AWS configuration.
    ///
    /// # Arguments
    /// * `region` - Region override
    /// * `endpoint_url` - Custom endpoint; enables path-style addressing
    pub async fn from_env(region: Option<String>, endpoint_url: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(url) = endpoint_url {
            debug!("Using S3 endpoint {}", url);
            builder = builder.endpoint_url(url).force_path_style(true);
        }
        Self::new(Client::from_conf(builder.build()))
    }
}

fn upload_error<E>(err: E) -> ExportError
where
    E: std::error::Error,
{
    ExportError::upload(DisplayErrorContext(err))
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn put(&self, location: &ObjectLocation, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .content_type(CONTENT_TYPE)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(upload_error)?;
        Ok(())
    }

    async fn begin_multipart(&self, location: &ObjectLocation) -> Result<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .content_type(CONTENT_TYPE)
            .send()
            .await
            .map_err(upload_error)?;

        output
            .upload_id()
            .map(String::from)
            .ok_or_else(|| ExportError::upload("no upload id returned"))
    }

    async fn upload_part(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String> {
        let output = self
            .client
            .upload_part()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(upload_error)?;

        output
            .e_tag()
            .map(String::from)
            .ok_or_else(|| ExportError::upload(format!("no ETag returned for part {part_number}")))
    }

    async fn complete_multipart(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let parts = parts
            .iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.tag)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(upload_error)?;
        Ok(())
    }

    async fn abort_multipart(&self, location: &ObjectLocation, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(upload_error)?;
        Ok(())
    }
}
