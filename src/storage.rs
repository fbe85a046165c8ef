use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use crate::config::AppConfig;

#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<()>;

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String>;
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds the attachment store from the environment configuration.
    /// Explicit credentials and a custom endpoint are optional so local
    /// MinIO and real AWS both work.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let region = Region::new(config.aws_region.clone());
        let region_provider = RegionProviderChain::first_try(Some(region))
            .or_default_provider()
            .or_else("us-east-1");

        #[allow(deprecated)]
        let mut loader = aws_config::from_env().region(region_provider);

        if let Some(endpoint) = &config.aws_endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        if let (Some(access_key), Some(secret_key)) = (
            config.aws_access_key_id.clone(),
            config.aws_secret_access_key.clone(),
        ) {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(credentials);
        }

        let base_config = loader.load().await;
        let s3_config = S3ConfigBuilder::from(&base_config)
            .force_path_style(true)
            .build();

        Ok(Self::new(
            S3Client::from_conf(s3_config),
            config.attachments_bucket.clone(),
        ))
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        request
            .send()
            .await
            .context("failed to upload object to S3")?;

        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presign_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .context("failed to build S3 presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .context("failed to generate presigned download URL")?;

        Ok(presigned.uri().to_string())
    }
}
