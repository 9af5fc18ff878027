use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::time::Duration;

use super::{BlobStore, DriveError};
use crate::config::DriveConfig;

/// Evidence bucket on an S3-compatible server (MinIO, Garage, AWS).
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(config: &DriveConfig) -> Result<Self, DriveError> {
        if config.bucket.trim().is_empty() {
            return Err(DriveError::Config("drive bucket is not set".to_string()));
        }

        let endpoint = if config.server.ends_with('/') {
            config.server.clone()
        } else {
            format!("{}/", config.server)
        };

        let base_config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                config.access_key.clone(),
                config.secret_key.clone(),
                None,
                None,
                "static",
            ))
            .load()
            .await;

        let s3_config = S3ConfigBuilder::from(&base_config)
            .force_path_style(true)
            .build();

        Ok(Self::with_client(Client::from_conf(s3_config), config.bucket.clone()))
    }

    pub fn with_client(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<(), DriveError> {
        log::debug!("Uploading evidence to s3://{}/{}", self.bucket, path);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| DriveError::Upload {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), DriveError> {
        log::debug!("Deleting evidence s3://{}/{}", self.bucket, path);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| DriveError::Delete {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, DriveError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let text = sdk_err.to_string();
                if text.contains("404") || text.contains("NotFound") {
                    Ok(false)
                } else {
                    Err(DriveError::Config(format!(
                        "Failed to check evidence existence: {text}"
                    )))
                }
            }
        }
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, DriveError> {
        let presign_err = |reason: String| DriveError::Presign {
            path: path.to_string(),
            reason,
        };

        let presigning = PresigningConfig::expires_in(ttl).map_err(|e| presign_err(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .presigned(presigning)
            .await
            .map_err(|e| presign_err(e.to_string()))?;

        Ok(request.uri().to_string())
    }
}
