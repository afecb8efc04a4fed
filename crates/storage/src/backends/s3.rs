//! S3-compatible storage backend using the AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::ChunkStore;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::instrument;

const DEFAULT_REGION: &str = "us-east-1";

/// S3-compatible chunk store.
///
/// Works against AWS S3 and S3-compatibles (MinIO, Garage, R2) via a custom
/// endpoint and path-style addressing. Object puts are atomic on the
/// backend's side; there is no multipart path because chunks are bounded.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// When `access_key_id`/`secret_access_key` are unset, the default
    /// credential chain (env, profile, IMDS) is used.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        let region = aws_config::Region::new(region.unwrap_or_else(|| DEFAULT_REGION.to_string()));

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);

        if let (Some(access_key), Some(secret_key)) = (access_key_id, secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "obsync-static",
            ));
        }

        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        builder = builder.force_path_style(force_path_style);

        let client = Client::from_conf(builder.build());

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.filter(|p| !p.is_empty()),
        })
    }

    /// Apply the configured key prefix.
    fn object_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
            None => key.to_string(),
        }
    }
}

#[async_trait]
impl ChunkStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(StorageError::Backend(format!("head {key}: {err}")))
                }
            }
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                return if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    Err(StorageError::NotFound(key.to_string()))
                } else {
                    Err(StorageError::Backend(format!("get {key}: {err}")))
                };
            }
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("read body of {key}: {e}")))?;
        Ok(data.into_bytes())
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("put {key}: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("delete {key}: {e}")))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("bucket {}: {e}", self.bucket)))?;
        Ok(())
    }
}
