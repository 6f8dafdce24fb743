use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Object storage failures, grouped by what an operator has to fix
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Access denied by object storage; check credentials and bucket policy")]
    AccessDenied,

    #[error("Bucket {0} not found; check storage configuration")]
    BucketNotFound(String),

    #[error("Invalid object storage credentials")]
    InvalidCredentials,

    #[error("Not an object URL of this bucket: {0}")]
    InvalidUrl(String),

    #[error("Object storage request failed: {0}")]
    Backend(String),
}

/// Outbound object storage operations used by the image storage client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key` with public-read access
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;

    /// Public URL an uploaded object is reachable at
    fn public_url(&self, key: &str) -> String;

    /// Recover the object key from a URL produced by `public_url`
    fn key_from_url(&self, url: &str) -> Result<String, StorageError>;
}

/// S3 uploader for identity images
pub struct S3Uploader {
    client: S3Client,
    config: S3Config,
}

impl S3Uploader {
    /// Create a new S3 uploader
    pub async fn new(config: &S3Config) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        // Static credentials from configuration, otherwise the default provider chain
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "identity-service-config",
            ));
        }

        let aws_config = loader.load().await;
        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            has_static_credentials = config.access_key_id.is_some(),
            "S3 uploader initialized"
        );

        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Uploader {
    #[instrument(skip(self, body), fields(bucket = %self.config.bucket, size_bytes = body.len()))]
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|e| {
                classify_error(
                    e.as_service_error().and_then(|se| se.code()),
                    &self.config.bucket,
                    DisplayErrorContext(&e).to_string(),
                )
            })?;

        debug!(key = %key, "Object uploaded to S3");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.config.bucket))]
    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                classify_error(
                    e.as_service_error().and_then(|se| se.code()),
                    &self.config.bucket,
                    DisplayErrorContext(&e).to_string(),
                )
            })?;

        debug!(key = %key, "Object deleted from S3");
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        object_url(&self.config, key)
    }

    fn key_from_url(&self, url: &str) -> Result<String, StorageError> {
        object_key(&self.config, url)
    }
}

/// Map an S3 error code onto a storage error kind
fn classify_error(code: Option<&str>, bucket: &str, message: String) -> StorageError {
    match code {
        Some("AccessDenied") => StorageError::AccessDenied,
        Some("NoSuchBucket") => StorageError::BucketNotFound(bucket.to_string()),
        Some("InvalidAccessKeyId") | Some("SignatureDoesNotMatch") => {
            StorageError::InvalidCredentials
        }
        _ => StorageError::Backend(message),
    }
}

fn uses_path_style(config: &S3Config) -> bool {
    config.force_path_style || config.endpoint_url.is_some()
}

/// Public URL of an object
///
/// Virtual-hosted AWS URLs unless a custom endpoint is configured, in which
/// case the bucket becomes the first path segment.
fn object_url(config: &S3Config, key: &str) -> String {
    match config.endpoint_url {
        Some(ref endpoint) => format!(
            "{}/{}/{}",
            endpoint.trim_end_matches('/'),
            config.bucket,
            key
        ),
        None if config.force_path_style => format!(
            "https://s3.{}.amazonaws.com/{}/{}",
            config.region, config.bucket, key
        ),
        None => format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            config.bucket, config.region, key
        ),
    }
}

/// Object key encoded in a public URL
fn object_key(config: &S3Config, url: &str) -> Result<String, StorageError> {
    let invalid = || StorageError::InvalidUrl(url.to_string());

    let (_, rest) = url.split_once("://").ok_or_else(invalid)?;
    let path = rest
        .split_once('/')
        .map(|(_, path)| path)
        .ok_or_else(invalid)?;
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let decoded = urlencoding::decode(path).map_err(|_| invalid())?;
    let key = if uses_path_style(config) {
        decoded
            .strip_prefix(&format!("{}/", config.bucket))
            .ok_or_else(invalid)?
            .to_string()
    } else {
        decoded.into_owned()
    };

    if key.is_empty() {
        return Err(invalid());
    }

    Ok(key)
}
