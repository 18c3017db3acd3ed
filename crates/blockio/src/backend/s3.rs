//! Object-storage block backend.
//!
//! One blob is one object, named by a random UUID below an optional key
//! prefix. Offsets map onto the `Range` header of `GetObject`, so this
//! backend never reports `RangeUnsupported`. Works against AWS and against
//! path-style S3-compatible endpoints (B2, MinIO, Tigris).

use super::read_limited;
use crate::error::{ErrorKind, Result};
use crate::{BlobReader, BlockBackend};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use exn::ResultExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::instrument;
use uuid::Uuid;

/// Requests allowed in flight per backend.
const MAX_IN_FLIGHT: usize = 64;
/// Three retries after the first attempt.
const MAX_ATTEMPTS: u32 = 4;
/// Default block size for object storage (64 MiB).
pub const DEFAULT_S3_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

fn default_max_file_size() -> u64 {
    DEFAULT_S3_MAX_FILE_SIZE
}

/// `bot_config` for the `s3` kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3Config {
    pub bucket: String,
    /// Key prefix every blob is stored under; surrounding slashes are ignored
    #[serde(default)]
    pub prefix: Option<String>,
    pub region: String,
    /// Custom endpoint for S3-compatible services
    #[serde(default)]
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    max_file_size: u64,
    in_flight: Arc<Semaphore>,
}

impl S3Backend {
    pub fn new(name: impl Into<String>, config: S3Config) -> Result<Self> {
        if config.max_file_size == 0 {
            exn::bail!(ErrorKind::InvalidConfig("max_file_size must be positive".to_string()));
        }
        let prefix = config.prefix.map(|p| p.trim_matches('/').to_string()).filter(|p| !p.is_empty());
        if let Some(p) = &prefix
            && p.split('/').any(|segment| segment == ".." || segment == ".")
        {
            exn::bail!(ErrorKind::InvalidPath(p.into()));
        }
        let credentials = Credentials::new(config.key_id, config.key_secret, None, None, "filegate");
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .retry_config(RetryConfig::standard().with_max_attempts(MAX_ATTEMPTS))
            .force_path_style(true);
        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            prefix,
            max_file_size: config.max_file_size,
            in_flight: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
        })
    }

    fn full_key(&self, blob_key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{blob_key}"),
            None => blob_key.to_string(),
        }
    }

    async fn permit(&self) -> Result<OwnedSemaphorePermit> {
        self.in_flight
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }
}

#[async_trait]
impl BlockBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    #[instrument(skip(self, reader), fields(backend = %self.name))]
    async fn upload(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<String> {
        let data = read_limited(reader, self.max_file_size).await?;
        let blob_key = Uuid::new_v4().to_string();
        let _permit = self.permit().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(&blob_key))
            .body(ByteStream::from(data))
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("PutObject {blob_key}")))?;
        Ok(blob_key)
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn download(&self, blob_key: &str, offset: u64) -> Result<BlobReader> {
        let range = (offset > 0).then(|| format!("bytes={offset}-"));
        let output = {
            let _permit = self.permit().await?;
            self.client
                .get_object()
                .bucket(&self.bucket)
                .key(self.full_key(blob_key))
                .set_range(range)
                .send()
                .await
        };
        let output = match output {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(blob_key.to_string()))
            },
            Err(err) => return Err(err).or_raise(|| ErrorKind::Network(format!("GetObject {blob_key}"))),
        };
        Ok(Box::new(Box::pin(output.body.into_async_read())))
    }
}
