//! Chat service block backend.
//!
//! Blobs are uploaded as documents to a fixed chat through a Telegram-style
//! bot API and served back from the service's file CDN. The blob key is the
//! document `file_id` assigned by the service.
//!
//! Download URLs are resolved through `getFile` and cached for a limited
//! time. A fetch through a cached URL that fails (other than a range
//! refusal) invalidates the entry and re-resolves exactly once.

use super::read_limited;
use crate::error::{ErrorKind, Result};
use crate::{BlobReader, BlockBackend};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use filegate_util::cache::{Cache, LruCache};
use futures::TryStreamExt;
use reqwest::{Client, StatusCode, header, multipart};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::instrument;
use uuid::Uuid;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_URL_CACHE_SIZE: usize = 10_000;
pub const DEFAULT_URL_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

impl<T> ApiReply<T> {
    fn into_result(self, method: &str) -> Result<T> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => exn::bail!(ErrorKind::BackendError(format!(
                "{method} failed: {}",
                self.description.unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Message {
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct Document {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    file_path: Option<String>,
}

/// Chat service block backend.
///
/// # Examples
///
/// ```no_run
/// use filegate_blockio::backend::ChatBackend;
///
/// let backend = ChatBackend::new("chat", "123456:bot-token", "-100123456789")
///     .with_max_file_size(20 * 1024 * 1024);
/// ```
pub struct ChatBackend {
    name: String,
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
    max_file_size: u64,
    /// `blob_key -> download URL`
    urls: LruCache<String, String>,
}

impl ChatBackend {
    pub fn new(name: impl Into<String>, token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
            max_file_size: super::DEFAULT_MAX_FILE_SIZE,
            urls: LruCache::new(DEFAULT_URL_CACHE_SIZE, Some(DEFAULT_URL_CACHE_TTL)),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_url_cache(mut self, capacity: usize, ttl: Duration) -> Self {
        self.urls = LruCache::new(capacity, Some(ttl));
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    async fn parse_reply<T: DeserializeOwned>(response: reqwest::Response, method: &str) -> Result<T> {
        let reply: ApiReply<T> =
            response.json().await.or_raise(|| ErrorKind::Network(format!("{method}: unreadable reply")))?;
        reply.into_result(method)
    }

    /// Download URL for a blob, and whether it came from the cache.
    async fn resolve(&self, blob_key: &str) -> Result<(String, bool)> {
        if let Some(url) = self.urls.get(&blob_key.to_string()) {
            return Ok((url, true));
        }
        let response = self
            .client
            .get(self.method_url("getFile"))
            .query(&[("file_id", blob_key)])
            .send()
            .await
            .or_raise(|| ErrorKind::Network("getFile".to_string()))?;
        if response.status() == StatusCode::BAD_REQUEST {
            exn::bail!(ErrorKind::NotFound(blob_key.to_string()));
        }
        let file: RemoteFile = Self::parse_reply(response, "getFile").await?;
        let file_path = file.file_path.ok_or_raise(|| ErrorKind::NotFound(blob_key.to_string()))?;
        let url = format!("{}/file/bot{}/{file_path}", self.api_base, self.token);
        self.urls.set(blob_key.to_string(), url.clone());
        Ok((url, false))
    }

    async fn fetch(&self, blob_key: &str, url: &str, offset: u64) -> Result<BlobReader> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(header::RANGE, format!("bytes={offset}-"));
        }
        let response = request.send().await.or_raise(|| ErrorKind::Network(format!("download {blob_key}")))?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => {},
            StatusCode::OK if offset == 0 => {},
            StatusCode::OK => exn::bail!(ErrorKind::RangeUnsupported(offset)),
            StatusCode::NOT_FOUND => exn::bail!(ErrorKind::NotFound(blob_key.to_string())),
            status => exn::bail!(ErrorKind::Network(format!("download {blob_key}: HTTP {status}"))),
        }
        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(body))))
    }
}

#[async_trait]
impl BlockBackend for ChatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    #[instrument(skip(self, reader), fields(backend = %self.name))]
    async fn upload(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<String> {
        let data = read_limited(reader, self.max_file_size).await?;
        let size = data.len();
        let document = multipart::Part::bytes(data).file_name(format!("{}.bin", Uuid::new_v4().simple()));
        let form = multipart::Form::new().text("chat_id", self.chat_id.clone()).part("document", document);
        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .or_raise(|| ErrorKind::Network("sendDocument".to_string()))?;
        let message: Message = Self::parse_reply(response, "sendDocument").await?;
        let blob_key = message
            .document
            .map(|d| d.file_id)
            .ok_or_raise(|| ErrorKind::BackendError("sendDocument reply carries no document".to_string()))?;
        tracing::debug!(%blob_key, bytes = size, "Uploaded blob to chat service");
        Ok(blob_key)
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn download(&self, blob_key: &str, offset: u64) -> Result<BlobReader> {
        let (url, cached) = self.resolve(blob_key).await?;
        match self.fetch(blob_key, &url, offset).await {
            Err(err) if cached && !matches!(&*err, ErrorKind::RangeUnsupported(_)) => {
                tracing::warn!(%blob_key, error = %&*err, "Cached download URL failed, re-resolving");
                self.urls.del(&blob_key.to_string());
                let (url, _) = self.resolve(blob_key).await?;
                self.fetch(blob_key, &url, offset).await
            },
            result => result,
        }
    }
}
