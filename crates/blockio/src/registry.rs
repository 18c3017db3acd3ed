//! Backend registry.
//!
//! Maps a configured `kind` to a factory that deserialises the kind's own
//! parameter struct. The table is filled when the registry is constructed;
//! nothing registers itself implicitly.

use crate::backend::{DEFAULT_MAX_FILE_SIZE, LocalBackend, MemoryBackend};
use crate::error::{ErrorKind, Result};
use crate::{BackendHandle, RotateBackend};
use exn::{OptionExt, ResultExt};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::instrument;

/// Builds a backend from its raw parameters.
pub type Factory = fn(Value) -> BoxFuture<'static, Result<BackendHandle>>;

pub struct Registry {
    factories: BTreeMap<&'static str, Factory>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Registry {
    /// A registry without any backend kinds.
    pub fn empty() -> Self {
        Self { factories: BTreeMap::new() }
    }

    /// All built-in kinds enabled at compile time.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("mem", build_memory);
        registry.register("localfile", build_local);
        #[cfg(feature = "chat")]
        registry.register("chat-service", build_chat);
        #[cfg(feature = "s3")]
        registry.register("s3", build_s3);
        registry
    }

    pub fn register(&mut self, kind: &'static str, factory: Factory) -> &mut Self {
        self.factories.insert(kind, factory);
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().copied()
    }

    /// Construct the backend registered as `kind`, wrapped in the rotate
    /// backend when `rotation` is not a multiple of 256.
    #[instrument(skip(self, params))]
    pub async fn build(&self, kind: &str, params: Value, rotation: i64) -> Result<BackendHandle> {
        let factory = self.factories.get(kind).ok_or_raise(|| ErrorKind::UnknownBackend(kind.to_string()))?;
        let backend = factory(params).await?;
        tracing::info!(
            backend = backend.name(),
            block_size = backend.max_file_size(),
            rotated = rotation.rem_euclid(256) != 0,
            "Block backend ready"
        );
        Ok(RotateBackend::wrap(backend, rotation))
    }
}

/// Deserialise backend parameters; `null` is treated as an empty table.
fn params<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
    let value = if value.is_null() { Value::Object(Default::default()) } else { value };
    serde_json::from_value(value).or_raise(|| ErrorKind::InvalidConfig(format!("bad parameters for `{kind}`")))
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoryParams {
    #[serde(default = "default_max_file_size")]
    max_file_size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocalParams {
    root: PathBuf,
    #[serde(default = "default_max_file_size")]
    max_file_size: u64,
}

fn build_memory(value: Value) -> BoxFuture<'static, Result<BackendHandle>> {
    Box::pin(async move {
        let p: MemoryParams = params("mem", value)?;
        if p.max_file_size == 0 {
            exn::bail!(ErrorKind::InvalidConfig("max_file_size must be positive".to_string()));
        }
        Ok(Arc::new(MemoryBackend::new(p.max_file_size)) as BackendHandle)
    })
}

fn build_local(value: Value) -> BoxFuture<'static, Result<BackendHandle>> {
    Box::pin(async move {
        let p: LocalParams = params("localfile", value)?;
        if p.max_file_size == 0 {
            exn::bail!(ErrorKind::InvalidConfig("max_file_size must be positive".to_string()));
        }
        Ok(Arc::new(LocalBackend::new("localfile", p.root, p.max_file_size)?) as BackendHandle)
    })
}

#[cfg(feature = "chat")]
fn build_chat(value: Value) -> BoxFuture<'static, Result<BackendHandle>> {
    use crate::backend::{ChatBackend, DEFAULT_API_BASE, DEFAULT_URL_CACHE_SIZE, DEFAULT_URL_CACHE_TTL};
    use std::time::Duration;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct ChatParams {
        token: String,
        chat_id: String,
        #[serde(default)]
        api_base: Option<String>,
        #[serde(default = "default_max_file_size")]
        max_file_size: u64,
        #[serde(default)]
        url_cache_size: Option<usize>,
        #[serde(default)]
        url_cache_ttl_secs: Option<u64>,
    }

    Box::pin(async move {
        let p: ChatParams = params("chat-service", value)?;
        let ttl = p.url_cache_ttl_secs.map(Duration::from_secs).unwrap_or(DEFAULT_URL_CACHE_TTL);
        let backend = ChatBackend::new("chat-service", p.token, p.chat_id)
            .with_api_base(p.api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()))
            .with_max_file_size(p.max_file_size)
            .with_url_cache(p.url_cache_size.unwrap_or(DEFAULT_URL_CACHE_SIZE), ttl);
        Ok(Arc::new(backend) as BackendHandle)
    })
}

#[cfg(feature = "s3")]
fn build_s3(value: Value) -> BoxFuture<'static, Result<BackendHandle>> {
    use crate::backend::{S3Backend, S3Config};

    Box::pin(async move {
        let config: S3Config = params("s3", value)?;
        Ok(Arc::new(S3Backend::new("s3", config)?) as BackendHandle)
    })
}
