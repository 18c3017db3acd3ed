//! `filegate` operator CLI.
//!
//! ```bash
//! filegate put ./video.mkv /media/video.mkv --workers 8
//! filegate ls /media
//! filegate link /media/video.mkv
//! filegate get /media/video.mkv ./copy.mkv
//! filegate purge --older-than-secs 86400
//! ```
//!
//! Configuration is read from `--config`, the platform config directory, and
//! `FILEGATE_*` environment variables; see [`filegate_config`].

mod cli;
mod commands;
mod error;

use crate::cli::Cli;
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use filegate_blockio::Registry;
use filegate_config::Config;
use filegate_iocache::IoCache;
use filegate_manager::FileManager;
use filegate_meta::Database;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{:?}", err.raise(ErrorKind::Config));
            return ExitCode::FAILURE;
        },
    };
    init_tracing(&config.log_level);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping");
                cancel.cancel();
            }
        }
    });

    let result = match connect(&config).await {
        Ok(manager) => commands::run(&manager, cli.command, &cancel, &mut std::io::stdout()).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(retryable = err.is_retryable(), "Command failed");
            eprintln!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Wire the database, backend and IO cache into one manager.
async fn connect(config: &Config) -> Result<FileManager> {
    if let Some(parent) = config.db_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
    }
    let db = Database::connect(&config.db_file).await.map_err(|e| e.raise(ErrorKind::Database))?;

    let registry = Registry::with_defaults();
    let backend = registry
        .build(&config.bot_kind, config.bot_config.clone(), config.rotate_stream)
        .await
        .map_err(|e| e.raise(ErrorKind::Backend))?;
    if backend.name() == "mem" {
        tracing::warn!("Using the in-memory backend; blobs do not outlive this process");
    }

    if config.io_cache.enable_file {
        tokio::fs::create_dir_all(&config.io_cache.file_cache_dir).await.or_raise(|| ErrorKind::Cache)?;
    }
    let io_cache = IoCache::new(&config.io_cache).await.map_err(|e| e.raise(ErrorKind::Cache))?;

    tracing::info!(
        db_file = %config.db_file.display(),
        backend = backend.name(),
        block_size = backend.max_file_size(),
        rotation = config.rotation(),
        "Connected"
    );
    Ok(FileManager::new(&db, backend, io_cache))
}
