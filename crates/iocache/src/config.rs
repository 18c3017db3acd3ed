use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// IO cache tuning, as found under the `io_cache` configuration key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoCacheConfig {
    /// Keep small files entirely in memory
    pub enable_mem: bool,
    pub mem_key_count: usize,
    /// Largest file (bytes) held in memory
    pub mem_key_size_limit: u64,
    /// Keep medium files as whole files on local disk
    pub enable_file: bool,
    pub file_key_count: usize,
    /// Largest file (bytes) held on disk
    pub file_key_size_limit: u64,
    pub file_cache_dir: PathBuf,
}

impl Default for IoCacheConfig {
    fn default() -> Self {
        Self {
            enable_mem: false,
            mem_key_count: 1000,
            mem_key_size_limit: 4 * 1024,
            enable_file: false,
            file_key_count: 10_000,
            file_key_size_limit: 64 * 1024 * 1024,
            file_cache_dir: PathBuf::new(),
        }
    }
}
