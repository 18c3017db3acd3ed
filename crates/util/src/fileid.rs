//! External representation of file IDs.
//!
//! File IDs leave the process as 16 lowercase hex characters (the 8-byte
//! big-endian encoding). Public links additionally carry a two character
//! shard prefix derived from `xxhash64` of the decimal ID, which is also
//! what the disk cache uses to spread files over subdirectories.

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use std::hash::Hasher;
use std::path::Path;
use twox_hash::XxHash64;

/// Leading path segment of every public link.
pub const LINK_PREFIX: &str = "/defauls";
const ENCODED_LEN: usize = 16;

pub fn xxhash64(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

/// First two hex characters of `xxhash64(file_id.to_string())`.
pub fn shard_prefix(file_id: u64) -> String {
    let hash = xxhash64(file_id.to_string().as_bytes());
    hex::encode(&hash.to_be_bytes()[..1])
}

pub fn encode_file_id(file_id: u64) -> String {
    hex::encode(file_id.to_be_bytes())
}

pub fn decode_file_id(encoded: &str) -> Result<u64> {
    if encoded.len() != ENCODED_LEN {
        exn::bail!(ErrorKind::InvalidFileId(encoded.to_string()));
    }
    let mut bytes = [0u8; 8];
    hex::decode_to_slice(encoded, &mut bytes).or_raise(|| ErrorKind::InvalidFileId(encoded.to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Build `/defauls/<shard>/<16-hex>[-<stem>][.<ext>]`.
///
/// Only the final component of `name` is used, so callers can pass a full
/// directory path.
pub fn public_link(file_id: u64, name: Option<&str>) -> String {
    let mut link = format!("{LINK_PREFIX}/{}/{}", shard_prefix(file_id), encode_file_id(file_id));
    let Some(file_name) = name.map(Path::new).and_then(Path::file_name).map(Path::new) else {
        return link;
    };
    if let Some(stem) = file_name.file_stem().and_then(|s| s.to_str()).filter(|s| !s.is_empty()) {
        link.push('-');
        link.push_str(stem);
    }
    if let Some(ext) = file_name.extension().and_then(|s| s.to_str()).filter(|s| !s.is_empty()) {
        link.push('.');
        link.push_str(ext);
    }
    link
}

/// Recover the file ID from a public link, verifying the shard prefix.
pub fn parse_public_link(link: &str) -> Result<u64> {
    let invalid = || ErrorKind::InvalidLink(link.to_string());
    let rest = link.strip_prefix(LINK_PREFIX).and_then(|r| r.strip_prefix('/')).ok_or_raise(invalid)?;
    let (shard, name) = rest.split_once('/').ok_or_raise(invalid)?;
    let encoded = name.get(..ENCODED_LEN).ok_or_raise(invalid)?;
    let suffix = &name[ENCODED_LEN..];
    if !(suffix.is_empty() || suffix.starts_with('-') || suffix.starts_with('.')) {
        exn::bail!(invalid());
    }
    let file_id = decode_file_id(encoded).map_err(|e| e.raise(invalid()))?;
    if shard != shard_prefix(file_id) {
        exn::bail!(invalid());
    }
    Ok(file_id)
}
