//! Small building blocks shared by every filegate crate.
//!
//! - [`IdGenerator`]: process-wide, time-ordered 64-bit identifiers used for
//!   both file IDs and directory entry IDs.
//! - [`fileid`]: the external (hex) encoding of file IDs, shard prefixes and
//!   public link construction.
//! - [`cache`]: the bounded LRU/TTL cache used in front of metadata lookups
//!   and by the disk tier of the IO cache.

pub mod cache;
mod clock;
pub mod error;
pub mod fileid;
mod id;

pub use crate::clock::now_ms;
pub use crate::id::IdGenerator;
