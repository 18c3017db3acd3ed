use crate::error::{ErrorKind, Result};

/// How a logical file of `size` bytes is split into parts of `block_size`.
///
/// Every part is exactly `block_size` bytes except the last, which holds the
/// remainder. An empty file has no parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    size: u64,
    block_size: u64,
}

impl Layout {
    pub fn new(size: u64, block_size: u64) -> Result<Self> {
        let block_size = block_size.max(1);
        if u32::try_from(size.div_ceil(block_size)).is_err() {
            exn::bail!(ErrorKind::TooLarge(size));
        }
        Ok(Self { size, block_size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn part_count(&self) -> u32 {
        // Bounded by the check in `new`.
        self.size.div_ceil(self.block_size) as u32
    }

    /// Length of one part; zero for indices past the end.
    pub fn part_len(&self, part_id: u32) -> u64 {
        let start = u64::from(part_id) * self.block_size;
        self.size.saturating_sub(start).min(self.block_size)
    }

    /// Part index and offset within that part of an absolute position.
    pub fn locate(&self, pos: u64) -> (u32, u64) {
        let part_id = u32::try_from(pos / self.block_size).unwrap_or(u32::MAX);
        (part_id, pos % self.block_size)
    }
}
