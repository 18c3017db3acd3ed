use crate::now_ms;
use std::sync::atomic::{AtomicU64, Ordering};

/// Low bits reserved for IDs minted within the same millisecond.
const SEQUENCE_BITS: u32 = 16;

/// Time-ordered unique ID source.
///
/// IDs are `max(last + 1, now_ms << 16)`, so they are strictly increasing
/// within a process and roughly sortable by creation time across restarts.
/// Share one generator (behind an `Arc`) between every store that mints IDs.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        let floor = u64::try_from(now_ms()).unwrap_or(0) << SEQUENCE_BITS;
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = floor.max(current.saturating_add(1));
            match self.last.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}
