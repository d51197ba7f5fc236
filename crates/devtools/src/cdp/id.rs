//! Command ID generator
//!
//! One counter per session. 64 bits, so wraparound is not a concern.

use std::sync::atomic::{AtomicU64, Ordering};

use super::protocol::CommandId;

#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: CommandId) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Hand out a fresh id. Strictly increasing, never reused.
    pub fn next_id(&self) -> CommandId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
