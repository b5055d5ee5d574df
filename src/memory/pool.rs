//! Reuse pool: freed blocks in release order plus per-size-class counters.

use std::collections::HashMap;

use super::block::{Block, BlockId};

#[derive(Debug, Default)]
pub struct ReusePool {
    /// Scan order is release order
    entries: Vec<BlockId>,
    /// (size, stream) -> blocks of that class currently pooled
    bucket_counts: HashMap<(u64, i64), usize>,
}

impl ReusePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: &Block) {
        self.entries.push(block.id());
        *self
            .bucket_counts
            .entry((block.size(), block.stream_id()))
            .or_insert(0) += 1;
    }

    /// Remove the entry at `position` (which must hold `block`).
    pub fn take(&mut self, position: usize, block: &Block) -> BlockId {
        let id = self.entries.remove(position);
        if let Some(count) = self
            .bucket_counts
            .get_mut(&(block.size(), block.stream_id()))
        {
            *count = count.saturating_sub(1);
        }
        id
    }

    pub fn entries(&self) -> &[BlockId] {
        &self.entries
    }

    pub fn bucket_count(&self, size: u64, stream_id: i64) -> usize {
        self.bucket_counts
            .get(&(size, stream_id))
            .copied()
            .unwrap_or(0)
    }

    /// Size rule for handing `block` to a request of `size` bytes: an exact
    /// match always, a larger block only while its size class is crowded.
    pub fn admits(&self, block: &Block, size: u64, threshold: u64) -> bool {
        block.size() == size
            || (block.size() > size
                && self.bucket_count(block.size(), block.stream_id()) as u64 > threshold)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
