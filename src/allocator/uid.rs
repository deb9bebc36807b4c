//! Pool of UID blocks.

use super::{AllocationBitmap, AllocationError};
use crate::uid::{Block, Range};

/// Hands out aligned blocks of a [`Range`].
#[derive(Debug, Clone)]
pub struct UidAllocator {
    range: Range,
    pool: AllocationBitmap,
}

impl UidAllocator {
    /// An empty pool over every whole block of `range`.
    pub fn new(range: Range) -> Self {
        Self {
            pool: AllocationBitmap::new(range.to_string(), range.size()),
            range,
        }
    }

    /// The range blocks are drawn from.
    pub fn range(&self) -> &Range {
        &self.range
    }

    /// Number of allocated blocks.
    pub fn count(&self) -> u64 {
        self.pool.count()
    }

    /// Number of free blocks.
    pub fn free(&self) -> u64 {
        self.pool.free()
    }

    fn index(&self, block: &Block) -> Result<u64, AllocationError> {
        self.range
            .offset(block)
            .ok_or_else(|| AllocationError::NotInDomain {
                value: block.to_string(),
                range: self.range.to_string(),
            })
    }

    /// Reserve a specific block.
    ///
    /// # Errors
    ///
    /// [`AllocationError::NotInDomain`] if the block is not one of the
    /// range's aligned blocks, [`AllocationError::AlreadyAllocated`] if taken.
    pub fn allocate(&mut self, block: &Block) -> Result<(), AllocationError> {
        let offset = self.index(block)?;
        self.pool.allocate(offset)
    }

    /// Reserve the lowest free block.
    ///
    /// # Errors
    ///
    /// [`AllocationError::Full`] when the range is exhausted.
    pub fn allocate_next(&mut self) -> Result<Block, AllocationError> {
        let offset = self.pool.allocate_next()?;
        match self.range.block_at(offset) {
            Some(block) => Ok(block),
            None => {
                self.pool.release(offset);
                Err(AllocationError::Full)
            }
        }
    }

    /// Return a block to the pool. Unknown or free blocks are ignored.
    pub fn release(&mut self, block: &Block) {
        if let Ok(offset) = self.index(block) {
            self.pool.release(offset);
        }
    }

    /// Whether `block` is currently allocated.
    pub fn has(&self, block: &Block) -> bool {
        self.index(block).is_ok_and(|offset| self.pool.has(offset))
    }

    /// Serialise as `(range, bytes)`.
    pub fn snapshot(&self) -> (String, Vec<u8>) {
        self.pool.snapshot()
    }

    /// Replace the pool contents from a snapshot of the same range.
    ///
    /// # Errors
    ///
    /// [`AllocationError::MismatchedRange`] if the snapshot is for a
    /// different range.
    pub fn restore(&mut self, descriptor: &str, data: &[u8]) -> Result<(), AllocationError> {
        self.pool.restore(descriptor, data)
    }
}
