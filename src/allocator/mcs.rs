//! Pool of MCS labels.

use num_bigint::BigUint;
use num_traits::ToPrimitive;

use super::{AllocationBitmap, AllocationError};
use crate::mcs::{CategoryRange, Label};

/// Hands out labels of a [`CategoryRange`].
///
/// Label spaces larger than `u64::MAX` are clamped; only the first
/// `u64::MAX` labels are ever handed out.
#[derive(Debug, Clone)]
pub struct McsAllocator {
    range: CategoryRange,
    pool: AllocationBitmap,
}

impl McsAllocator {
    /// An empty pool over every label of `range`.
    pub fn new(range: CategoryRange) -> Self {
        let capacity = range.size().to_u64().unwrap_or(u64::MAX);
        Self {
            pool: AllocationBitmap::new(range.to_string(), capacity),
            range,
        }
    }

    /// The range labels are drawn from.
    pub fn range(&self) -> &CategoryRange {
        &self.range
    }

    /// Number of allocated labels.
    pub fn count(&self) -> u64 {
        self.pool.count()
    }

    fn index(&self, label: &Label) -> Result<u64, AllocationError> {
        let not_in_domain = || AllocationError::NotInDomain {
            value: label.to_string(),
            range: self.range.to_string(),
        };
        let offset = self.range.offset(label).ok_or_else(not_in_domain)?;
        offset.to_u64().ok_or_else(not_in_domain)
    }

    /// Reserve a specific label.
    ///
    /// # Errors
    ///
    /// [`AllocationError::NotInDomain`] if the label is not part of the
    /// range, [`AllocationError::AlreadyAllocated`] if taken.
    pub fn allocate(&mut self, label: &Label) -> Result<(), AllocationError> {
        let offset = self.index(label)?;
        self.pool.allocate(offset)
    }

    /// Reserve the lowest free label.
    ///
    /// # Errors
    ///
    /// [`AllocationError::Full`] when the range is exhausted.
    pub fn allocate_next(&mut self) -> Result<Label, AllocationError> {
        let offset = self.pool.allocate_next()?;
        match self.range.label_at(&BigUint::from(offset)) {
            Some(label) => Ok(label),
            None => {
                self.pool.release(offset);
                Err(AllocationError::Full)
            }
        }
    }

    /// Return a label to the pool. Unknown or free labels are ignored.
    pub fn release(&mut self, label: &Label) {
        if let Ok(offset) = self.index(label) {
            self.pool.release(offset);
        }
    }

    /// Whether `label` is currently allocated.
    pub fn has(&self, label: &Label) -> bool {
        self.index(label).is_ok_and(|offset| self.pool.has(offset))
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
