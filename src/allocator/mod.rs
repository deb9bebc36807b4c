//! In-memory allocation pools over UID blocks and MCS labels.
//!
//! [`bitmap::AllocationBitmap`] is the generic pool; [`uid::UidAllocator`]
//! and [`mcs::McsAllocator`] translate between its offsets and the
//! domain values. [`default_mcs_allocation`] derives a label from a block so
//! that every namespace gets a distinct label without a second shared pool.

pub mod bitmap;
pub mod mcs;
pub mod uid;

use std::sync::Arc;

use num_bigint::BigUint;

use crate::mcs::{CategoryRange, Label};
use crate::uid::{Block, Range};

pub use bitmap::AllocationBitmap;
pub use mcs::McsAllocator;
pub use uid::UidAllocator;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from allocation pools.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    /// The offset (or the value it was derived from) lies outside the pool.
    #[error("offset {offset} is not in the pool of {capacity}")]
    NotInRange {
        /// Requested offset.
        offset: u64,
        /// Pool capacity.
        capacity: u64,
    },

    /// The value outside of the pool could not even be mapped to an offset.
    #[error("{value} is not part of range {range}")]
    NotInDomain {
        /// Rendered value.
        value: String,
        /// Rendered range.
        range: String,
    },

    /// The offset is already taken.
    #[error("offset {offset} is already allocated")]
    AlreadyAllocated {
        /// Requested offset.
        offset: u64,
    },

    /// Every offset is taken.
    #[error("no free offsets remain in the pool")]
    Full,

    /// A snapshot was taken from a pool over a different range.
    #[error("allocation snapshot is for range {found}, expected {expected}")]
    MismatchedRange {
        /// Descriptor of this pool.
        expected: String,
        /// Descriptor of the snapshot.
        found: String,
    },
}

impl AllocationError {
    /// Whether the value simply does not belong to the pool.
    pub fn is_not_in_range(&self) -> bool {
        matches!(self, Self::NotInRange { .. } | Self::NotInDomain { .. })
    }
}

// ---------------------------------------------------------------------------
// Block → label derivation
// ---------------------------------------------------------------------------

/// Maps an allocated UID block to the MCS label its namespace receives.
pub type McsAllocationFn = Arc<dyn Fn(&Block) -> Option<Label> + Send + Sync>;

/// Label for a block: `to.label_at(from.offset(block) * multiplier)`.
///
/// The multiplier spreads neighbouring namespaces apart in the label space.
/// Blocks outside `from`, and offsets past the end of `to`, get no label.
pub fn default_mcs_allocation(from: Range, to: CategoryRange, multiplier: u32) -> McsAllocationFn {
    Arc::new(move |block: &Block| {
        let index = from.offset(block)?;
        #[allow(clippy::arithmetic_side_effects)] // BigUint grows instead of overflowing
        let offset = BigUint::from(index) * BigUint::from(multiplier);
        to.label_at(&offset)
    })
}
