//! Allocation against a shared, versioned allocation record.
//!
//! Every allocation reads the latest record, sets one bit on a private copy
//! and writes it back conditionally. A conflict means another writer got
//! there first, so the whole attempt starts over from a fresh read. Once a
//! block is reserved in the record it is never released here: if the
//! namespace update then loses a race, the block leaks until the next repair
//! rather than risking two namespaces sharing it. Until repair has created the
//! record nothing is allocated.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ControllerError, NamespaceSync};
use crate::allocator::{McsAllocationFn, UidAllocator};
use crate::config::AnnotationKeys;
use crate::store::{NamespaceStore, RangeAllocationStore};
use crate::types::{Namespace, RangeAllocation};
use crate::uid::{Block, Range};

/// Allocates UID blocks (and derived MCS labels) to namespaces through the
/// shared allocation record.
pub struct SharedRecordAllocator {
    namespaces: Arc<dyn NamespaceStore>,
    allocations: Arc<dyn RangeAllocationStore>,
    range: Range,
    record_name: String,
    mcs: McsAllocationFn,
    keys: AnnotationKeys,
    conflict_retries: u32,
}

impl std::fmt::Debug for SharedRecordAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRecordAllocator")
            .field("range", &self.range)
            .field("record_name", &self.record_name)
            .finish_non_exhaustive()
    }
}

impl SharedRecordAllocator {
    /// An allocator for `range`, persisting its pool in the record called
    /// `record_name`.
    pub fn new(
        namespaces: Arc<dyn NamespaceStore>,
        allocations: Arc<dyn RangeAllocationStore>,
        range: Range,
        record_name: impl Into<String>,
        mcs: McsAllocationFn,
        keys: AnnotationKeys,
    ) -> Self {
        Self {
            namespaces,
            allocations,
            range,
            record_name: record_name.into(),
            mcs,
            keys,
            conflict_retries: 5,
        }
    }

    /// Attempts at each conditional write before giving up.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries.max(1);
        self
    }

    /// Allocate for `namespace` unless it already carries a UID block.
    ///
    /// # Errors
    ///
    /// [`ControllerError::RecordNotReady`] until repair has created the
    /// shared record, [`ControllerError::MismatchedRange`] if the record is
    /// for a different range, [`ControllerError::RangeExhausted`] when no
    /// block is free, and store errors.
    pub async fn allocate(&self, namespace: Namespace) -> Result<(), ControllerError> {
        if namespace.annotation(&self.keys.uid_range).is_some() {
            return Ok(());
        }
        let block = self.reserve_block(&namespace.name).await?;
        self.record_block(namespace, block).await
    }

    /// Reserve the lowest free block in the shared record.
    async fn reserve_block(&self, namespace: &str) -> Result<Block, ControllerError> {
        let expected = self.range.to_string();

        for attempt in 1..=self.conflict_retries {
            let record = self.load_record().await?;

            if record.range != expected {
                return Err(ControllerError::MismatchedRange {
                    expected,
                    found: record.range,
                });
            }

            let mut pool = UidAllocator::new(self.range);
            pool.restore(&record.range, &record.data)?;
            let block = pool
                .allocate_next()
                .map_err(|_| ControllerError::RangeExhausted {
                    range: expected.clone(),
                })?;

            let mut next = record;
            next.data = pool.snapshot().1;
            match self.allocations.update(&next).await {
                Ok(_) => {
                    debug!(namespace, %block, attempt, "reserved uid block");
                    return Ok(block);
                }
                Err(e) if e.is_conflict() => {
                    debug!(namespace, attempt, "allocation record changed; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ControllerError::RetriesExhausted {
            namespace: namespace.to_owned(),
            retries: self.conflict_retries,
        })
    }

    /// The shared record. Only [`crate::controller::repair::Repair`] creates
    /// it, seeded from namespace annotations.
    async fn load_record(&self) -> Result<RangeAllocation, ControllerError> {
        match self.allocations.get(&self.record_name).await {
            Ok(record) => Ok(record),
            Err(e) if e.is_not_found() => Err(ControllerError::RecordNotReady {
                record: self.record_name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the block (and its label) onto the namespace.
    async fn record_block(&self, namespace: Namespace, block: Block) -> Result<(), ControllerError> {
        let label = (self.mcs)(&block);
        let name = namespace.name.clone();
        let mut current = namespace;

        for _ in 0..self.conflict_retries {
            let mut updated = current.clone();
            let value = block.to_string();
            updated
                .annotations
                .insert(self.keys.uid_range.clone(), value.clone());
            updated
                .annotations
                .insert(self.keys.supplemental_groups.clone(), value);
            if !updated.annotations.contains_key(&self.keys.mcs) {
                if let Some(label) = &label {
                    updated
                        .annotations
                        .insert(self.keys.mcs.clone(), label.to_string());
                }
            }

            match self.namespaces.update(&updated).await {
                Ok(_) => {
                    info!(
                        namespace = %name,
                        %block,
                        mcs = %label.as_ref().map(ToString::to_string).unwrap_or_default(),
                        "allocated namespace security ranges"
                    );
                    return Ok(());
                }
                Err(e) if e.is_not_found() => {
                    debug!(namespace = %name, %block, "namespace deleted before allocation was recorded");
                    return Ok(());
                }
                Err(e) if e.is_conflict() => {
                    current = match self.namespaces.get(&name).await {
                        Ok(ns) => ns,
                        Err(e) if e.is_not_found() => return Ok(()),
                        Err(e) => return Err(e.into()),
                    };
                    if current.annotation(&self.keys.uid_range).is_some() {
                        warn!(namespace = %name, %block, "namespace was allocated concurrently; block left for repair");
                        return Ok(());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ControllerError::RetriesExhausted {
            namespace: name,
            retries: self.conflict_retries,
        })
    }
}

#[async_trait]
impl NamespaceSync for SharedRecordAllocator {
    async fn sync(&self, name: &str) -> Result<(), ControllerError> {
        let namespace = match self.namespaces.get(name).await {
            Ok(ns) => ns,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        self.allocate(namespace).await
    }
}
