//! Rebuilds the shared allocation record from namespace annotations.
//!
//! Annotations are the ground truth: each pass replays every namespace's
//! UID block into a fresh pool and overwrites the record with it. Blocks
//! leaked by lost races are reclaimed this way. The record's version is read
//! before namespaces are listed, so an allocation that lands mid-pass turns
//! the final write into a conflict and the pass starts over.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::ControllerError;
use crate::allocator::{AllocationError, UidAllocator};
use crate::store::{NamespaceStore, RangeAllocationStore, StoreError};
use crate::types::RangeAllocation;
use crate::uid::{Block, Range};

/// Periodic reconciliation of the shared allocation record.
pub struct Repair {
    namespaces: Arc<dyn NamespaceStore>,
    allocations: Arc<dyn RangeAllocationStore>,
    range: Range,
    record_name: String,
    uid_annotation: String,
    interval: Duration,
    conflict_retries: u32,
}

impl std::fmt::Debug for Repair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repair")
            .field("range", &self.range)
            .field("record_name", &self.record_name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Summary of one repair pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepairReport {
    /// Blocks recorded as allocated.
    pub allocated: u64,
    /// Annotations ignored (unparseable, out of range, or duplicated).
    pub skipped: u64,
}

impl Repair {
    /// Repair of the record `record_name` for `range`, reading blocks from
    /// the `uid_annotation` namespace annotation every `interval`.
    pub fn new(
        namespaces: Arc<dyn NamespaceStore>,
        allocations: Arc<dyn RangeAllocationStore>,
        range: Range,
        record_name: impl Into<String>,
        uid_annotation: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            namespaces,
            allocations,
            range,
            record_name: record_name.into(),
            uid_annotation: uid_annotation.into(),
            interval,
            conflict_retries: 5,
        }
    }

    /// Attempts at the final conditional write before giving up.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries.max(1);
        self
    }

    /// Run one pass.
    ///
    /// # Errors
    ///
    /// [`ControllerError::RangeExhausted`] if the annotations claim more
    /// blocks than the range has, and store errors.
    pub async fn run_once(&self) -> Result<RepairReport, ControllerError> {
        for attempt in 1..=self.conflict_retries {
            let existing = match self.allocations.get(&self.record_name).await {
                Ok(record) => Some(record),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };

            let (pool, report) = self.rebuild().await?;
            let (range, data) = pool.snapshot();

            let written = match existing {
                Some(mut record) => {
                    if record.range != range {
                        warn!(
                            record = %self.record_name,
                            from = %record.range,
                            to = %range,
                            "repair is rewriting the allocation record for a new range"
                        );
                    }
                    record.range = range;
                    record.data = data;
                    self.allocations.update(&record).await
                }
                None => {
                    let record = RangeAllocation {
                        name: self.record_name.clone(),
                        range,
                        data,
                        ..RangeAllocation::default()
                    };
                    self.allocations.create(&record).await
                }
            };

            match written {
                Ok(_) => {
                    info!(
                        record = %self.record_name,
                        allocated = report.allocated,
                        skipped = report.skipped,
                        "allocation record repaired"
                    );
                    return Ok(report);
                }
                Err(StoreError::Conflict { .. } | StoreError::AlreadyExists { .. }) => {
                    debug!(attempt, "allocation record changed during repair; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ControllerError::RetriesExhausted {
            namespace: self.record_name.clone(),
            retries: self.conflict_retries,
        })
    }

    /// Replay every namespace's UID block into a fresh pool.
    async fn rebuild(&self) -> Result<(UidAllocator, RepairReport), ControllerError> {
        let mut pool = UidAllocator::new(self.range);
        let mut report = RepairReport::default();

        for namespace in self.namespaces.list().await? {
            let Some(value) = namespace.annotation(&self.uid_annotation) else {
                continue;
            };
            let block = match Block::parse(value) {
                Ok(block) => block,
                Err(e) => {
                    warn!(namespace = %namespace.name, value, error = %e, "ignoring unparseable uid annotation");
                    report.skipped = report.skipped.saturating_add(1);
                    continue;
                }
            };
            match pool.allocate(&block) {
                Ok(()) => report.allocated = report.allocated.saturating_add(1),
                Err(e) if e.is_not_in_range() => {
                    warn!(namespace = %namespace.name, %block, range = %self.range, "uid block is outside the configured range");
                    report.skipped = report.skipped.saturating_add(1);
                }
                Err(AllocationError::AlreadyAllocated { .. }) => {
                    warn!(namespace = %namespace.name, %block, "uid block is shared with another namespace");
                    report.skipped = report.skipped.saturating_add(1);
                }
                Err(AllocationError::Full) => {
                    return Err(ControllerError::RangeExhausted {
                        range: self.range.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok((pool, report))
    }

    /// Repair every interval until `shutdown` fires. The first pass runs one
    /// interval after the call; run [`Repair::run_once`] at startup.
    ///
    /// # Errors
    ///
    /// Returns the first failed pass; stopping on `shutdown` is not an error.
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ControllerError> {
        let period = self.interval.max(Duration::from_millis(1));
        let start = tokio::time::Instant::now()
            .checked_add(period)
            .unwrap_or_else(tokio::time::Instant::now);
        let mut interval = tokio::time::interval_at(start, period);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once().await?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("repair loop stopped");
        Ok(())
    }
}
