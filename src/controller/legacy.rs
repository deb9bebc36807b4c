//! In-process allocation for single-controller deployments.
//!
//! The UID pool lives in this process and is primed from namespace
//! annotations at startup. Each allocation registers compensating actions
//! in a [`Transaction`]; if the namespace cannot be updated they run in
//! reverse order so the pool never keeps a block nobody holds.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ControllerError, NamespaceSync};
use crate::allocator::{McsAllocationFn, UidAllocator};
use crate::config::AnnotationKeys;
use crate::store::NamespaceStore;
use crate::types::Namespace;
use crate::uid::{Block, Range};

/// Namespace update retries after the first attempt.
pub const UPDATE_RETRIES: u32 = 2;

type Undo = Box<dyn FnOnce() + Send>;

/// Compensating actions for a multi-step change.
///
/// Dropping an uncommitted transaction rolls it back.
#[derive(Default)]
pub struct Transaction {
    undo: Vec<Undo>,
    committed: bool,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("pending", &self.undo.len())
            .field("committed", &self.committed)
            .finish()
    }
}

impl Transaction {
    /// An empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action that undoes the step just taken.
    pub fn add(&mut self, undo: impl FnOnce() + Send + 'static) {
        self.undo.push(Box::new(undo));
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.undo.len()
    }

    /// Whether no actions are registered.
    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Keep every step; the undo actions are discarded.
    pub fn commit(mut self) {
        self.committed = true;
        self.undo.clear();
    }

    /// Run the undo actions, most recent first.
    pub fn rollback(mut self) {
        self.run_undo();
    }

    fn run_undo(&mut self) {
        while let Some(undo) = self.undo.pop() {
            undo();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.committed {
            self.run_undo();
        }
    }
}

/// Allocates from a pool held in this process.
pub struct InProcessAllocator {
    namespaces: Arc<dyn NamespaceStore>,
    pool: Arc<Mutex<UidAllocator>>,
    mcs: McsAllocationFn,
    keys: AnnotationKeys,
}

impl std::fmt::Debug for InProcessAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessAllocator").finish_non_exhaustive()
    }
}

fn lock(pool: &Mutex<UidAllocator>) -> MutexGuard<'_, UidAllocator> {
    pool.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl InProcessAllocator {
    /// An allocator with an empty pool over `range`.
    pub fn new(
        namespaces: Arc<dyn NamespaceStore>,
        range: Range,
        mcs: McsAllocationFn,
        keys: AnnotationKeys,
    ) -> Self {
        Self {
            namespaces,
            pool: Arc::new(Mutex::new(UidAllocator::new(range))),
            mcs,
            keys,
        }
    }

    /// Mark every block already recorded on a namespace as taken.
    ///
    /// Returns the number of blocks loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespaces cannot be listed.
    pub async fn prime(&self) -> Result<u64, ControllerError> {
        let namespaces = self.namespaces.list().await?;
        let mut pool = lock(&self.pool);
        for namespace in namespaces {
            let Some(value) = namespace.annotation(&self.keys.uid_range) else {
                continue;
            };
            match Block::parse(value) {
                Ok(block) => {
                    if let Err(e) = pool.allocate(&block) {
                        warn!(namespace = %namespace.name, %block, error = %e, "ignoring recorded uid block");
                    }
                }
                Err(e) => {
                    warn!(namespace = %namespace.name, value, error = %e, "ignoring unparseable uid annotation");
                }
            }
        }
        info!(allocated = pool.count(), "in-process uid pool primed");
        Ok(pool.count())
    }

    /// Whether `block` is currently held by the pool.
    pub fn is_allocated(&self, block: &Block) -> bool {
        lock(&self.pool).has(block)
    }

    /// Allocate for `namespace`, rolling the pool back if the namespace
    /// cannot be updated.
    ///
    /// # Errors
    ///
    /// [`ControllerError::RangeExhausted`] when no block is free,
    /// [`ControllerError::RetriesExhausted`] when updates keep conflicting.
    pub async fn allocate(&self, namespace: Namespace) -> Result<(), ControllerError> {
        let mut tx = Transaction::new();
        match self.allocate_in(namespace, &mut tx).await {
            Ok(true) => {
                tx.commit();
                Ok(())
            }
            Ok(false) => {
                tx.rollback();
                Ok(())
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Allocate for `namespace`, registering undo actions in `tx`.
    ///
    /// Returns `Ok(true)` if this call recorded a block on the namespace and
    /// `Ok(false)` if nothing needed recording (already allocated, or the
    /// namespace is gone); in the latter case `tx` should be rolled back.
    ///
    /// # Errors
    ///
    /// As for [`InProcessAllocator::allocate`].
    pub async fn allocate_in(
        &self,
        namespace: Namespace,
        tx: &mut Transaction,
    ) -> Result<bool, ControllerError> {
        if namespace.annotation(&self.keys.uid_range).is_some() {
            return Ok(false);
        }

        let block = {
            let mut pool = lock(&self.pool);
            let range = pool.range().to_string();
            pool.allocate_next()
                .map_err(|_| ControllerError::RangeExhausted { range })?
        };
        let pool = Arc::clone(&self.pool);
        tx.add(move || lock(&pool).release(&block));

        let label = (self.mcs)(&block);
        let name = namespace.name.clone();
        let mut current = namespace;

        for attempt in 0..=UPDATE_RETRIES {
            let mut updated = current.clone();
            updated
                .annotations
                .insert(self.keys.uid_range.clone(), block.to_string());
            updated
                .annotations
                .insert(self.keys.supplemental_groups.clone(), block.to_string());
            if let Some(label) = &label {
                updated
                    .annotations
                    .entry(self.keys.mcs.clone())
                    .or_insert_with(|| label.to_string());
            }

            match self.namespaces.update(&updated).await {
                Ok(_) => {
                    info!(namespace = %name, %block, "allocated namespace security ranges");
                    return Ok(true);
                }
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) if e.is_conflict() => {
                    debug!(namespace = %name, attempt, "namespace changed; re-reading");
                    current = match self.namespaces.get(&name).await {
                        Ok(ns) => ns,
                        Err(e) if e.is_not_found() => return Ok(false),
                        Err(e) => return Err(e.into()),
                    };
                    if current.annotation(&self.keys.uid_range).is_some() {
                        return Ok(false);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ControllerError::RetriesExhausted {
            namespace: name,
            retries: UPDATE_RETRIES,
        })
    }
}

#[async_trait]
impl NamespaceSync for InProcessAllocator {
    async fn sync(&self, name: &str) -> Result<(), ControllerError> {
        let namespace = match self.namespaces.get(name).await {
            Ok(ns) => ns,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        self.allocate(namespace).await
    }
}
